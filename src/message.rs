// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Application data units
//!
//! A [`Message`] owns the bytes of a single frame. The PDU starts at a
//! fixed offset that depends on the [`Framing`]. Header fields and the
//! RTU checksum are (re)installed by [`Message::prepare_to_send()`] right
//! before the frame is written, so the PDU can be modified in place.

use std::{fmt, io};

use byteorder::{BigEndian, ByteOrder as _};
use bytes::{BufMut as _, Bytes, BytesMut};

use crate::{
    codec::{self, rtu::calc_crc, u16_len},
    frame::{
        tcp::{TransactionId, PROTOCOL_ID},
        ExceptionResponse, Framing, Header, Request, Response, ResponsePdu,
    },
    ProtocolError, Slave,
};

/// Direction of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// From client to server.
    Request,
    /// From server to client.
    Response,
}

/// A single frame, header and trailer included.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    framing: Framing,
    role: Role,
    adu: BytesMut,
    pdu_len: usize,
}

fn put_header(buf: &mut BytesMut, header: Header, pdu_len: usize) {
    match header {
        Header::Rtu(hdr) => buf.put_u8(hdr.slave.into()),
        Header::Tcp(hdr) => {
            buf.put_u16(hdr.transaction_id);
            buf.put_u16(PROTOCOL_ID);
            buf.put_u16(u16_len(pdu_len + 1));
            buf.put_u8(hdr.unit_id);
        }
    }
}

fn with_capacity(framing: Framing, pdu_len: usize) -> BytesMut {
    BytesMut::with_capacity(framing.header_len() + pdu_len + framing.checksum_len())
}

impl Message {
    /// Builds a request frame.
    ///
    /// # Errors
    ///
    /// Fails if the request does not fit into a single PDU.
    pub fn request(header: Header, request: &Request<'_>) -> io::Result<Self> {
        let pdu_len = codec::request_pdu_size(request)?;
        let framing = header.framing();
        let mut adu = with_capacity(framing, pdu_len);
        put_header(&mut adu, header, pdu_len);
        codec::encode_request_pdu(&mut adu, request);
        debug_assert_eq!(adu.len(), framing.header_len() + pdu_len);
        let mut message = Self {
            framing,
            role: Role::Request,
            adu,
            pdu_len,
        };
        message.prepare_to_send();
        Ok(message)
    }

    /// Builds a response frame.
    ///
    /// # Errors
    ///
    /// Fails if the response does not fit into a single PDU.
    pub fn response(
        header: Header,
        result: &Result<Response, ExceptionResponse>,
    ) -> io::Result<Self> {
        let pdu_len = codec::response_result_pdu_size(result)?;
        let framing = header.framing();
        let mut adu = with_capacity(framing, pdu_len);
        put_header(&mut adu, header, pdu_len);
        codec::encode_response_result_pdu(&mut adu, result);
        let mut message = Self {
            framing,
            role: Role::Response,
            adu,
            pdu_len,
        };
        message.prepare_to_send();
        Ok(message)
    }

    /// Builds the response to this request.
    ///
    /// Unit id and transaction id are copied from the request.
    ///
    /// # Errors
    ///
    /// Fails if the response does not fit into a single PDU.
    pub fn reply(&self, result: &Result<Response, ExceptionResponse>) -> io::Result<Self> {
        Self::response(self.header(), result)
    }

    pub(crate) fn from_adu(framing: Framing, role: Role, adu: BytesMut, pdu_len: usize) -> Self {
        debug_assert!(adu.len() >= framing.header_len() + pdu_len);
        Self {
            framing,
            role,
            adu,
            pdu_len,
        }
    }

    /// Parses a single complete frame.
    ///
    /// # Errors
    ///
    /// Fails if `frame` is not exactly one valid frame.
    pub fn parse(framing: Framing, role: Role, frame: &[u8]) -> Result<Self, crate::Error> {
        let mut buf = BytesMut::from(frame);
        let message = match framing {
            Framing::Rtu => codec::rtu::decode(&mut buf, role)?,
            Framing::Tcp => codec::tcp::decode(&mut buf, role)?,
        };
        match message {
            Some(message) if buf.is_empty() => Ok(message),
            Some(_) => Err(ProtocolError::Framing(format!(
                "{} trailing bytes after {framing} frame",
                buf.len()
            ))
            .into()),
            None => Err(ProtocolError::Framing(format!("incomplete {framing} frame")).into()),
        }
    }

    /// Installs the header fields and the checksum.
    ///
    /// Calling this repeatedly yields the same bytes.
    pub fn prepare_to_send(&mut self) {
        let header_len = self.framing.header_len();
        self.adu.truncate(header_len + self.pdu_len);
        match self.framing {
            Framing::Tcp => {
                BigEndian::write_u16(&mut self.adu[2..4], PROTOCOL_ID);
                BigEndian::write_u16(&mut self.adu[4..6], u16_len(self.pdu_len + 1));
            }
            Framing::Rtu => {
                let crc = calc_crc(&self.adu);
                self.adu.put_u16(crc);
            }
        }
    }

    #[must_use]
    pub const fn framing(&self) -> Framing {
        self.framing
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The raw frame bytes.
    #[must_use]
    pub fn adu(&self) -> &[u8] {
        &self.adu
    }

    #[must_use]
    pub fn pdu(&self) -> &[u8] {
        let header_len = self.framing.header_len();
        &self.adu[header_len..header_len + self.pdu_len]
    }

    #[must_use]
    pub const fn pdu_len(&self) -> usize {
        self.pdu_len
    }

    #[must_use]
    pub fn unit_id(&self) -> u8 {
        self.adu[self.framing.header_len() - 1]
    }

    #[must_use]
    pub fn slave(&self) -> Slave {
        Slave(self.unit_id())
    }

    pub fn set_unit_id(&mut self, unit_id: u8) {
        let offset = self.framing.header_len() - 1;
        self.adu[offset] = unit_id;
    }

    /// The MBAP transaction id, `None` for RTU frames.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self.framing {
            Framing::Tcp => Some(BigEndian::read_u16(&self.adu[0..2])),
            Framing::Rtu => None,
        }
    }

    #[must_use]
    pub fn header(&self) -> Header {
        match self.transaction_id() {
            Some(transaction_id) => Header::tcp(transaction_id, self.slave()),
            None => Header::rtu(self.slave()),
        }
    }

    /// The raw function code, exception bit included.
    #[must_use]
    pub fn function_code(&self) -> u8 {
        self.pdu()[0]
    }

    #[must_use]
    pub fn is_exception(&self) -> bool {
        self.function_code() >= 0x80
    }

    /// Reads a byte at `offset` within the PDU.
    #[must_use]
    pub fn pdu_u8(&self, offset: usize) -> Option<u8> {
        self.pdu().get(offset).copied()
    }

    /// Reads a big-endian word at `offset` within the PDU.
    #[must_use]
    pub fn pdu_u16(&self, offset: usize) -> Option<u16> {
        self.pdu()
            .get(offset..offset + 2)
            .map(BigEndian::read_u16)
    }

    /// Overwrites a byte within the PDU.
    ///
    /// Returns `false` if `offset` is out of range.
    pub fn set_pdu_u8(&mut self, offset: usize, value: u8) -> bool {
        if offset >= self.pdu_len {
            return false;
        }
        let offset = self.framing.header_len() + offset;
        self.adu[offset] = value;
        true
    }

    /// Overwrites a big-endian word within the PDU.
    ///
    /// Returns `false` if `offset` is out of range.
    pub fn set_pdu_u16(&mut self, offset: usize, value: u16) -> bool {
        if offset + 2 > self.pdu_len {
            return false;
        }
        let offset = self.framing.header_len() + offset;
        BigEndian::write_u16(&mut self.adu[offset..offset + 2], value);
        true
    }

    /// Decodes the PDU of a request.
    ///
    /// # Errors
    ///
    /// Fails if the PDU is malformed.
    pub fn decode_request(&self) -> Result<Request<'static>, ProtocolError> {
        Request::try_from(Bytes::copy_from_slice(self.pdu()))
            .map_err(|err| ProtocolError::Framing(err.to_string()))
    }

    /// Decodes the PDU of a response.
    ///
    /// # Errors
    ///
    /// Fails if the PDU is malformed.
    pub fn decode_response(&self) -> Result<Result<Response, ExceptionResponse>, ProtocolError> {
        ResponsePdu::try_from(Bytes::copy_from_slice(self.pdu()))
            .map(Into::into)
            .map_err(|err| ProtocolError::Framing(err.to_string()))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("framing", &self.framing)
            .field("role", &self.role)
            .field("adu", &format_args!("{:02X?}", &self.adu[..]))
            .field("pdu_len", &self.pdu_len)
            .finish()
    }
}
