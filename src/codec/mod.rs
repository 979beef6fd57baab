// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU encoding and frame splitting

use std::io;

use byteorder::{BigEndian, ByteOrder as _};
use bytes::{BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    frame::{
        Coil, ExceptionCode, ExceptionResponse, Framing, FunctionCode, Quantity, Request,
        Response, ResponsePdu, SlaveReport, Word,
    },
    message::{Message, Role},
};

pub(crate) mod rtu;
pub(crate) mod tcp;

/// Maximum request/response PDU size.
///
/// As defined by the protocol for both RTU and TCP.
pub(crate) const MAX_PDU_SIZE: usize = 253;

// Lengths are bounded by the PDU size checks before encoding.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn u16_len(len: usize) -> u16 {
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
fn u8_len(len: usize) -> u8 {
    debug_assert!(len <= u8::MAX.into());
    len as u8
}

fn put_words(buf: &mut BytesMut, words: &[Word]) {
    buf.put_u8(u8_len(words.len() * 2));
    for word in words {
        buf.put_u16(*word);
    }
}

fn put_coils(buf: &mut BytesMut, coils: &[Coil]) {
    let len = packed_coils_size(coils);
    buf.put_u8(u8_len(len));
    let offset = buf.len();
    buf.resize(offset + len, 0);
    for (i, coil) in coils.iter().enumerate() {
        buf[offset + i / 8] |= u8::from(*coil) << (i % 8);
    }
}

const fn coil_value(coil: Coil) -> u16 {
    if coil {
        0xFF00
    } else {
        0x0000
    }
}

pub(crate) fn encode_request_pdu(buf: &mut BytesMut, request: &Request<'_>) {
    use crate::frame::Request::*;

    buf.put_u8(request.function_code().value());
    match request {
        ReadCoils(addr, cnt)
        | ReadDiscreteInputs(addr, cnt)
        | ReadInputRegisters(addr, cnt)
        | ReadHoldingRegisters(addr, cnt) => {
            buf.put_u16(*addr);
            buf.put_u16(*cnt);
        }
        WriteSingleCoil(addr, coil) => {
            buf.put_u16(*addr);
            buf.put_u16(coil_value(*coil));
        }
        WriteSingleRegister(addr, word) => {
            buf.put_u16(*addr);
            buf.put_u16(*word);
        }
        WriteMultipleCoils(addr, coils) => {
            buf.put_u16(*addr);
            buf.put_u16(u16_len(coils.len()));
            put_coils(buf, coils);
        }
        WriteMultipleRegisters(addr, words) => {
            buf.put_u16(*addr);
            buf.put_u16(u16_len(words.len()));
            put_words(buf, words);
        }
        MaskWriteRegister(addr, and_mask, or_mask) => {
            buf.put_u16(*addr);
            buf.put_u16(*and_mask);
            buf.put_u16(*or_mask);
        }
        ReadWriteMultipleRegisters(read_addr, cnt, write_addr, words) => {
            buf.put_u16(*read_addr);
            buf.put_u16(*cnt);
            buf.put_u16(*write_addr);
            buf.put_u16(u16_len(words.len()));
            put_words(buf, words);
        }
        ReportSlaveId => {}
        Custom(_, data) => buf.put_slice(data),
    }
}

pub(crate) fn encode_response_result_pdu(
    buf: &mut BytesMut,
    result: &Result<Response, ExceptionResponse>,
) {
    use crate::frame::Response::*;

    let response = match result {
        Ok(response) => response,
        Err(ExceptionResponse {
            function,
            exception,
        }) => {
            debug_assert!(function.value() < 0x80);
            buf.put_u8(function.value() | 0x80);
            buf.put_u8((*exception).into());
            return;
        }
    };
    buf.put_u8(response.function_code().value());
    match response {
        ReadCoils(coils) | ReadDiscreteInputs(coils) => put_coils(buf, coils),
        ReadInputRegisters(words)
        | ReadHoldingRegisters(words)
        | ReadWriteMultipleRegisters(words) => put_words(buf, words),
        WriteSingleCoil(addr, coil) => {
            buf.put_u16(*addr);
            buf.put_u16(coil_value(*coil));
        }
        WriteSingleRegister(addr, word) => {
            buf.put_u16(*addr);
            buf.put_u16(*word);
        }
        WriteMultipleCoils(addr, cnt) | WriteMultipleRegisters(addr, cnt) => {
            buf.put_u16(*addr);
            buf.put_u16(*cnt);
        }
        MaskWriteRegister(addr, and_mask, or_mask) => {
            buf.put_u16(*addr);
            buf.put_u16(*and_mask);
            buf.put_u16(*or_mask);
        }
        ReportSlaveId(report) => {
            buf.put_u8(2 + u8_len(report.data.len()));
            buf.put_u8(report.id);
            buf.put_u8(if report.run_indication { 0xFF } else { 0x00 });
            buf.put_slice(&report.data);
        }
    }
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Big-endian fields of a PDU, consumed front to back.
struct PduReader<'a> {
    pdu: &'a [u8],
}

impl<'a> PduReader<'a> {
    fn new(pdu: &'a [u8]) -> io::Result<Self> {
        if pdu.len() > MAX_PDU_SIZE {
            return Err(invalid_data(format!(
                "PDU of {} bytes exceeds {MAX_PDU_SIZE} bytes",
                pdu.len()
            )));
        }
        Ok(Self { pdu })
    }

    fn bytes(&mut self, len: usize) -> io::Result<&'a [u8]> {
        if self.pdu.len() < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated PDU",
            ));
        }
        let (head, tail) = self.pdu.split_at(len);
        self.pdu = tail;
        Ok(head)
    }

    fn u8(&mut self) -> io::Result<u8> {
        self.bytes(1).map(|bytes| bytes[0])
    }

    fn u16(&mut self) -> io::Result<u16> {
        self.bytes(2).map(BigEndian::read_u16)
    }

    fn coil(&mut self) -> io::Result<Coil> {
        match self.u16()? {
            0xFF00 => Ok(true),
            0x0000 => Ok(false),
            value => Err(invalid_data(format!("invalid coil value: 0x{value:04X}"))),
        }
    }

    /// Words preceded by their byte count.
    fn words(&mut self, cnt: Option<Quantity>) -> io::Result<Vec<Word>> {
        let byte_count = usize::from(self.u8()?);
        if byte_count % 2 != 0 || cnt.is_some_and(|cnt| usize::from(cnt) * 2 != byte_count) {
            return Err(invalid_data(format!("invalid byte count: {byte_count}")));
        }
        let bytes = self.bytes(byte_count)?;
        Ok(bytes.chunks_exact(2).map(BigEndian::read_u16).collect())
    }

    /// Packed bits preceded by their byte count.
    ///
    /// Without a quantity all bits of the last byte are returned.
    fn coils(&mut self, cnt: Option<Quantity>) -> io::Result<Vec<Coil>> {
        let byte_count = usize::from(self.u8()?);
        let cnt = match cnt {
            Some(cnt) if usize::from(cnt).div_ceil(8) != byte_count => {
                return Err(invalid_data(format!("invalid byte count: {byte_count}")));
            }
            Some(cnt) => usize::from(cnt),
            None => byte_count * 8,
        };
        let bytes = self.bytes(byte_count)?;
        Ok((0..cnt).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect())
    }

    fn finish<T>(self, value: T) -> io::Result<T> {
        if !self.pdu.is_empty() {
            return Err(invalid_data(format!(
                "{} undecoded trailing bytes",
                self.pdu.len()
            )));
        }
        Ok(value)
    }
}

impl TryFrom<Bytes> for Request<'static> {
    type Error = io::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        use crate::frame::Request::*;

        let mut pdu = PduReader::new(&bytes)?;
        let request = match pdu.u8()? {
            0x01 => ReadCoils(pdu.u16()?, pdu.u16()?),
            0x02 => ReadDiscreteInputs(pdu.u16()?, pdu.u16()?),
            0x03 => ReadHoldingRegisters(pdu.u16()?, pdu.u16()?),
            0x04 => ReadInputRegisters(pdu.u16()?, pdu.u16()?),
            0x05 => WriteSingleCoil(pdu.u16()?, pdu.coil()?),
            0x06 => WriteSingleRegister(pdu.u16()?, pdu.u16()?),
            0x0F => {
                let addr = pdu.u16()?;
                let cnt = pdu.u16()?;
                WriteMultipleCoils(addr, pdu.coils(Some(cnt))?.into())
            }
            0x10 => {
                let addr = pdu.u16()?;
                let cnt = pdu.u16()?;
                WriteMultipleRegisters(addr, pdu.words(Some(cnt))?.into())
            }
            0x11 => ReportSlaveId,
            0x16 => MaskWriteRegister(pdu.u16()?, pdu.u16()?, pdu.u16()?),
            0x17 => {
                let read_addr = pdu.u16()?;
                let read_cnt = pdu.u16()?;
                let write_addr = pdu.u16()?;
                let write_cnt = pdu.u16()?;
                let words = pdu.words(Some(write_cnt))?;
                ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, words.into())
            }
            function if function < 0x80 => {
                let data = pdu.bytes(bytes.len() - 1)?;
                Custom(function, data.to_vec().into())
            }
            function => {
                return Err(invalid_data(format!(
                    "invalid function code: 0x{function:02X}"
                )));
            }
        };
        pdu.finish(request)
    }
}

impl TryFrom<Bytes> for Response {
    type Error = io::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        use crate::frame::Response::*;

        let mut pdu = PduReader::new(&bytes)?;
        let response = match pdu.u8()? {
            0x01 => ReadCoils(pdu.coils(None)?),
            0x02 => ReadDiscreteInputs(pdu.coils(None)?),
            0x03 => ReadHoldingRegisters(pdu.words(None)?),
            0x04 => ReadInputRegisters(pdu.words(None)?),
            0x05 => WriteSingleCoil(pdu.u16()?, pdu.coil()?),
            0x06 => WriteSingleRegister(pdu.u16()?, pdu.u16()?),
            0x0F => WriteMultipleCoils(pdu.u16()?, pdu.u16()?),
            0x10 => WriteMultipleRegisters(pdu.u16()?, pdu.u16()?),
            0x11 => {
                let byte_count = usize::from(pdu.u8()?);
                if byte_count < 2 {
                    return Err(invalid_data("report without run indicator"));
                }
                let id = pdu.u8()?;
                let run_indication = match pdu.u8()? {
                    0x00 => false,
                    0xFF => true,
                    status => {
                        return Err(invalid_data(format!(
                            "invalid run indicator status: 0x{status:02X}"
                        )));
                    }
                };
                let data = pdu.bytes(byte_count - 2)?.to_vec();
                ReportSlaveId(SlaveReport {
                    id,
                    run_indication,
                    data,
                })
            }
            0x16 => MaskWriteRegister(pdu.u16()?, pdu.u16()?, pdu.u16()?),
            0x17 => ReadWriteMultipleRegisters(pdu.words(None)?),
            function => {
                return Err(invalid_data(format!(
                    "unsupported function code: 0x{function:02X}"
                )));
            }
        };
        pdu.finish(response)
    }
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = io::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let mut pdu = PduReader::new(&bytes)?;
        let function = pdu.u8()?;
        if function < 0x80 {
            return Err(invalid_data(format!(
                "not an exception: 0x{function:02X}"
            )));
        }
        let exception = ExceptionCode::new(pdu.u8()?);
        pdu.finish(ExceptionResponse {
            function: FunctionCode::new(function & 0x7F),
            exception,
        })
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = io::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        match bytes.first() {
            Some(function) if *function >= 0x80 => ExceptionResponse::try_from(bytes).map(Into::into),
            _ => Response::try_from(bytes).map(Into::into),
        }
    }
}

fn packed_coils_size(coils: &[Coil]) -> usize {
    coils.len().div_ceil(8)
}

pub(crate) fn request_pdu_size(req: &Request<'_>) -> io::Result<usize> {
    use crate::frame::Request::*;
    let size = match req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadInputRegisters(_, _)
        | ReadHoldingRegisters(_, _)
        | WriteSingleRegister(_, _)
        | WriteSingleCoil(_, _) => 5,
        WriteMultipleCoils(_, coils) => 6 + packed_coils_size(coils),
        WriteMultipleRegisters(_, data) => 6 + data.len() * 2,
        ReportSlaveId => 1,
        MaskWriteRegister(_, _, _) => 7,
        ReadWriteMultipleRegisters(_, _, _, data) => 10 + data.len() * 2,
        Custom(_, data) => 1 + data.len(),
    };
    if size > MAX_PDU_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "request PDU size exceeded",
        ));
    }
    Ok(size)
}

pub(crate) fn response_result_pdu_size(
    result: &Result<Response, ExceptionResponse>,
) -> io::Result<usize> {
    use crate::frame::Response::*;
    let size = match result {
        Ok(ReadCoils(coils) | ReadDiscreteInputs(coils)) => 2 + packed_coils_size(coils),
        Ok(
            WriteSingleCoil(_, _)
            | WriteMultipleCoils(_, _)
            | WriteMultipleRegisters(_, _)
            | WriteSingleRegister(_, _),
        ) => 5,
        Ok(
            ReadInputRegisters(data) | ReadHoldingRegisters(data) | ReadWriteMultipleRegisters(data),
        ) => 2 + data.len() * 2,
        Ok(ReportSlaveId(report)) => 4 + report.data.len(),
        Ok(MaskWriteRegister(_, _, _)) => 7,
        Err(_) => 2,
    };
    if size > MAX_PDU_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "response PDU size exceeded",
        ));
    }
    Ok(size)
}

/// Splits [`Message`]s from a byte stream and writes them back.
///
/// A client decodes responses, a server decodes requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    framing: Framing,
    role: Role,
}

impl FrameCodec {
    #[must_use]
    pub const fn client(framing: Framing) -> Self {
        Self {
            framing,
            role: Role::Response,
        }
    }

    #[must_use]
    pub const fn server(framing: Framing) -> Self {
        Self {
            framing,
            role: Role::Request,
        }
    }

    #[must_use]
    pub const fn framing(&self) -> Framing {
        self.framing
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = crate::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, crate::Error> {
        match self.framing {
            Framing::Rtu => rtu::decode(buf, self.role),
            Framing::Tcp => tcp::decode(buf, self.role),
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, mut message: Message, buf: &mut BytesMut) -> Result<(), crate::Error> {
        debug_assert_eq!(message.framing(), self.framing);
        message.prepare_to_send();
        buf.extend_from_slice(message.adu());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    fn request_pdu(request: &Request<'_>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_request_pdu(&mut buf, request);
        assert_eq!(buf.len(), request_pdu_size(request).unwrap());
        buf.to_vec()
    }

    fn response_pdu(result: &Result<Response, ExceptionResponse>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_response_result_pdu(&mut buf, result);
        assert_eq!(buf.len(), response_result_pdu_size(result).unwrap());
        buf.to_vec()
    }

    fn decode_request(pdu: &[u8]) -> io::Result<Request<'static>> {
        Request::try_from(Bytes::copy_from_slice(pdu))
    }

    fn decode_response(pdu: &[u8]) -> io::Result<Result<Response, ExceptionResponse>> {
        ResponsePdu::try_from(Bytes::copy_from_slice(pdu)).map(Into::into)
    }

    #[test]
    fn requests_on_the_wire() {
        let coils = [true, false, true, true];
        let words = [0xABCD, 0xEF12];
        let requests: [(Request<'_>, &[u8]); 8] = [
            (
                Request::ReadHoldingRegisters(0, 2),
                &[0x03, 0x00, 0x00, 0x00, 0x02],
            ),
            (
                Request::WriteSingleCoil(4, true),
                &[0x05, 0x00, 0x04, 0xFF, 0x00],
            ),
            (
                Request::WriteMultipleCoils(0x3311, Cow::Borrowed(&coils)),
                &[0x0F, 0x33, 0x11, 0x00, 0x04, 0x01, 0b_0000_1101],
            ),
            (
                Request::WriteMultipleRegisters(6, Cow::Borrowed(&words)),
                &[0x10, 0x00, 0x06, 0x00, 0x02, 0x04, 0xAB, 0xCD, 0xEF, 0x12],
            ),
            (Request::ReportSlaveId, &[0x11]),
            (
                Request::MaskWriteRegister(4, 0x00F2, 0x0025),
                &[0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25],
            ),
            (
                Request::ReadWriteMultipleRegisters(5, 51, 3, Cow::Borrowed(&words)),
                &[
                    0x17, 0x00, 0x05, 0x00, 0x33, 0x00, 0x03, 0x00, 0x02, 0x04, 0xAB, 0xCD, 0xEF,
                    0x12,
                ],
            ),
            (
                Request::Custom(0x41, Cow::Borrowed(&[0x02, 0x03])),
                &[0x41, 0x02, 0x03],
            ),
        ];
        for (request, pdu) in requests {
            assert_eq!(request_pdu(&request), pdu, "{request:?}");
            assert_eq!(decode_request(pdu).unwrap(), request);
        }
    }

    #[test]
    fn responses_on_the_wire() {
        assert_eq!(
            response_pdu(&Ok(Response::ReadHoldingRegisters(vec![0x1234, 0x5678]))),
            [0x03, 0x04, 0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            response_pdu(&Ok(Response::ReadCoils(vec![true, false, false, true, false]))),
            [0x01, 0x01, 0b_0000_1001]
        );
        assert_eq!(
            response_pdu(&Ok(Response::ReportSlaveId(SlaveReport {
                id: 0x42,
                run_indication: true,
                data: vec![0x10, 0x20],
            }))),
            [0x11, 0x04, 0x42, 0xFF, 0x10, 0x20]
        );
        assert_eq!(
            response_pdu(&Err(ExceptionResponse {
                function: FunctionCode::ReadHoldingRegisters,
                exception: ExceptionCode::IllegalDataAddress,
            })),
            [0x83, 0x02]
        );
    }

    #[test]
    fn decode_responses() {
        // Coils are padded to whole bytes
        assert_eq!(
            decode_response(&[0x02, 0x01, 0b_0000_1001]).unwrap(),
            Ok(Response::ReadDiscreteInputs(vec![
                true, false, false, true, false, false, false, false
            ]))
        );
        assert_eq!(
            decode_response(&[0x04, 0x06, 0xAA, 0x00, 0xCC, 0xBB, 0xEE, 0xDD]).unwrap(),
            Ok(Response::ReadInputRegisters(vec![0xAA00, 0xCCBB, 0xEEDD]))
        );
        assert_eq!(
            decode_response(&[0x06, 0x00, 0x01, 0x00, 0x02]).unwrap(),
            Ok(Response::WriteSingleRegister(1, 2))
        );
        assert_eq!(
            decode_response(&[0x83, 0x02]).unwrap(),
            Err(ExceptionResponse {
                function: FunctionCode::ReadHoldingRegisters,
                exception: ExceptionCode::IllegalDataAddress,
            })
        );
    }

    #[test]
    fn reject_malformed_requests() {
        for pdu in [
            &[][..],
            &[0x01],
            &[0x01, 0x00, 0x00, 0x22],
            // Trailing byte
            &[0x03, 0x00, 0x00, 0x00, 0x02, 0x00],
            &[0x05, 0x12, 0x34, 0x12, 0x00],
            // 4 coils in 2 bytes
            &[0x0F, 0x33, 0x11, 0x00, 0x04, 0x02, 0x0D, 0x00],
            // 100 coils in a single byte
            &[0x0F, 0x00, 0x00, 0x00, 0x64, 0x01, 0xFF],
            &[0x10, 0x00, 0x06, 0x00, 0x02, 0x05, 0xAB, 0xCD, 0xEF, 0x12],
            &[0x10, 0x00, 0x06, 0x80, 0x00, 0x00],
            &[0x83, 0x02],
        ] {
            assert!(decode_request(pdu).is_err(), "{pdu:02X?}");
        }
        assert!(decode_request(&[0x41; MAX_PDU_SIZE + 1]).is_err());
    }

    #[test]
    fn reject_malformed_responses() {
        for pdu in [
            &[0x03, 0x03, 0xAA, 0x00, 0xCC][..],
            &[0x03, 0x04, 0xAA, 0x00],
            &[0x11, 0x02, 0x42, 0x01],
            &[0x11, 0x01, 0x42],
            &[0x41, 0x00],
            &[0x83, 0x02, 0x00],
        ] {
            assert!(decode_response(pdu).is_err(), "{pdu:02X?}");
        }
        assert!(ExceptionResponse::try_from(Bytes::from_static(&[0x03, 0x02])).is_err());
    }

    #[test]
    fn pdu_size_limits() {
        let words = [0; 124];
        let request = Request::WriteMultipleRegisters(0, Cow::Borrowed(&words));
        assert!(request_pdu_size(&request).is_err());
        let request = Request::WriteMultipleRegisters(0, Cow::Borrowed(&words[..123]));
        assert_eq!(request_pdu_size(&request).unwrap(), 252);

        assert_eq!(
            response_result_pdu_size(&Ok(Response::ReadCoils(vec![true; 2000]))).unwrap(),
            252
        );
        assert_eq!(
            response_result_pdu_size(&Ok(Response::ReadHoldingRegisters(vec![0; 125]))).unwrap(),
            252
        );
        assert!(
            response_result_pdu_size(&Ok(Response::ReadHoldingRegisters(vec![0; 126]))).is_err()
        );
    }
}
