// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;

use byteorder::{BigEndian, ByteOrder as _};
use bytes::BytesMut;

use crate::{
    frame::{
        rtu::{CRC_LEN, HEADER_LEN, MAX_ADU_LEN},
        Framing,
    },
    message::{Message, Role},
    ProtocolError,
};

// unit id + function code + crc
pub(crate) const MIN_ADU_LEN: usize = HEADER_LEN + 1 + CRC_LEN;

/// Number of bytes between function code and CRC, once known.
fn payload_len(buf: &[u8], role: Role) -> io::Result<Option<usize>> {
    let Some(&function) = buf.get(1) else {
        return Ok(None);
    };
    // Fixed part plus the byte count found at `offset`
    let counted = |offset: usize, fixed: usize| {
        buf.get(offset)
            .map(|byte_count| fixed + usize::from(*byte_count))
    };
    let len = match (role, function) {
        (Role::Request, 0x01..=0x06) => Some(4),
        (Role::Request, 0x07 | 0x0B | 0x0C | 0x11) => Some(0),
        (Role::Request, 0x0F | 0x10) => counted(6, 5),
        (Role::Request, 0x16) => Some(6),
        (Role::Request, 0x17) => counted(10, 9),
        (Role::Request, 0x18) => Some(2),
        (Role::Response, 0x01..=0x04 | 0x0C | 0x11 | 0x17) => counted(2, 1),
        (Role::Response, 0x05 | 0x06 | 0x0B | 0x0F | 0x10) => Some(4),
        (Role::Response, 0x07) => Some(1),
        (Role::Response, 0x16) => Some(6),
        (Role::Response, 0x18) => buf
            .get(2..4)
            .map(|byte_count| 2 + usize::from(BigEndian::read_u16(byte_count))),
        (Role::Response, 0x81..=0xAB) => Some(1),
        (role, function) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown length of {role:?} 0x{function:02X}"),
            ));
        }
    };
    Ok(len)
}

/// CRC-16 (polynomial 0xA001, initial value 0xFFFF).
///
/// The result is byte-swapped, i.e. writing it in network byte order
/// puts the low byte of the checksum first on the wire.
pub(crate) fn calc_crc(data: &[u8]) -> u16 {
    let crc = data.iter().fold(0xFFFF_u16, |crc, byte| {
        (0..8).fold(crc ^ u16::from(*byte), |crc, _| {
            (crc >> 1) ^ (0xA001 * (crc & 0x0001))
        })
    });
    crc.swap_bytes()
}

fn check_crc(adu: &[u8]) -> Result<(), ProtocolError> {
    let (data, crc) = adu.split_at(adu.len() - CRC_LEN);
    let expected = calc_crc(data);
    let actual = u16::from_be_bytes([crc[0], crc[1]]);
    if expected != actual {
        return Err(ProtocolError::Crc { expected, actual });
    }
    Ok(())
}

fn adu_len(buf: &[u8], role: Role) -> io::Result<Option<usize>> {
    Ok(payload_len(buf, role)?.map(|len| HEADER_LEN + 1 + len + CRC_LEN))
}

/// Splits the next RTU frame off `buf`.
///
/// A frame with an invalid checksum is consumed and reported as an
/// error, so the caller may continue with the remaining bytes.
pub(crate) fn decode(buf: &mut BytesMut, role: Role) -> Result<Option<Message>, crate::Error> {
    let adu_len = match adu_len(buf, role) {
        Ok(Some(adu_len)) => adu_len,
        Ok(None) => return Ok(None),
        Err(err) => {
            // The length of an unknown function is unknown. Accept
            // everything that has arrived so far once it carries a
            // valid checksum.
            if buf.len() > MAX_ADU_LEN {
                buf.clear();
                return Err(ProtocolError::Framing(err.to_string()).into());
            }
            if buf.len() < MIN_ADU_LEN || check_crc(buf).is_err() {
                return Ok(None);
            }
            buf.len()
        }
    };
    if adu_len > MAX_ADU_LEN {
        buf.clear();
        return Err(ProtocolError::Framing(format!(
            "RTU frame length {adu_len} exceeds {MAX_ADU_LEN}"
        ))
        .into());
    }
    if buf.len() < adu_len {
        // incomplete frame
        return Ok(None);
    }
    let adu = buf.split_to(adu_len);
    check_crc(&adu)?;
    let pdu_len = adu_len - HEADER_LEN - CRC_LEN;
    Ok(Some(Message::from_adu(Framing::Rtu, role, adu, pdu_len)))
}
