// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder as _};
use bytes::BytesMut;

use crate::{
    frame::{
        tcp::{HEADER_LEN, MAX_ADU_LEN, PROTOCOL_ID},
        Framing,
    },
    message::{Message, Role},
    ProtocolError,
};

// transaction id + protocol id + length
const PREFIX_LEN: usize = 6;

/// Splits the next MBAP frame off `buf`.
///
/// The byte stream cannot be resynchronized after an invalid header,
/// so all buffered bytes are dropped in that case.
pub(crate) fn decode(buf: &mut BytesMut, role: Role) -> Result<Option<Message>, crate::Error> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let protocol_id = BigEndian::read_u16(&buf[2..4]);
    if protocol_id != PROTOCOL_ID {
        buf.clear();
        return Err(ProtocolError::Framing(format!(
            "invalid protocol identifier: expected = {PROTOCOL_ID}, actual = {protocol_id}"
        ))
        .into());
    }
    let len = usize::from(BigEndian::read_u16(&buf[4..6]));
    if !(2..=MAX_ADU_LEN - PREFIX_LEN).contains(&len) {
        buf.clear();
        return Err(ProtocolError::Framing(format!("invalid MBAP length: {len}")).into());
    }
    let adu_len = PREFIX_LEN + len;
    if buf.len() < adu_len {
        return Ok(None);
    }
    let adu = buf.split_to(adu_len);
    // the unit id is counted by the length field
    let pdu_len = len - 1;
    Ok(Some(Message::from_adu(Framing::Tcp, role, adu, pdu_len)))
}
