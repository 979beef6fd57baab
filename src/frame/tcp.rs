// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub type TransactionId = u16;
pub type UnitId = u8;

/// Length of the MBAP header, unit id included.
pub const HEADER_LEN: usize = 7;

/// Maximum length of a TCP frame.
pub const MAX_ADU_LEN: usize = 260;

/// The protocol identifier is always `0` for _Modbus_.
pub const PROTOCOL_ID: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub transaction_id: TransactionId,
    pub unit_id: UnitId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{verify_response_header, Framing};

    #[test]
    fn frame_limits() {
        assert_eq!(Framing::Tcp.header_len(), HEADER_LEN);
        assert_eq!(Framing::Tcp.checksum_len(), 0);
        assert_eq!(Framing::Tcp.max_adu_len(), MAX_ADU_LEN);
    }

    #[test]
    fn response_matches_transaction_and_unit() {
        let request = Header {
            transaction_id: 0x0014,
            unit_id: 10,
        };
        assert!(verify_response_header(&request, &request).is_ok());
        for response in [
            Header {
                transaction_id: 0x0015,
                ..request
            },
            Header {
                unit_id: 11,
                ..request
            },
        ] {
            assert!(verify_response_header(&request, &response).is_err());
        }
    }
}
