// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::Slave;

/// Length of the unit id that precedes the PDU.
pub const HEADER_LEN: usize = 1;

/// Length of the trailing CRC-16.
pub const CRC_LEN: usize = 2;

/// Maximum length of an RTU frame, CRC included.
pub const MAX_ADU_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub slave: Slave,
}
