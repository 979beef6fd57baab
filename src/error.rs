// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::io;

use thiserror::Error;

use crate::{
    frame::{ExceptionResponse, FunctionCode, Response},
    Slave,
};

/// _Modbus_ protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// _Modbus_ header mismatch between request and response.
    ///
    /// The received response belongs to a different transaction or
    /// was sent by a different unit.
    #[error("mismatching headers: {message} {result:?}")]
    HeaderMismatch {
        message: String,
        result: Result<Response, ExceptionResponse>,
    },

    /// The function codes of request and response do not match.
    #[error("mismatching function codes: {request} {result:?}")]
    FunctionCodeMismatch {
        request: FunctionCode,
        result: Result<Response, ExceptionResponse>,
    },

    /// The response to a write request does not echo the request.
    #[error("mismatching echo: expected {expected:?}, received {response:?}")]
    EchoMismatch { expected: Response, response: Response },

    /// An RTU frame arrived with an invalid checksum.
    #[error("invalid CRC: expected = 0x{expected:04X}, actual = 0x{actual:04X}")]
    Crc { expected: u16, actual: u16 },

    /// A frame could not be split from the byte stream or its PDU
    /// could not be decoded.
    #[error("invalid frame: {0}")]
    Framing(String),
}

/// Invalid arguments or settings, reported when building or opening
/// a component.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid serial settings: {0}")]
    SerialSettings(String),

    #[error("invalid connection: {0}")]
    Connection(String),

    #[error("invalid quantity {quantity} for function {function}")]
    Quantity {
        function: FunctionCode,
        quantity: usize,
    },

    /// A one-based data model address of `0`.
    #[error("invalid data address {0}")]
    Address(u16),

    #[error("slave {0} is already registered")]
    DuplicateSlave(Slave),

    #[error("slave {0} cannot be registered")]
    InvalidSlave(Slave),

    #[error("function {0} cannot be broadcast")]
    Broadcast(FunctionCode),

    #[error("unknown client: {0}")]
    UnknownClient(String),

    #[error("client {0} is already registered")]
    DuplicateClient(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// _Modbus_ error.
#[derive(Debug, Error)]
pub enum Error {
    /// _Modbus_ protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O error of the underlying socket or serial line.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// The response or byte timeout expired.
    #[error("timeout")]
    Timeout,

    /// Invalid arguments or settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// A frame was discarded by the decoder.
    #[must_use]
    pub const fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::Protocol(ProtocolError::Crc { .. } | ProtocolError::Framing(_))
        )
    }

    /// The link has to be re-established before it can be used again.
    #[must_use]
    pub const fn is_link_failure(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_)) || self.is_framing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_errors() {
        assert!(Error::Timeout.is_link_failure());
        assert!(!Error::Timeout.is_framing());

        let err = Error::from(ProtocolError::Crc {
            expected: 0x1234,
            actual: 0x4321,
        });
        assert!(err.is_framing());
        assert!(err.is_link_failure());
        assert_eq!(
            err.to_string(),
            "invalid CRC: expected = 0x1234, actual = 0x4321"
        );

        let err = Error::from(ConfigError::DuplicateSlave(Slave(3)));
        assert!(!err.is_link_failure());
        assert_eq!(err.to_string(), "slave 0x03 is already registered");
    }
}
