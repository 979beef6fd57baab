// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod rtu;
pub mod tcp;

use std::{
    borrow::Cow,
    error,
    fmt::{self, Display},
};

use crate::Slave;

/// A Modbus function code.
///
/// The function codes handled by this crate. Any other value is
/// carried as [`FunctionCode::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 01 (0x01) Read Coils.
    ReadCoils,

    /// 02 (0x02) Read Discrete Inputs
    ReadDiscreteInputs,

    /// 03 (0x03) Read Holding Registers
    ReadHoldingRegisters,

    /// 04 (0x04) Read Input Registers
    ReadInputRegisters,

    /// 05 (0x05) Write Single Coil
    WriteSingleCoil,

    /// 06 (0x06) Write Single Register
    WriteSingleRegister,

    /// 15 (0x0F) Write Multiple Coils
    WriteMultipleCoils,

    /// 16 (0x10) Write Multiple Registers
    WriteMultipleRegisters,

    /// 17 (0x11) Report Slave ID
    ReportSlaveId,

    /// 22 (0x16) Mask Write Register
    MaskWriteRegister,

    /// 23 (0x17) Read/Write Multiple Registers
    ReadWriteMultipleRegisters,

    /// Any other function code.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x11 => Self::ReportSlaveId,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::ReadWriteMultipleRegisters,
            code => Self::Custom(code),
        }
    }

    /// Gets the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportSlaveId => 0x11,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
            Self::Custom(code) => code,
        }
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* of the data model uses 1-based indexing unless
/// PDU addressing is enabled.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items.
///
/// Transmitted using a big-endian representation.
pub type Word = u16;

/// Number of items to process.
pub type Quantity = u16;

/// Maximum number of coils or discrete inputs per read request.
pub const MAX_READ_BITS: Quantity = 2000;

/// Maximum number of registers per read request.
pub const MAX_READ_REGISTERS: Quantity = 125;

/// Maximum number of coils per write request.
pub const MAX_WRITE_BITS: Quantity = 1968;

/// Maximum number of registers per write request.
pub const MAX_WRITE_REGISTERS: Quantity = 123;

/// Maximum number of registers written by a read/write request.
pub const MAX_READ_WRITE_REGISTERS: Quantity = 121;

/// A request of a client, i.e. the PDU without framing.
///
/// Addresses are protocol addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// 0x01: start address and number of coils.
    ReadCoils(Address, Quantity),
    /// 0x02: start address and number of inputs.
    ReadDiscreteInputs(Address, Quantity),
    /// 0x05
    WriteSingleCoil(Address, Coil),
    /// 0x0F: start address and the new states.
    WriteMultipleCoils(Address, Cow<'a, [Coil]>),
    /// 0x04: start address and number of registers.
    ReadInputRegisters(Address, Quantity),
    /// 0x03: start address and number of registers.
    ReadHoldingRegisters(Address, Quantity),
    /// 0x06
    WriteSingleRegister(Address, Word),
    /// 0x10: start address and the new values.
    WriteMultipleRegisters(Address, Cow<'a, [Word]>),
    /// 0x11
    ReportSlaveId,
    /// 0x16: address, AND mask and OR mask.
    ///
    /// The new value is `(current & and_mask) | (or_mask & !and_mask)`.
    MaskWriteRegister(Address, Word, Word),
    /// 0x17: read address, read quantity, write address and the new values.
    ///
    /// The write is performed before the read.
    ReadWriteMultipleRegisters(Address, Quantity, Address, Cow<'a, [Word]>),
    /// Any other function code with its raw data.
    Custom(u8, Cow<'a, [u8]>),
}

impl Request<'_> {
    /// Converts the request into an owned instance with `'static'` lifetime.
    #[must_use]
    pub fn into_owned(self) -> Request<'static> {
        use Request::*;

        match self {
            ReadCoils(addr, qty) => ReadCoils(addr, qty),
            ReadDiscreteInputs(addr, qty) => ReadDiscreteInputs(addr, qty),
            WriteSingleCoil(addr, coil) => WriteSingleCoil(addr, coil),
            WriteMultipleCoils(addr, coils) => {
                WriteMultipleCoils(addr, Cow::Owned(coils.into_owned()))
            }
            ReadInputRegisters(addr, qty) => ReadInputRegisters(addr, qty),
            ReadHoldingRegisters(addr, qty) => ReadHoldingRegisters(addr, qty),
            WriteSingleRegister(addr, word) => WriteSingleRegister(addr, word),
            WriteMultipleRegisters(addr, words) => {
                WriteMultipleRegisters(addr, Cow::Owned(words.into_owned()))
            }
            ReportSlaveId => ReportSlaveId,
            MaskWriteRegister(addr, and_mask, or_mask) => {
                MaskWriteRegister(addr, and_mask, or_mask)
            }
            ReadWriteMultipleRegisters(addr, qty, write_addr, words) => {
                ReadWriteMultipleRegisters(addr, qty, write_addr, Cow::Owned(words.into_owned()))
            }
            Custom(func, bytes) => Custom(func, Cow::Owned(bytes.into_owned())),
        }
    }

    /// Get the [`FunctionCode`] of the [`Request`].
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;

        match self {
            ReadCoils(_, _) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_, _) => FunctionCode::ReadDiscreteInputs,

            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,

            ReadInputRegisters(_, _) => FunctionCode::ReadInputRegisters,
            ReadHoldingRegisters(_, _) => FunctionCode::ReadHoldingRegisters,

            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,

            ReportSlaveId => FunctionCode::ReportSlaveId,

            MaskWriteRegister(_, _, _) => FunctionCode::MaskWriteRegister,

            ReadWriteMultipleRegisters(_, _, _, _) => FunctionCode::ReadWriteMultipleRegisters,

            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }

    /// The request only modifies data and may be broadcast.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        use Request::*;

        matches!(
            self,
            WriteSingleCoil(_, _)
                | WriteMultipleCoils(_, _)
                | WriteSingleRegister(_, _)
                | WriteMultipleRegisters(_, _)
                | MaskWriteRegister(_, _, _)
        )
    }

    /// The response a server sends to an accepted write request.
    ///
    /// Returns `None` for requests that read data.
    #[must_use]
    pub fn write_response(&self) -> Option<Response> {
        use Request::*;

        let response = match self {
            WriteSingleCoil(addr, coil) => Response::WriteSingleCoil(*addr, *coil),
            WriteMultipleCoils(addr, coils) => {
                Response::WriteMultipleCoils(*addr, u16::try_from(coils.len()).ok()?)
            }
            WriteSingleRegister(addr, word) => Response::WriteSingleRegister(*addr, *word),
            WriteMultipleRegisters(addr, words) => {
                Response::WriteMultipleRegisters(*addr, u16::try_from(words.len()).ok()?)
            }
            MaskWriteRegister(addr, and_mask, or_mask) => {
                Response::MaskWriteRegister(*addr, *and_mask, *or_mask)
            }
            _ => return None,
        };
        Some(response)
    }
}

/// The payload of a report slave ID response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveReport {
    /// Unit specific identifier.
    pub id: u8,
    /// Run indicator status, encoded as `0xFF` (on) or `0x00` (off).
    pub run_indication: bool,
    /// Additional device specific data.
    pub data: Vec<u8>,
}

impl SlaveReport {
    #[must_use]
    pub fn new(id: u8) -> Self {
        Self {
            id,
            run_indication: true,
            data: Vec::new(),
        }
    }
}

impl From<SlaveReport> for Vec<u8> {
    fn from(from: SlaveReport) -> Self {
        let SlaveReport {
            id,
            run_indication,
            data,
        } = from;
        let mut bytes = Vec::with_capacity(2 + data.len());
        bytes.push(id);
        bytes.push(if run_indication { 0xFF } else { 0x00 });
        bytes.extend(data);
        bytes
    }
}

/// The data of a successful request.
///
/// The client truncates decoded bit responses to the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Coil states, padded to whole bytes when decoded.
    ReadCoils(Vec<Coil>),
    /// Input states, padded to whole bytes when decoded.
    ReadDiscreteInputs(Vec<Coil>),
    /// Echo of the request.
    WriteSingleCoil(Address, Coil),
    /// Start address and number of coils written.
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Vec<Word>),
    ReadHoldingRegisters(Vec<Word>),
    /// Echo of the request.
    WriteSingleRegister(Address, Word),
    /// Start address and number of registers written.
    WriteMultipleRegisters(Address, Quantity),
    ReportSlaveId(SlaveReport),
    /// Echo of the request.
    MaskWriteRegister(Address, Word, Word),
    /// The registers read after the write.
    ReadWriteMultipleRegisters(Vec<Word>),
}

impl Response {
    /// Get the [`FunctionCode`] of the [`Response`].
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;

        match self {
            ReadCoils(_) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,

            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,

            ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,

            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,

            ReportSlaveId(_) => FunctionCode::ReportSlaveId,

            MaskWriteRegister(_, _, _) => FunctionCode::MaskWriteRegister,

            ReadWriteMultipleRegisters(_) => FunctionCode::ReadWriteMultipleRegisters,
        }
    }
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    ServerDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    ServerDeviceBusy,
    /// 0x07
    NegativeAcknowledge,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B
    GatewayTargetDevice,
    /// None of the above.
    ///
    /// Although encoding one of the predefined values as this is possible, it is not recommended.
    /// Instead, prefer to use [`Self::new()`] to prevent such ambiguities.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use crate::frame::ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            NegativeAcknowledge => 0x07,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl ExceptionCode {
    /// Create a new [`ExceptionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        use crate::frame::ExceptionCode::*;

        match value {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x07 => NegativeAcknowledge,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            other => Custom(other),
        }
    }

    pub(crate) fn description(&self) -> &str {
        use crate::frame::ExceptionCode::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            NegativeAcknowledge => "Negative acknowledge",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {
    fn description(&self) -> &str {
        self.description()
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {
    fn description(&self) -> &str {
        self.exception.description()
    }
}

/// The two framing variants of an ADU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    /// Serial line: unit id, PDU and CRC-16.
    Rtu,
    /// MBAP header and PDU.
    Tcp,
}

impl Framing {
    /// Offset of the PDU within the ADU.
    #[must_use]
    pub const fn header_len(self) -> usize {
        match self {
            Self::Rtu => rtu::HEADER_LEN,
            Self::Tcp => tcp::HEADER_LEN,
        }
    }

    /// Number of trailing checksum bytes.
    #[must_use]
    pub const fn checksum_len(self) -> usize {
        match self {
            Self::Rtu => rtu::CRC_LEN,
            Self::Tcp => 0,
        }
    }

    #[must_use]
    pub const fn max_adu_len(self) -> usize {
        match self {
            Self::Rtu => rtu::MAX_ADU_LEN,
            Self::Tcp => tcp::MAX_ADU_LEN,
        }
    }
}

impl Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtu => f.write_str("RTU"),
            Self::Tcp => f.write_str("TCP"),
        }
    }
}

/// The addressing part of an ADU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    Rtu(rtu::Header),
    Tcp(tcp::Header),
}

impl Header {
    #[must_use]
    pub const fn rtu(slave: Slave) -> Self {
        Self::Rtu(rtu::Header { slave })
    }

    #[must_use]
    pub const fn tcp(transaction_id: tcp::TransactionId, slave: Slave) -> Self {
        Self::Tcp(tcp::Header {
            transaction_id,
            unit_id: slave.0,
        })
    }

    #[must_use]
    pub const fn framing(&self) -> Framing {
        match self {
            Self::Rtu(_) => Framing::Rtu,
            Self::Tcp(_) => Framing::Tcp,
        }
    }

    #[must_use]
    pub const fn slave(&self) -> Slave {
        match self {
            Self::Rtu(hdr) => hdr.slave,
            Self::Tcp(hdr) => Slave(hdr.unit_id),
        }
    }
}

/// Check that `req_hdr` is the same `Header` as `rsp_hdr`.
///
/// # Errors
///
/// If the 2 headers are different, an error message with the details will be returned.
pub(crate) fn verify_response_header<H: Eq + std::fmt::Debug>(
    req_hdr: &H,
    rsp_hdr: &H,
) -> Result<(), String> {
    if req_hdr != rsp_hdr {
        return Err(format!(
            "expected/request = {req_hdr:?}, actual/response = {rsp_hdr:?}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_values() {
        for value in 0..=u8::MAX {
            assert_eq!(FunctionCode::new(value).value(), value);
        }
        assert_eq!(FunctionCode::new(0x17), FunctionCode::ReadWriteMultipleRegisters);
        assert_eq!(FunctionCode::new(0x46), FunctionCode::Custom(0x46));
    }

    #[test]
    fn function_code_from_request() {
        use Request::*;

        assert_eq!(ReadCoils(0, 0).function_code(), FunctionCode::ReadCoils);
        assert_eq!(
            WriteMultipleCoils(0, Cow::Borrowed(&[])).function_code(),
            FunctionCode::WriteMultipleCoils
        );
        assert_eq!(
            ReportSlaveId.function_code(),
            FunctionCode::ReportSlaveId
        );
        assert_eq!(
            ReadWriteMultipleRegisters(0, 0, 0, Cow::Borrowed(&[])).function_code(),
            FunctionCode::ReadWriteMultipleRegisters
        );
        assert_eq!(Custom(88, Cow::Borrowed(&[])).function_code().value(), 88);
    }

    #[test]
    fn function_code_from_response() {
        use Response::*;

        assert_eq!(ReadCoils(vec![]).function_code(), FunctionCode::ReadCoils);
        assert_eq!(
            WriteMultipleRegisters(0, 0).function_code(),
            FunctionCode::WriteMultipleRegisters
        );
        assert_eq!(
            ReportSlaveId(SlaveReport::new(1)).function_code(),
            FunctionCode::ReportSlaveId
        );
        assert_eq!(
            MaskWriteRegister(0, 0, 0).function_code(),
            FunctionCode::MaskWriteRegister
        );
    }

    #[test]
    fn exception_codes() {
        for value in [1, 2, 3, 4, 5, 6, 7, 8, 0x0A, 0x0B, 0x42] {
            assert_eq!(u8::from(ExceptionCode::new(value)), value);
        }
        assert_eq!(ExceptionCode::new(7), ExceptionCode::NegativeAcknowledge);
        assert_eq!(ExceptionCode::new(9), ExceptionCode::Custom(9));
        assert_eq!(
            ExceptionResponse {
                function: FunctionCode::ReadHoldingRegisters,
                exception: ExceptionCode::IllegalDataAddress,
            }
            .to_string(),
            "Modbus function 3: Illegal data address"
        );
    }

    #[test]
    fn write_requests() {
        use Request::*;

        assert!(WriteSingleCoil(4, true).is_write());
        assert!(MaskWriteRegister(0, 0xF2, 0x25).is_write());
        assert!(!ReadCoils(0, 1).is_write());
        assert!(!ReadWriteMultipleRegisters(0, 1, 0, Cow::Borrowed(&[1])).is_write());

        assert_eq!(
            WriteMultipleRegisters(7, Cow::Borrowed(&[1, 2, 3])).write_response(),
            Some(Response::WriteMultipleRegisters(7, 3))
        );
        assert_eq!(
            WriteSingleCoil(4, true).write_response(),
            Some(Response::WriteSingleCoil(4, true))
        );
        assert_eq!(ReadHoldingRegisters(0, 1).write_response(), None);
    }

    #[test]
    fn slave_report_bytes() {
        let report = SlaveReport {
            id: 0x21,
            run_indication: false,
            data: vec![0xAB, 0xCD],
        };
        assert_eq!(Vec::<u8>::from(report), vec![0x21, 0x00, 0xAB, 0xCD]);
        assert_eq!(
            Vec::<u8>::from(SlaveReport::new(9)),
            vec![0x09, 0xFF]
        );
    }

    #[test]
    fn headers() {
        let hdr = Header::tcp(0x0014, Slave(10));
        assert_eq!(hdr.framing(), Framing::Tcp);
        assert_eq!(hdr.slave(), Slave(10));
        assert_eq!(Header::rtu(Slave(33)).slave(), Slave(33));
        assert_eq!(Framing::Rtu.header_len(), 1);
        assert_eq!(Framing::Tcp.header_len(), 7);
        assert_eq!(Framing::Rtu.max_adu_len(), 256);
        assert_eq!(Framing::Tcp.max_adu_len(), 260);
    }
}
