// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus clients

use std::{borrow::Cow, fmt::Debug, io, sync::Arc};

use async_trait::async_trait;

use crate::{
    data::{self, Arithmetic, Data, Endian},
    frame::*,
    ConfigError, Error, ProtocolError, Result, Slave,
};

mod context;

pub use self::context::ClientContext;

/// Transport independent asynchronous client trait
#[async_trait]
pub trait Client: Send + Debug {
    /// Invokes a _Modbus_ function.
    ///
    /// Addresses within `request` are protocol addresses.
    async fn call(&mut self, slave: Slave, request: Request<'_>) -> Result<Response>;

    /// Establishes the link unless it is already up.
    async fn connect(&mut self) -> io::Result<()>;

    /// Disconnects the client.
    ///
    /// Shuts down the underlying stream in a graceful manner. A later
    /// call reconnects.
    async fn disconnect(&mut self) -> io::Result<()>;

    fn is_connected(&self) -> bool;

    /// Addresses passed to [`Reader`] and [`Writer`] are protocol
    /// addresses instead of one-based data model addresses.
    fn pdu_addressing(&self) -> bool {
        false
    }
}

/// A client that is shared between a router and its slaves.
pub type SharedClient = Arc<tokio::sync::Mutex<dyn Client>>;

/// Wraps `client` for sharing.
pub fn shared(client: impl Client + 'static) -> SharedClient {
    Arc::new(tokio::sync::Mutex::new(client))
}

fn pdu_address(pdu_addressing: bool, addr: Address) -> std::result::Result<Address, Error> {
    if pdu_addressing {
        return Ok(addr);
    }
    addr.checked_sub(1)
        .ok_or_else(|| ConfigError::Address(addr).into())
}

fn check_quantity(
    function: FunctionCode,
    quantity: usize,
    max: Quantity,
) -> std::result::Result<Quantity, Error> {
    match Quantity::try_from(quantity) {
        Ok(cnt) if (1..=max).contains(&cnt) => Ok(cnt),
        _ => Err(ConfigError::Quantity { function, quantity }.into()),
    }
}

fn check_word_count(words: &[Word], cnt: Quantity) -> std::result::Result<(), Error> {
    if words.len() != usize::from(cnt) {
        return Err(ProtocolError::Framing(format!(
            "expected {cnt} registers, received {}",
            words.len()
        ))
        .into());
    }
    Ok(())
}

/// Bit responses are padded to whole bytes.
fn truncate_coils(mut coils: Vec<Coil>, cnt: Quantity) -> std::result::Result<Vec<Coil>, Error> {
    let cnt = usize::from(cnt);
    if coils.len() != cnt.div_ceil(8) * 8 {
        return Err(ProtocolError::Framing(format!(
            "expected {cnt} bits, received {}",
            coils.len()
        ))
        .into());
    }
    coils.truncate(cnt);
    Ok(coils)
}

/// The server must echo the fields of a write request.
fn check_echo(
    expected: Option<Response>,
    result: std::result::Result<Response, ExceptionCode>,
) -> Result<()> {
    match (expected, result) {
        (_, Err(exception)) => Ok(Err(exception)),
        (Some(expected), Ok(response)) if expected != response => {
            Err(ProtocolError::EchoMismatch { expected, response }.into())
        }
        (_, Ok(_)) => Ok(Ok(())),
    }
}

/// Asynchronous _Modbus_ reader
#[async_trait]
pub trait Reader: Client {
    /// Read multiple coils (0x01)
    async fn read_coils(&mut self, slave: Slave, addr: Address, cnt: Quantity)
        -> Result<Vec<Coil>>;

    /// Read multiple discrete inputs (0x02)
    async fn read_discrete_inputs(
        &mut self,
        slave: Slave,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>>;

    /// Read multiple holding registers (0x03)
    async fn read_holding_registers(
        &mut self,
        slave: Slave,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>>;

    /// Read multiple input registers (0x04)
    async fn read_input_registers(
        &mut self,
        slave: Slave,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>>;

    /// Write and then read multiple holding registers (0x17)
    async fn write_then_read_registers(
        &mut self,
        slave: Slave,
        write_addr: Address,
        write_data: &[Word],
        read_addr: Address,
        read_count: Quantity,
    ) -> Result<Vec<Word>>;

    /// Report slave id (0x11)
    ///
    /// Returns the raw payload: identifier, run indicator status and
    /// additional data.
    async fn report_slave_id(&mut self, slave: Slave) -> Result<Vec<u8>>;
}

/// Asynchronous Modbus writer
#[async_trait]
pub trait Writer: Client {
    /// Write a single coil (0x05)
    async fn write_single_coil(&mut self, slave: Slave, addr: Address, coil: Coil) -> Result<()>;

    /// Write a single holding register (0x06)
    async fn write_single_register(
        &mut self,
        slave: Slave,
        addr: Address,
        word: Word,
    ) -> Result<()>;

    /// Write multiple coils (0x0F)
    async fn write_multiple_coils(
        &mut self,
        slave: Slave,
        addr: Address,
        coils: &'_ [Coil],
    ) -> Result<()>;

    /// Write multiple holding registers (0x10)
    async fn write_multiple_registers(
        &mut self,
        slave: Slave,
        addr: Address,
        words: &[Word],
    ) -> Result<()>;

    /// Set or clear individual bits of a holding register (0x16)
    async fn masked_write_register(
        &mut self,
        slave: Slave,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()>;
}

#[async_trait]
impl<C> Reader for C
where
    C: Client + ?Sized,
{
    async fn read_coils(
        &mut self,
        slave: Slave,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>> {
        let cnt = check_quantity(FunctionCode::ReadCoils, cnt.into(), MAX_READ_BITS)?;
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let coils = match self.call(slave, Request::ReadCoils(addr, cnt)).await? {
            Ok(Response::ReadCoils(coils)) => coils,
            Ok(_) => unreachable!("call() should reject mismatching responses"),
            Err(exception) => return Ok(Err(exception)),
        };
        truncate_coils(coils, cnt).map(Ok)
    }

    async fn read_discrete_inputs(
        &mut self,
        slave: Slave,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>> {
        let cnt = check_quantity(FunctionCode::ReadDiscreteInputs, cnt.into(), MAX_READ_BITS)?;
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let coils = match self.call(slave, Request::ReadDiscreteInputs(addr, cnt)).await? {
            Ok(Response::ReadDiscreteInputs(coils)) => coils,
            Ok(_) => unreachable!("call() should reject mismatching responses"),
            Err(exception) => return Ok(Err(exception)),
        };
        truncate_coils(coils, cnt).map(Ok)
    }

    async fn read_holding_registers(
        &mut self,
        slave: Slave,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>> {
        let cnt = check_quantity(
            FunctionCode::ReadHoldingRegisters,
            cnt.into(),
            MAX_READ_REGISTERS,
        )?;
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let words = match self
            .call(slave, Request::ReadHoldingRegisters(addr, cnt))
            .await?
        {
            Ok(Response::ReadHoldingRegisters(words)) => words,
            Ok(_) => unreachable!("call() should reject mismatching responses"),
            Err(exception) => return Ok(Err(exception)),
        };
        check_word_count(&words, cnt)?;
        Ok(Ok(words))
    }

    async fn read_input_registers(
        &mut self,
        slave: Slave,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>> {
        let cnt = check_quantity(
            FunctionCode::ReadInputRegisters,
            cnt.into(),
            MAX_READ_REGISTERS,
        )?;
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let words = match self
            .call(slave, Request::ReadInputRegisters(addr, cnt))
            .await?
        {
            Ok(Response::ReadInputRegisters(words)) => words,
            Ok(_) => unreachable!("call() should reject mismatching responses"),
            Err(exception) => return Ok(Err(exception)),
        };
        check_word_count(&words, cnt)?;
        Ok(Ok(words))
    }

    async fn write_then_read_registers(
        &mut self,
        slave: Slave,
        write_addr: Address,
        write_data: &[Word],
        read_addr: Address,
        read_count: Quantity,
    ) -> Result<Vec<Word>> {
        let function = FunctionCode::ReadWriteMultipleRegisters;
        check_quantity(function, write_data.len(), MAX_READ_WRITE_REGISTERS)?;
        let read_count = check_quantity(function, read_count.into(), MAX_READ_REGISTERS)?;
        let write_addr = pdu_address(self.pdu_addressing(), write_addr)?;
        let read_addr = pdu_address(self.pdu_addressing(), read_addr)?;
        let words = match self
            .call(
                slave,
                Request::ReadWriteMultipleRegisters(
                    read_addr,
                    read_count,
                    write_addr,
                    Cow::Borrowed(write_data),
                ),
            )
            .await?
        {
            Ok(Response::ReadWriteMultipleRegisters(words)) => words,
            Ok(_) => unreachable!("call() should reject mismatching responses"),
            Err(exception) => return Ok(Err(exception)),
        };
        check_word_count(&words, read_count)?;
        Ok(Ok(words))
    }

    async fn report_slave_id(&mut self, slave: Slave) -> Result<Vec<u8>> {
        self.call(slave, Request::ReportSlaveId)
            .await
            .map(|result| {
                result.map(|response| match response {
                    Response::ReportSlaveId(report) => report.into(),
                    _ => unreachable!("call() should reject mismatching responses"),
                })
            })
    }
}

#[async_trait]
impl<C> Writer for C
where
    C: Client + ?Sized,
{
    async fn write_single_coil(&mut self, slave: Slave, addr: Address, coil: Coil) -> Result<()> {
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let request = Request::WriteSingleCoil(addr, coil);
        let echo = request.write_response();
        check_echo(echo, self.call(slave, request).await?)
    }

    async fn write_multiple_coils(
        &mut self,
        slave: Slave,
        addr: Address,
        coils: &[Coil],
    ) -> Result<()> {
        check_quantity(
            FunctionCode::WriteMultipleCoils,
            coils.len(),
            MAX_WRITE_BITS,
        )?;
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let request = Request::WriteMultipleCoils(addr, Cow::Borrowed(coils));
        let echo = request.write_response();
        check_echo(echo, self.call(slave, request).await?)
    }

    async fn write_single_register(
        &mut self,
        slave: Slave,
        addr: Address,
        word: Word,
    ) -> Result<()> {
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let request = Request::WriteSingleRegister(addr, word);
        let echo = request.write_response();
        check_echo(echo, self.call(slave, request).await?)
    }

    async fn write_multiple_registers(
        &mut self,
        slave: Slave,
        addr: Address,
        data: &[Word],
    ) -> Result<()> {
        check_quantity(
            FunctionCode::WriteMultipleRegisters,
            data.len(),
            MAX_WRITE_REGISTERS,
        )?;
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let request = Request::WriteMultipleRegisters(addr, Cow::Borrowed(data));
        let echo = request.write_response();
        check_echo(echo, self.call(slave, request).await?)
    }

    async fn masked_write_register(
        &mut self,
        slave: Slave,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()> {
        let addr = pdu_address(self.pdu_addressing(), addr)?;
        let request = Request::MaskWriteRegister(addr, and_mask, or_mask);
        let echo = request.write_response();
        check_echo(echo, self.call(slave, request).await?)
    }
}

fn array_quantity<T: Arithmetic>(
    function: FunctionCode,
    len: usize,
) -> std::result::Result<Quantity, Error> {
    let quantity = len.saturating_mul(T::register_count());
    Quantity::try_from(quantity).map_err(|_| ConfigError::Quantity { function, quantity }.into())
}

fn decode_data<T: Arithmetic>(
    words: &[Word],
    endian: Endian,
) -> std::result::Result<Data<T>, Error> {
    Data::from_registers(words, endian).ok_or_else(|| {
        ProtocolError::Framing(format!("{} registers do not form a value", words.len())).into()
    })
}

fn decode_array<T: Arithmetic>(words: &[Word], endian: Endian) -> Vec<T> {
    words
        .chunks_exact(T::register_count())
        .filter_map(|chunk| data::from_registers(chunk, endian))
        .collect()
}

/// Typed access to multi-register values.
#[async_trait]
pub trait DataAccess: Reader + Writer {
    /// Reads a single value from input registers.
    async fn read_input_data<T: Arithmetic>(
        &mut self,
        slave: Slave,
        addr: Address,
        endian: Endian,
    ) -> Result<Data<T>> {
        let cnt = array_quantity::<T>(FunctionCode::ReadInputRegisters, 1)?;
        match self.read_input_registers(slave, addr, cnt).await? {
            Ok(words) => decode_data(&words, endian).map(Ok),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Reads a single value from holding registers.
    async fn read_holding_data<T: Arithmetic>(
        &mut self,
        slave: Slave,
        addr: Address,
        endian: Endian,
    ) -> Result<Data<T>> {
        let cnt = array_quantity::<T>(FunctionCode::ReadHoldingRegisters, 1)?;
        match self.read_holding_registers(slave, addr, cnt).await? {
            Ok(words) => decode_data(&words, endian).map(Ok),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Reads `len` consecutive values from input registers.
    async fn read_input_array<T: Arithmetic>(
        &mut self,
        slave: Slave,
        addr: Address,
        len: usize,
        endian: Endian,
    ) -> Result<Vec<T>> {
        let cnt = array_quantity::<T>(FunctionCode::ReadInputRegisters, len)?;
        Ok(self
            .read_input_registers(slave, addr, cnt)
            .await?
            .map(|words| decode_array(&words, endian)))
    }

    /// Reads `len` consecutive values from holding registers.
    async fn read_holding_array<T: Arithmetic>(
        &mut self,
        slave: Slave,
        addr: Address,
        len: usize,
        endian: Endian,
    ) -> Result<Vec<T>> {
        let cnt = array_quantity::<T>(FunctionCode::ReadHoldingRegisters, len)?;
        Ok(self
            .read_holding_registers(slave, addr, cnt)
            .await?
            .map(|words| decode_array(&words, endian)))
    }

    /// Writes a single value into holding registers.
    async fn write_holding_data<T: Arithmetic>(
        &mut self,
        slave: Slave,
        addr: Address,
        data: Data<T>,
    ) -> Result<()> {
        self.write_holding_array(slave, addr, &[data.value], data.endian)
            .await
    }

    /// Writes consecutive values into holding registers.
    async fn write_holding_array<T: Arithmetic>(
        &mut self,
        slave: Slave,
        addr: Address,
        values: &[T],
        endian: Endian,
    ) -> Result<()> {
        let words: Vec<Word> = values
            .iter()
            .flat_map(|value| data::to_registers(*value, endian))
            .collect();
        self.write_multiple_registers(slave, addr, &words).await
    }
}

impl<C> DataAccess for C where C: Client + ?Sized {}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use futures::executor::block_on;

    use super::*;

    #[derive(Default, Debug)]
    pub(crate) struct ClientMock {
        pdu_addressing: bool,
        last_request: Mutex<Option<(Slave, Request<'static>)>>,
        next_response: Option<Result<Response>>,
    }

    #[allow(dead_code)]
    impl ClientMock {
        pub(crate) fn last_request(&self) -> Option<(Slave, Request<'static>)> {
            self.last_request.lock().unwrap().clone()
        }

        pub(crate) fn set_next_response(&mut self, next_response: Result<Response>) {
            self.next_response = Some(next_response);
        }
    }

    #[async_trait]
    impl Client for ClientMock {
        async fn call(&mut self, slave: Slave, request: Request<'_>) -> Result<Response> {
            *self.last_request.lock().unwrap() = Some((slave, request.into_owned()));
            match self.next_response.take().unwrap() {
                Ok(response) => Ok(response),
                Err(Error::Transport(err)) => {
                    Err(io::Error::new(err.kind(), format!("{err}")).into())
                }
                Err(err) => Err(err),
            }
        }

        async fn connect(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn pdu_addressing(&self) -> bool {
            self.pdu_addressing
        }
    }

    #[test]
    fn read_some_coils() {
        // The protocol will always return entire bytes with, i.e.
        // a multiple of 8 coils.
        let response_coils = [true, false, false, true, false, true, false, true];
        for num_coils in 1..8 {
            let mut client = ClientMock::default();
            client.set_next_response(Ok(Ok(Response::ReadCoils(response_coils.to_vec()))));
            let coils = block_on(client.read_coils(Slave(1), 1, num_coils))
                .unwrap()
                .unwrap();
            assert_eq!(&response_coils[0..num_coils as usize], &coils[..]);
        }
    }

    #[test]
    fn read_some_discrete_inputs() {
        // The protocol will always return entire bytes with, i.e.
        // a multiple of 8 coils.
        let response_inputs = [true, false, false, true, false, true, false, true];
        for num_inputs in 1..8 {
            let mut client = ClientMock::default();
            client.set_next_response(Ok(Ok(Response::ReadDiscreteInputs(
                response_inputs.to_vec(),
            ))));
            let inputs = block_on(client.read_discrete_inputs(Slave(1), 1, num_inputs))
                .unwrap()
                .unwrap();
            assert_eq!(&response_inputs[0..num_inputs as usize], &inputs[..]);
        }
    }

    #[test]
    fn subtract_one_from_data_model_addresses() {
        let mut client = ClientMock::default();
        client.set_next_response(Ok(Ok(Response::ReadHoldingRegisters(vec![1, 2]))));
        block_on(client.read_holding_registers(Slave(33), 1, 2))
            .unwrap()
            .unwrap();
        assert_eq!(
            client.last_request(),
            Some((Slave(33), Request::ReadHoldingRegisters(0, 2)))
        );

        let err = block_on(client.write_single_register(Slave(33), 0, 1)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Address(0))));
    }

    #[test]
    fn keep_pdu_addresses() {
        let mut client = ClientMock {
            pdu_addressing: true,
            ..Default::default()
        };
        client.set_next_response(Ok(Ok(Response::WriteSingleCoil(0, true))));
        block_on(client.write_single_coil(Slave(1), 0, true))
            .unwrap()
            .unwrap();
        assert_eq!(
            client.last_request(),
            Some((Slave(1), Request::WriteSingleCoil(0, true)))
        );
    }

    #[test]
    fn reject_invalid_quantities() {
        let mut client = ClientMock::default();
        for cnt in [0, MAX_READ_REGISTERS + 1] {
            let err = block_on(client.read_holding_registers(Slave(1), 1, cnt)).unwrap_err();
            assert!(matches!(err, Error::Config(ConfigError::Quantity { .. })));
        }
        let err = block_on(client.read_coils(Slave(1), 1, MAX_READ_BITS + 1)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Quantity { .. })));
        let coils = vec![true; usize::from(MAX_WRITE_BITS) + 1];
        let err = block_on(client.write_multiple_coils(Slave(1), 1, &coils)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Quantity { .. })));
        let words = vec![0; usize::from(MAX_WRITE_REGISTERS) + 1];
        let err = block_on(client.write_multiple_registers(Slave(1), 1, &words)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Quantity { .. })));
        let words = vec![0; usize::from(MAX_READ_WRITE_REGISTERS) + 1];
        let err =
            block_on(client.write_then_read_registers(Slave(1), 1, &words, 1, 1)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Quantity { .. })));
        // nothing has been sent
        assert_eq!(client.last_request(), None);
    }

    #[test]
    fn accept_maximum_quantities() {
        let mut client = ClientMock::default();
        client.set_next_response(Ok(Ok(Response::ReadCoils(vec![false; 2000]))));
        let coils = block_on(client.read_coils(Slave(1), 1, MAX_READ_BITS))
            .unwrap()
            .unwrap();
        assert_eq!(coils.len(), 2000);

        client.set_next_response(Ok(Ok(Response::WriteMultipleRegisters(0, 123))));
        let words = vec![0; usize::from(MAX_WRITE_REGISTERS)];
        block_on(client.write_multiple_registers(Slave(1), 1, &words))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn reject_register_count_mismatch() {
        let mut client = ClientMock::default();
        client.set_next_response(Ok(Ok(Response::ReadInputRegisters(vec![1]))));
        let err = block_on(client.read_input_registers(Slave(1), 1, 2)).unwrap_err();
        assert!(err.is_framing());
    }

    #[test]
    fn reject_bit_count_mismatch() {
        let mut client = ClientMock::default();
        // A single byte for 16 coils
        client.set_next_response(Ok(Ok(Response::ReadCoils(vec![true; 8]))));
        let err = block_on(client.read_coils(Slave(1), 1, 16)).unwrap_err();
        assert!(err.is_framing());

        client.set_next_response(Ok(Ok(Response::ReadDiscreteInputs(vec![false; 16]))));
        let err = block_on(client.read_discrete_inputs(Slave(1), 1, 3)).unwrap_err();
        assert!(err.is_framing());

        client.set_next_response(Ok(Ok(Response::ReadCoils(vec![false; 16]))));
        let coils = block_on(client.read_coils(Slave(1), 1, 9))
            .unwrap()
            .unwrap();
        assert_eq!(coils.len(), 9);
    }

    #[test]
    fn reject_mismatching_echo() {
        let mut client = ClientMock::default();
        client.set_next_response(Ok(Ok(Response::WriteSingleRegister(0, 0x1234))));
        let err = block_on(client.write_single_register(Slave(1), 100, 0x1234)).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::EchoMismatch {
                expected: Response::WriteSingleRegister(99, 0x1234),
                response: Response::WriteSingleRegister(0, 0x1234),
            })
        ));
        assert!(!err.is_link_failure());

        client.set_next_response(Ok(Ok(Response::WriteSingleCoil(4, false))));
        let err = block_on(client.write_single_coil(Slave(1), 5, true)).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::EchoMismatch { .. })
        ));

        client.set_next_response(Ok(Ok(Response::WriteMultipleCoils(0, 2))));
        let err = block_on(client.write_multiple_coils(Slave(1), 1, &[true; 3])).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::EchoMismatch { .. })
        ));

        client.set_next_response(Ok(Ok(Response::WriteMultipleRegisters(1, 2))));
        let err = block_on(client.write_multiple_registers(Slave(1), 1, &[1, 2])).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::EchoMismatch { .. })
        ));

        client.set_next_response(Ok(Ok(Response::MaskWriteRegister(0, 0xF2, 0x00))));
        let err = block_on(client.masked_write_register(Slave(1), 1, 0xF2, 0x25)).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::EchoMismatch { .. })
        ));

        client.set_next_response(Ok(Ok(Response::MaskWriteRegister(0, 0xF2, 0x25))));
        block_on(client.masked_write_register(Slave(1), 1, 0xF2, 0x25))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn exception_response() {
        let mut client = ClientMock::default();
        client.set_next_response(Ok(Err(ExceptionCode::IllegalDataAddress)));
        let result = block_on(client.read_holding_registers(Slave(1), 100, 2)).unwrap();
        assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn write_then_read() {
        let mut client = ClientMock::default();
        client.set_next_response(Ok(Ok(Response::ReadWriteMultipleRegisters(vec![7, 8, 9]))));
        let words = block_on(client.write_then_read_registers(Slave(2), 5, &[1, 2], 10, 3))
            .unwrap()
            .unwrap();
        assert_eq!(words, vec![7, 8, 9]);
        assert_eq!(
            client.last_request(),
            Some((
                Slave(2),
                Request::ReadWriteMultipleRegisters(9, 3, 4, Cow::Owned(vec![1, 2]))
            ))
        );
    }

    #[test]
    fn report_slave_id() {
        let mut client = ClientMock::default();
        client.set_next_response(Ok(Ok(Response::ReportSlaveId(SlaveReport {
            id: 0x21,
            run_indication: true,
            data: vec![0x01],
        }))));
        let report = block_on(client.report_slave_id(Slave(0x21)))
            .unwrap()
            .unwrap();
        assert_eq!(report, vec![0x21, 0xFF, 0x01]);
    }

    #[test]
    fn typed_data() {
        let mut client = ClientMock::default();
        client.set_next_response(Ok(Ok(Response::WriteMultipleRegisters(0, 2))));
        block_on(client.write_holding_data(Slave(1), 1, Data::new(3600_i32, Endian::Cdab)))
            .unwrap()
            .unwrap();
        assert_eq!(
            client.last_request(),
            Some((
                Slave(1),
                Request::WriteMultipleRegisters(0, Cow::Owned(vec![3600, 0]))
            ))
        );

        let registers = data::to_registers(152.3_f32, Endian::Cdab).to_vec();
        client.set_next_response(Ok(Ok(Response::ReadHoldingRegisters(registers))));
        let data: Data<f32> = block_on(client.read_holding_data(Slave(1), 1, Endian::Cdab))
            .unwrap()
            .unwrap();
        assert_eq!(data.value.to_bits(), 152.3_f32.to_bits());

        client.set_next_response(Ok(Ok(Response::ReadInputRegisters(vec![0, 1, 0, 2]))));
        let values: Vec<u32> =
            block_on(client.read_input_array(Slave(1), 1, 2, Endian::Abcd))
                .unwrap()
                .unwrap();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(
            client.last_request(),
            Some((Slave(1), Request::ReadInputRegisters(0, 4)))
        );
    }

    #[test]
    fn shared_client() {
        let client = shared(ClientMock::default());
        let guard = block_on(client.lock());
        assert!(guard.is_connected());
        assert!(!guard.pdu_addressing());
    }
}
