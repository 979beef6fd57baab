// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Buffered slaves and their data map

use std::{
    fmt,
    ops::Range,
    sync::{Arc, Weak},
};

use tokio::sync::Mutex;

use crate::{
    client::{Client, SharedClient},
    data::{Arithmetic, Data, Endian},
    frame::*,
    message::Message,
    transport::Peer,
    Slave,
};

/// One of the four banks of the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum Table {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl Table {
    #[must_use]
    pub const fn is_bits(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete-input",
            Self::InputRegister => "input-register",
            Self::HoldingRegister => "holding-register",
        };
        f.write_str(name)
    }
}

/// Contiguous cells starting at a base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<T> {
    base: Address,
    cells: Vec<T>,
}

impl<T: Copy + Default> Block<T> {
    fn new(base: Address, len: usize) -> Self {
        Self {
            base,
            cells: vec![T::default(); len],
        }
    }

    #[must_use]
    pub const fn base(&self) -> Address {
        self.base
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    fn range(&self, addr: Address, cnt: usize) -> Result<Range<usize>, ExceptionCode> {
        let start = addr
            .checked_sub(self.base)
            .map(usize::from)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        let end = start + cnt;
        if end > self.cells.len() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(start..end)
    }

    fn read(&self, addr: Address, cnt: usize) -> Result<&[T], ExceptionCode> {
        let range = self.range(addr, cnt)?;
        Ok(&self.cells[range])
    }

    fn write(&mut self, addr: Address, values: &[T]) -> Result<(), ExceptionCode> {
        let range = self.range(addr, values.len())?;
        self.cells[range].copy_from_slice(values);
        Ok(())
    }
}

/// The four banks of a slave, any of them may be absent.
///
/// Addresses are in the addressing mode of the owning slave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataMap {
    coils: Option<Block<Coil>>,
    discrete_inputs: Option<Block<Coil>>,
    input_registers: Option<Block<Word>>,
    holding_registers: Option<Block<Word>>,
}

impl DataMap {
    /// Allocates or resizes a bank.
    ///
    /// Cells that are kept retain their values, new cells are zero.
    pub fn set_block(&mut self, table: Table, quantity: usize, base: Address) {
        fn resize<T: Copy + Default>(block: &mut Option<Block<T>>, quantity: usize, base: Address) {
            match block {
                Some(block) => {
                    block.base = base;
                    block.cells.resize(quantity, T::default());
                }
                None => *block = Some(Block::new(base, quantity)),
            }
        }
        match table {
            Table::Coil => resize(&mut self.coils, quantity, base),
            Table::DiscreteInput => resize(&mut self.discrete_inputs, quantity, base),
            Table::InputRegister => resize(&mut self.input_registers, quantity, base),
            Table::HoldingRegister => resize(&mut self.holding_registers, quantity, base),
        }
    }

    #[must_use]
    pub fn bits(&self, table: Table) -> Option<&Block<Coil>> {
        match table {
            Table::Coil => self.coils.as_ref(),
            Table::DiscreteInput => self.discrete_inputs.as_ref(),
            Table::InputRegister | Table::HoldingRegister => None,
        }
    }

    fn bits_mut(&mut self, table: Table) -> Result<&mut Block<Coil>, ExceptionCode> {
        match table {
            Table::Coil => self.coils.as_mut(),
            Table::DiscreteInput => self.discrete_inputs.as_mut(),
            Table::InputRegister | Table::HoldingRegister => None,
        }
        .ok_or(ExceptionCode::IllegalDataAddress)
    }

    #[must_use]
    pub fn registers(&self, table: Table) -> Option<&Block<Word>> {
        match table {
            Table::InputRegister => self.input_registers.as_ref(),
            Table::HoldingRegister => self.holding_registers.as_ref(),
            Table::Coil | Table::DiscreteInput => None,
        }
    }

    fn registers_mut(&mut self, table: Table) -> Result<&mut Block<Word>, ExceptionCode> {
        match table {
            Table::InputRegister => self.input_registers.as_mut(),
            Table::HoldingRegister => self.holding_registers.as_mut(),
            Table::Coil | Table::DiscreteInput => None,
        }
        .ok_or(ExceptionCode::IllegalDataAddress)
    }

    /// # Errors
    ///
    /// [`ExceptionCode::IllegalDataAddress`] if the range escapes the block.
    pub fn read_bits(
        &self,
        table: Table,
        addr: Address,
        cnt: usize,
    ) -> Result<Vec<Coil>, ExceptionCode> {
        let block = self.bits(table).ok_or(ExceptionCode::IllegalDataAddress)?;
        block.read(addr, cnt).map(<[_]>::to_vec)
    }

    /// # Errors
    ///
    /// [`ExceptionCode::IllegalDataAddress`] if the range escapes the block.
    pub fn write_bits(
        &mut self,
        table: Table,
        addr: Address,
        bits: &[Coil],
    ) -> Result<(), ExceptionCode> {
        self.bits_mut(table)?.write(addr, bits)
    }

    /// # Errors
    ///
    /// [`ExceptionCode::IllegalDataAddress`] if the range escapes the block.
    pub fn read_registers(
        &self,
        table: Table,
        addr: Address,
        cnt: usize,
    ) -> Result<Vec<Word>, ExceptionCode> {
        let block = self
            .registers(table)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        block.read(addr, cnt).map(<[_]>::to_vec)
    }

    /// # Errors
    ///
    /// [`ExceptionCode::IllegalDataAddress`] if the range escapes the block.
    pub fn write_registers(
        &mut self,
        table: Table,
        addr: Address,
        words: &[Word],
    ) -> Result<(), ExceptionCode> {
        self.registers_mut(table)?.write(addr, words)
    }

    /// Reads a value spread over consecutive registers.
    ///
    /// # Errors
    ///
    /// [`ExceptionCode::IllegalDataAddress`] if the registers escape the block.
    pub fn read_data<T: Arithmetic>(
        &self,
        table: Table,
        addr: Address,
        endian: Endian,
    ) -> Result<Data<T>, ExceptionCode> {
        let words = self.read_registers(table, addr, T::register_count())?;
        Data::from_registers(&words, endian).ok_or(ExceptionCode::IllegalDataAddress)
    }

    /// # Errors
    ///
    /// [`ExceptionCode::IllegalDataAddress`] if the registers escape the block.
    pub fn write_data<T: Arithmetic>(
        &mut self,
        table: Table,
        addr: Address,
        data: Data<T>,
    ) -> Result<(), ExceptionCode> {
        self.write_registers(table, addr, &data.to_registers())
    }

    fn check_range(&self, table: Table, addr: Address, cnt: usize) -> Result<(), ExceptionCode> {
        let range = if table.is_bits() {
            self.bits(table).map(|block| block.range(addr, cnt))
        } else {
            self.registers(table).map(|block| block.range(addr, cnt))
        };
        range.unwrap_or(Err(ExceptionCode::IllegalDataAddress))?;
        Ok(())
    }
}

/// Decision of a reply callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Proceed with the default handling.
    Continue,
    /// Handled by the callback, no reply is sent.
    StopOk,
    /// Abort with a [`ExceptionCode::ServerDeviceFailure`] reply.
    Failed(String),
}

/// What a reply callback may inspect besides the request.
#[derive(Debug)]
pub struct CallbackContext<'a> {
    /// The sender of the request.
    pub peer: &'a Peer,
    /// The slave that handles the request.
    pub slave: Slave,
    /// The data map of the slave.
    pub map: &'a mut DataMap,
}

/// A hook that runs before or after a request is executed.
pub type ReplyCallback =
    Arc<dyn Fn(&mut Message, &mut CallbackContext<'_>) -> CallbackOutcome + Send + Sync>;

type Upstream = Weak<Mutex<dyn Client>>;

/// A data map that answers requests of a single unit.
///
/// With an upstream client, reads fetch fresh values into the map
/// before answering and writes are forwarded after updating the map.
pub struct BufferedSlave {
    id: Slave,
    pdu_addressing: bool,
    map: Mutex<DataMap>,
    upstream: Option<Upstream>,
    before_reply: Option<ReplyCallback>,
    after_reply: Option<ReplyCallback>,
    report: SlaveReport,
}

impl fmt::Debug for BufferedSlave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedSlave")
            .field("id", &self.id)
            .field("pdu_addressing", &self.pdu_addressing)
            .field("upstream", &self.upstream.is_some())
            .field("before_reply", &self.before_reply.is_some())
            .field("after_reply", &self.after_reply.is_some())
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

fn check_quantity(cnt: usize, max: Quantity) -> Result<(), ExceptionCode> {
    if cnt == 0 || cnt > usize::from(max) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn check_request(request: &Request<'_>) -> Result<(), ExceptionCode> {
    use Request::*;

    match request {
        ReadCoils(_, cnt) | ReadDiscreteInputs(_, cnt) => {
            check_quantity((*cnt).into(), MAX_READ_BITS)
        }
        ReadInputRegisters(_, cnt) | ReadHoldingRegisters(_, cnt) => {
            check_quantity((*cnt).into(), MAX_READ_REGISTERS)
        }
        WriteMultipleCoils(_, coils) => check_quantity(coils.len(), MAX_WRITE_BITS),
        WriteMultipleRegisters(_, words) => check_quantity(words.len(), MAX_WRITE_REGISTERS),
        ReadWriteMultipleRegisters(_, cnt, _, words) => {
            check_quantity((*cnt).into(), MAX_READ_REGISTERS)?;
            check_quantity(words.len(), MAX_READ_WRITE_REGISTERS)
        }
        WriteSingleCoil(_, _)
        | WriteSingleRegister(_, _)
        | MaskWriteRegister(_, _, _)
        | ReportSlaveId => Ok(()),
        Custom(_, _) => Err(ExceptionCode::IllegalFunction),
    }
}

fn response_bits(response: Response, cnt: usize) -> Result<Vec<Coil>, ExceptionCode> {
    match response {
        Response::ReadCoils(mut bits) | Response::ReadDiscreteInputs(mut bits)
            if bits.len() >= cnt =>
        {
            bits.truncate(cnt);
            Ok(bits)
        }
        _ => Err(ExceptionCode::ServerDeviceFailure),
    }
}

fn response_words(response: Response, cnt: usize) -> Result<Vec<Word>, ExceptionCode> {
    match response {
        Response::ReadInputRegisters(words)
        | Response::ReadHoldingRegisters(words)
        | Response::ReadWriteMultipleRegisters(words)
            if words.len() == cnt =>
        {
            Ok(words)
        }
        _ => Err(ExceptionCode::ServerDeviceFailure),
    }
}

const fn masked(value: Word, and_mask: Word, or_mask: Word) -> Word {
    (value & and_mask) | (or_mask & !and_mask)
}

impl BufferedSlave {
    /// A slave without any block.
    #[must_use]
    pub fn new(id: Slave) -> Self {
        Self {
            id,
            pdu_addressing: false,
            map: Mutex::new(DataMap::default()),
            upstream: None,
            before_reply: None,
            after_reply: None,
            report: SlaveReport::new(id.into()),
        }
    }

    /// Block bases and addresses are protocol addresses instead of
    /// one-based data model addresses.
    #[must_use]
    pub fn with_pdu_addressing(mut self, pdu_addressing: bool) -> Self {
        self.pdu_addressing = pdu_addressing;
        self
    }

    #[must_use]
    pub const fn id(&self) -> Slave {
        self.id
    }

    #[must_use]
    pub const fn pdu_addressing(&self) -> bool {
        self.pdu_addressing
    }

    /// Allocates or resizes a bank, see [`DataMap::set_block()`].
    pub fn set_block(&mut self, table: Table, quantity: usize, base: Address) {
        self.map.get_mut().set_block(table, quantity, base);
    }

    /// The data map, shared with the server that owns this slave.
    #[must_use]
    pub const fn map(&self) -> &Mutex<DataMap> {
        &self.map
    }

    /// Forwards requests to `client`.
    ///
    /// Only a weak reference is kept.
    pub fn set_upstream(&mut self, client: &SharedClient) {
        self.upstream = Some(Arc::downgrade(client));
    }

    /// The upstream client while it is alive.
    #[must_use]
    pub fn upstream(&self) -> Option<SharedClient> {
        self.upstream.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_before_reply_callback(
        &mut self,
        callback: impl Fn(&mut Message, &mut CallbackContext<'_>) -> CallbackOutcome
            + Send
            + Sync
            + 'static,
    ) {
        self.before_reply = Some(Arc::new(callback));
    }

    pub fn set_after_reply_callback(
        &mut self,
        callback: impl Fn(&mut Message, &mut CallbackContext<'_>) -> CallbackOutcome
            + Send
            + Sync
            + 'static,
    ) {
        self.after_reply = Some(Arc::new(callback));
    }

    #[must_use]
    pub const fn report(&self) -> &SlaveReport {
        &self.report
    }

    pub fn set_report(&mut self, report: SlaveReport) {
        self.report = report;
    }

    fn map_address(&self, addr: Address) -> Result<Address, ExceptionCode> {
        if self.pdu_addressing {
            return Ok(addr);
        }
        addr.checked_add(1).ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn upstream_client(&self) -> Result<Option<SharedClient>, ExceptionCode> {
        match &self.upstream {
            None => Ok(None),
            Some(upstream) => upstream
                .upgrade()
                .map(Some)
                .ok_or(ExceptionCode::GatewayPathUnavailable),
        }
    }

    async fn forward(
        &self,
        client: &SharedClient,
        request: &Request<'_>,
    ) -> Result<Response, ExceptionCode> {
        let mut client = client.lock().await;
        match client.call(self.id, request.clone()).await {
            Ok(result) => result,
            Err(err) => {
                log::warn!("Forwarding request of slave {} failed: {err}", self.id);
                Err(ExceptionCode::ServerDeviceFailure)
            }
        }
    }

    async fn read_bits(
        &self,
        map: &mut DataMap,
        upstream: Option<&SharedClient>,
        table: Table,
        request: &Request<'_>,
        (addr, cnt): (Address, Quantity),
    ) -> Result<Vec<Coil>, ExceptionCode> {
        let addr = self.map_address(addr)?;
        let cnt = usize::from(cnt);
        map.check_range(table, addr, cnt)?;
        if let Some(client) = upstream {
            let bits = response_bits(self.forward(client, request).await?, cnt)?;
            map.write_bits(table, addr, &bits)?;
        }
        map.read_bits(table, addr, cnt)
    }

    async fn read_registers(
        &self,
        map: &mut DataMap,
        upstream: Option<&SharedClient>,
        table: Table,
        request: &Request<'_>,
        (addr, cnt): (Address, Quantity),
    ) -> Result<Vec<Word>, ExceptionCode> {
        let addr = self.map_address(addr)?;
        let cnt = usize::from(cnt);
        map.check_range(table, addr, cnt)?;
        if let Some(client) = upstream {
            let words = response_words(self.forward(client, request).await?, cnt)?;
            map.write_registers(table, addr, &words)?;
        }
        map.read_registers(table, addr, cnt)
    }

    async fn write_through(
        &self,
        upstream: Option<&SharedClient>,
        request: &Request<'_>,
    ) -> Result<(), ExceptionCode> {
        if let Some(client) = upstream {
            self.forward(client, request).await?;
        }
        Ok(())
    }

    /// Executes `request` against `map` and the upstream client.
    ///
    /// Validation failures never touch the map. Broadcasts only
    /// update the map.
    pub(crate) async fn execute(
        &self,
        map: &mut DataMap,
        request: &Request<'_>,
        broadcast: bool,
    ) -> Result<Response, ExceptionCode> {
        use Request::*;

        check_request(request)?;
        if let ReportSlaveId = request {
            return Ok(Response::ReportSlaveId(self.report.clone()));
        }
        let upstream = if broadcast {
            None
        } else {
            self.upstream_client()?
        };
        let upstream = upstream.as_ref();
        match request {
            ReadCoils(addr, cnt) => self
                .read_bits(map, upstream, Table::Coil, request, (*addr, *cnt))
                .await
                .map(Response::ReadCoils),
            ReadDiscreteInputs(addr, cnt) => self
                .read_bits(map, upstream, Table::DiscreteInput, request, (*addr, *cnt))
                .await
                .map(Response::ReadDiscreteInputs),
            ReadInputRegisters(addr, cnt) => self
                .read_registers(map, upstream, Table::InputRegister, request, (*addr, *cnt))
                .await
                .map(Response::ReadInputRegisters),
            ReadHoldingRegisters(addr, cnt) => self
                .read_registers(map, upstream, Table::HoldingRegister, request, (*addr, *cnt))
                .await
                .map(Response::ReadHoldingRegisters),
            WriteSingleCoil(addr, coil) => {
                map.write_bits(Table::Coil, self.map_address(*addr)?, &[*coil])?;
                self.write_through(upstream, request).await?;
                Ok(Response::WriteSingleCoil(*addr, *coil))
            }
            WriteMultipleCoils(addr, coils) => {
                map.write_bits(Table::Coil, self.map_address(*addr)?, coils)?;
                self.write_through(upstream, request).await?;
                let cnt = Quantity::try_from(coils.len())
                    .map_err(|_| ExceptionCode::IllegalDataValue)?;
                Ok(Response::WriteMultipleCoils(*addr, cnt))
            }
            WriteSingleRegister(addr, word) => {
                map.write_registers(Table::HoldingRegister, self.map_address(*addr)?, &[*word])?;
                self.write_through(upstream, request).await?;
                Ok(Response::WriteSingleRegister(*addr, *word))
            }
            WriteMultipleRegisters(addr, words) => {
                map.write_registers(Table::HoldingRegister, self.map_address(*addr)?, words)?;
                self.write_through(upstream, request).await?;
                let cnt = Quantity::try_from(words.len())
                    .map_err(|_| ExceptionCode::IllegalDataValue)?;
                Ok(Response::WriteMultipleRegisters(*addr, cnt))
            }
            MaskWriteRegister(addr, and_mask, or_mask) => {
                let map_addr = self.map_address(*addr)?;
                let value = map.read_registers(Table::HoldingRegister, map_addr, 1)?[0];
                let value = masked(value, *and_mask, *or_mask);
                map.write_registers(Table::HoldingRegister, map_addr, &[value])?;
                self.write_through(upstream, request).await?;
                Ok(Response::MaskWriteRegister(*addr, *and_mask, *or_mask))
            }
            ReadWriteMultipleRegisters(read_addr, cnt, write_addr, words) => {
                let read_addr = self.map_address(*read_addr)?;
                let cnt = usize::from(*cnt);
                map.check_range(Table::HoldingRegister, read_addr, cnt)?;
                map.write_registers(Table::HoldingRegister, self.map_address(*write_addr)?, words)?;
                if let Some(client) = upstream {
                    let read = response_words(self.forward(client, request).await?, cnt)?;
                    map.write_registers(Table::HoldingRegister, read_addr, &read)?;
                }
                map.read_registers(Table::HoldingRegister, read_addr, cnt)
                    .map(Response::ReadWriteMultipleRegisters)
            }
            ReportSlaveId | Custom(_, _) => Err(ExceptionCode::IllegalFunction),
        }
    }

    fn exception_reply(message: &Message, exception: ExceptionCode) -> Option<Message> {
        let function = FunctionCode::new(message.function_code());
        message
            .reply(&Err(ExceptionResponse {
                function,
                exception,
            }))
            .map_err(|err| log::error!("Failed to build exception reply: {err}"))
            .ok()
    }

    /// Runs the callbacks around the execution of a request frame.
    ///
    /// Returns the reply, if any.
    pub(crate) async fn process(&self, peer: &Peer, mut message: Message) -> Option<Message> {
        let mut map = self.map.lock().await;
        let mut context = CallbackContext {
            peer,
            slave: self.id,
            map: &mut map,
        };
        if let Some(callback) = &self.before_reply {
            match callback(&mut message, &mut context) {
                CallbackOutcome::Continue => {}
                CallbackOutcome::StopOk => return None,
                CallbackOutcome::Failed(reason) => {
                    log::warn!("Before reply callback of slave {} failed: {reason}", self.id);
                    return Self::exception_reply(&message, ExceptionCode::ServerDeviceFailure);
                }
            }
        }
        let result = match message.decode_request() {
            Ok(request) => {
                log::trace!("Slave {} executes {request:?}", self.id);
                let broadcast = message.slave().is_broadcast();
                self.execute(context.map, &request, broadcast).await
            }
            Err(err) => {
                log::warn!("Malformed request for slave {}: {err}", self.id);
                Err(ExceptionCode::IllegalDataValue)
            }
        };
        let function = FunctionCode::new(message.function_code());
        let result = result.map_err(|exception| ExceptionResponse {
            function,
            exception,
        });
        let reply = match message.reply(&result) {
            Ok(reply) => reply,
            Err(err) => {
                log::warn!("Failed to build reply of slave {}: {err}", self.id);
                return Self::exception_reply(&message, ExceptionCode::ServerDeviceFailure);
            }
        };
        if let Some(callback) = &self.after_reply {
            match callback(&mut message, &mut context) {
                CallbackOutcome::Continue => {}
                CallbackOutcome::StopOk => return None,
                CallbackOutcome::Failed(reason) => {
                    log::warn!("After reply callback of slave {} failed: {reason}", self.id);
                    return Self::exception_reply(&message, ExceptionCode::ServerDeviceFailure);
                }
            }
        }
        Some(reply)
    }
}
