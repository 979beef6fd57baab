// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, io};

use async_trait::async_trait;
use tokio::time::Instant;

use super::Client;
use crate::{
    codec::FrameCodec,
    frame::{tcp::TransactionId, verify_response_header, Framing, Header, Request, Response},
    message::Message,
    transport::{channel::Channel, LinkSettings, Transport},
    ConfigError, ProtocolError, Result, Slave,
};

/// A client on top of a [`Transport`].
///
/// Requests are strictly serialized: a new request is only sent after
/// the response to the previous one has been received or timed out.
pub struct ClientContext<T: Transport> {
    transport: T,
    channel: Option<Channel<T::Stream>>,
    settings: LinkSettings,
    pdu_addressing: bool,
    transaction_id: TransactionId,
    reconnect_at: Option<Instant>,
}

impl<T: Transport> fmt::Debug for ClientContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("transport", &self.transport)
            .field("connected", &self.channel.is_some())
            .field("settings", &self.settings)
            .field("pdu_addressing", &self.pdu_addressing)
            .field("transaction_id", &self.transaction_id)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ClientContext<T> {
    /// Creates a disconnected client.
    ///
    /// The link is established by [`Client::connect()`] or on the first call.
    pub fn new(transport: T, settings: LinkSettings) -> Self {
        Self {
            transport,
            channel: None,
            settings,
            pdu_addressing: false,
            transaction_id: 1,
            reconnect_at: None,
        }
    }

    #[must_use]
    pub fn with_pdu_addressing(mut self, pdu_addressing: bool) -> Self {
        self.pdu_addressing = pdu_addressing;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub const fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Transaction id of the next TCP request.
    pub const fn next_transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn set_next_transaction_id(&mut self, transaction_id: TransactionId) {
        self.transaction_id = transaction_id;
    }

    fn next_header(&mut self, slave: Slave) -> Header {
        match self.transport.framing() {
            Framing::Rtu => Header::rtu(slave),
            Framing::Tcp => {
                let transaction_id = self.transaction_id;
                self.transaction_id = transaction_id.wrapping_add(1);
                Header::tcp(transaction_id, slave)
            }
        }
    }

    async fn ensure_connected(&mut self) -> io::Result<()> {
        if self.channel.is_some() {
            return Ok(());
        }
        if let Some(reconnect_at) = self.reconnect_at {
            tokio::time::sleep_until(reconnect_at).await;
        }
        self.connect().await
    }

    async fn transact(
        &mut self,
        slave: Slave,
        request: &Request<'_>,
        broadcast: bool,
    ) -> Result<Response> {
        self.ensure_connected().await?;
        let header = self.next_header(slave);
        let message = Message::request(header, request)?;
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "disconnected"))?;
        channel.clear_read_buffer();
        channel.send(&self.transport, message).await?;
        if broadcast {
            // Nobody answers a broadcast
            let response = request
                .write_response()
                .ok_or(ConfigError::Broadcast(request.function_code()))?;
            return Ok(Ok(response));
        }
        let response = channel
            .receive(self.settings.response_timeout, self.settings.byte_timeout)
            .await?;
        let result = response.decode_response()?;
        if let Err(message) = verify_response_header(&header, &response.header()) {
            return Err(ProtocolError::HeaderMismatch { message, result }.into());
        }
        let function = match &result {
            Ok(response) => response.function_code(),
            Err(exception) => exception.function,
        };
        if function != request.function_code() {
            return Err(ProtocolError::FunctionCodeMismatch {
                request: request.function_code(),
                result,
            }
            .into());
        }
        Ok(result.map_err(|exception| exception.exception))
    }
}

#[async_trait]
impl<T: Transport> Client for ClientContext<T> {
    async fn call(&mut self, slave: Slave, request: Request<'_>) -> Result<Response> {
        log::debug!("Call {slave} {request:?}");
        if let Request::Custom(function, _) = request {
            return Err(ConfigError::Unsupported(format!("function 0x{function:02X}")).into());
        }
        let broadcast = slave.is_broadcast() && self.transport.framing() == Framing::Rtu;
        if broadcast && !request.is_write() {
            return Err(ConfigError::Broadcast(request.function_code()).into());
        }
        let result = self.transact(slave, &request, broadcast).await;
        if let Err(err) = &result {
            if self.settings.recovery_link && err.is_link_failure() {
                log::warn!(
                    "Link failure: {err}, reconnecting in {:?}",
                    self.settings.response_timeout
                );
                if let Err(err) = self.disconnect().await {
                    log::debug!("Failed to shut down link: {err}");
                }
                self.reconnect_at = Some(Instant::now() + self.settings.response_timeout);
            }
        }
        result
    }

    async fn connect(&mut self) -> io::Result<()> {
        if self.channel.is_some() {
            return Ok(());
        }
        self.transport.open().await?;
        let (stream, peer) = self.transport.connect().await?;
        log::info!("Connected to {peer}");
        let codec = FrameCodec::client(self.transport.framing());
        self.channel = Some(Channel::new(stream, codec, self.settings.debug));
        self.reconnect_at = None;
        Ok(())
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };
        let shutdown = channel.shutdown().await;
        self.transport.close().await?;
        shutdown
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn pdu_addressing(&self) -> bool {
        self.pdu_addressing
    }
}
