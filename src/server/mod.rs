// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus server with buffered slaves

use std::{collections::BTreeMap, fmt, io, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    codec::FrameCodec,
    frame::{ExceptionCode, ExceptionResponse, FunctionCode, Framing},
    message::Message,
    transport::{channel::Channel, LinkSettings, Peer, Transport},
    ConfigError, Error, Slave,
};

mod run;
mod service;
mod slave;

pub use self::{
    run::Running,
    service::Service,
    slave::{
        Block, BufferedSlave, CallbackContext, CallbackOutcome, DataMap, ReplyCallback, Table,
    },
};

/// Result of a single [`Server::poll()`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polled {
    /// Nothing arrived in time.
    Idle,
    /// A request was executed, replied to unless suppressed.
    Handled,
    /// A frame was dropped without reply.
    Discarded,
    /// The link was closed and will be re-established.
    Closed,
}

struct Link<S> {
    channel: Channel<S>,
    peer: Peer,
}

impl<S> fmt::Debug for Link<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("channel", &self.channel)
            .field("peer", &self.peer)
            .finish()
    }
}

enum Dispatch {
    Reply(Message),
    NoReply,
    Discard,
}

/// Answers requests for its slaves on a single transport.
///
/// One peer is served at a time.
pub struct Server<T: Transport> {
    transport: T,
    settings: LinkSettings,
    slaves: BTreeMap<Slave, Arc<BufferedSlave>>,
    link: Option<Link<T::Stream>>,
    is_open: bool,
}

impl<T: Transport> fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("transport", &self.transport)
            .field("settings", &self.settings)
            .field("slaves", &self.slaves.keys().collect::<Vec<_>>())
            .field("link", &self.link)
            .field("is_open", &self.is_open)
            .finish()
    }
}

impl<T: Transport> Server<T> {
    #[must_use]
    pub fn new(transport: T, settings: LinkSettings) -> Self {
        Self {
            transport,
            settings,
            slaves: BTreeMap::new(),
            link: None,
            is_open: false,
        }
    }

    /// Registers a slave under its id.
    ///
    /// # Errors
    ///
    /// Fails for duplicate ids, broadcast and reserved ids except
    /// [`Slave::tcp_device()`].
    pub fn add_slave(&mut self, slave: BufferedSlave) -> Result<Arc<BufferedSlave>, ConfigError> {
        let id = slave.id();
        if !id.is_single_device() && id != Slave::tcp_device() {
            return Err(ConfigError::InvalidSlave(id));
        }
        if self.slaves.contains_key(&id) {
            return Err(ConfigError::DuplicateSlave(id));
        }
        let slave = Arc::new(slave);
        self.slaves.insert(id, Arc::clone(&slave));
        Ok(slave)
    }

    #[must_use]
    pub fn slave(&self, id: Slave) -> Option<&Arc<BufferedSlave>> {
        self.slaves.get(&id)
    }

    pub fn slaves(&self) -> impl Iterator<Item = &Arc<BufferedSlave>> {
        self.slaves.values()
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub const fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.is_open
    }

    /// The peer of the current link.
    #[must_use]
    pub fn peer(&self) -> Option<&Peer> {
        self.link.as_ref().map(|link| &link.peer)
    }

    /// Starts listening, or opens the line on the first poll.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot be opened.
    pub async fn open(&mut self) -> io::Result<()> {
        if self.is_open {
            return Ok(());
        }
        self.transport.open().await?;
        self.is_open = true;
        log::info!(
            "Opened {} server with {} slave(s)",
            self.transport.framing(),
            self.slaves.len()
        );
        Ok(())
    }

    /// Closes the current link and the listening endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot be closed.
    pub async fn close(&mut self) -> io::Result<()> {
        if let Some(mut link) = self.link.take() {
            if let Err(err) = link.channel.shutdown().await {
                log::debug!("Failed to shut down link to {}: {err}", link.peer);
            }
        }
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        self.transport.close().await?;
        log::info!("Closed {} server", self.transport.framing());
        Ok(())
    }

    /// Receives and handles at most one request.
    ///
    /// Waits up to `timeout` for a peer and for the first byte of a request.
    ///
    /// # Errors
    ///
    /// Transport errors are returned unless the link is recovered.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Polled, Error> {
        if !self.is_open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "server is not open").into());
        }
        if self.link.is_none() {
            match self.accept(timeout).await {
                Ok(Some(link)) => self.link = Some(link),
                Ok(None) => return Ok(Polled::Idle),
                Err(err) => return self.recover(err).await,
            }
        }
        let framing = self.transport.framing();
        let Some(link) = self.link.as_mut() else {
            return Ok(Polled::Idle);
        };
        let request = match link.channel.receive(timeout, self.settings.byte_timeout).await {
            Ok(request) => request,
            Err(Error::Timeout) => return Ok(Polled::Idle),
            Err(err) if err.is_framing() => {
                log::warn!("Discarding frame from {}: {err}", link.peer);
                if framing == Framing::Tcp {
                    // The stream cannot be resynchronized
                    self.link = None;
                }
                return Ok(Polled::Discarded);
            }
            Err(err) => return self.recover(err).await,
        };
        let reply = match dispatch(&self.slaves, framing, &link.peer, request).await {
            Dispatch::Reply(reply) => reply,
            Dispatch::NoReply => return Ok(Polled::Handled),
            Dispatch::Discard => return Ok(Polled::Discarded),
        };
        if let Err(err) = link.channel.send(&self.transport, reply).await {
            return self.recover(err).await;
        }
        Ok(Polled::Handled)
    }

    async fn accept(&mut self, timeout: Duration) -> Result<Option<Link<T::Stream>>, Error> {
        let accepts_peers = self.transport.accepts_peers();
        let connect = self.transport.connect();
        let (stream, peer) = if accepts_peers {
            match tokio::time::timeout(timeout, connect).await {
                Ok(connected) => connected?,
                Err(_) => return Ok(None),
            }
        } else {
            connect.await?
        };
        log::debug!("Serving {peer}");
        let codec = FrameCodec::server(self.transport.framing());
        Ok(Some(Link {
            channel: Channel::new(stream, codec, self.settings.debug),
            peer,
        }))
    }

    async fn recover(&mut self, err: Error) -> Result<Polled, Error> {
        let peer = self.link.take().map(|link| link.peer);
        let disconnected =
            matches!(&err, Error::Transport(err) if err.kind() == io::ErrorKind::UnexpectedEof);
        if disconnected && self.transport.accepts_peers() {
            if let Some(peer) = peer {
                log::debug!("{peer} disconnected");
            }
            return Ok(Polled::Closed);
        }
        if !self.settings.recovery_link {
            return Err(err);
        }
        log::warn!(
            "Link failure: {err}, reopening in {:?}",
            self.settings.response_timeout
        );
        self.transport.close().await?;
        tokio::time::sleep(self.settings.response_timeout).await;
        self.transport.open().await?;
        Ok(Polled::Closed)
    }
}

#[cfg(feature = "tcp")]
impl Server<crate::transport::TcpAcceptor> {
    /// The listening address, with the actual port once open.
    #[must_use]
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.transport.local_addr()
    }
}

fn target(
    slaves: &BTreeMap<Slave, Arc<BufferedSlave>>,
    framing: Framing,
    unit: Slave,
) -> Option<&Arc<BufferedSlave>> {
    slaves.get(&unit).or_else(|| {
        // Directly connected device
        if framing == Framing::Tcp && unit == Slave::tcp_device() && slaves.len() == 1 {
            slaves.values().next()
        } else {
            None
        }
    })
}

async fn dispatch(
    slaves: &BTreeMap<Slave, Arc<BufferedSlave>>,
    framing: Framing,
    peer: &Peer,
    request: Message,
) -> Dispatch {
    let unit = request.slave();
    let function = request.function_code();
    if function >= 0x80 {
        log::trace!("Ignoring function 0x{function:02X} from {peer}");
        return Dispatch::Discard;
    }
    if framing == Framing::Rtu && unit.is_broadcast() {
        return match request.decode_request() {
            Ok(decoded) if decoded.is_write() => {
                log::trace!("Broadcasting {decoded:?} to {} slave(s)", slaves.len());
                for slave in slaves.values() {
                    // Broadcasts are never answered
                    let Some(reply) = slave.process(peer, request.clone()).await else {
                        continue;
                    };
                    if let Ok(Err(exception)) = reply.decode_response() {
                        log::warn!("Slave {} failed to execute broadcast: {exception}", slave.id());
                    }
                }
                Dispatch::NoReply
            }
            _ => {
                log::trace!("Ignoring broadcast of function 0x{function:02X}");
                Dispatch::Discard
            }
        };
    }
    let Some(slave) = target(slaves, framing, unit) else {
        return match framing {
            Framing::Rtu => {
                log::trace!("Ignoring request for unknown slave {unit}");
                Dispatch::Discard
            }
            Framing::Tcp => {
                log::trace!("No target for slave {unit}");
                let exception = ExceptionResponse {
                    function: FunctionCode::new(function),
                    exception: ExceptionCode::GatewayTargetDevice,
                };
                match request.reply(&Err(exception)) {
                    Ok(reply) => Dispatch::Reply(reply),
                    Err(err) => {
                        log::error!("Failed to build exception reply: {err}");
                        Dispatch::Discard
                    }
                }
            }
        };
    };
    log::trace!("Dispatching function 0x{function:02X} to slave {}", slave.id());
    match slave.process(peer, request).await {
        Some(reply) => Dispatch::Reply(reply),
        None => Dispatch::NoReply,
    }
}

#[async_trait]
impl<T: Transport> Service for Server<T> {
    async fn open(&mut self) -> Result<(), Error> {
        Server::open(self).await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), Error> {
        Server::close(self).await.map_err(Into::into)
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Polled, Error> {
        Server::poll(self, timeout).await
    }
}
