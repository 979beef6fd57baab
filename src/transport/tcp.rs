// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP transports

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use socket2::{Domain, Socket, Type};
use tokio::net::{lookup_host, TcpListener, TcpStream};

use super::{Peer, Transport};
use crate::{frame::Framing, ConfigError};

/// The registered service port.
pub const DEFAULT_PORT: u16 = 502;

/// Splits a connection string into host and port.
///
/// A port within `connection` takes precedence over `settings`, which
/// may carry a bare port number.
///
/// # Errors
///
/// Fails if a port is not a valid number.
pub fn parse_connection(connection: &str, settings: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::Connection(format!("{connection} {settings}"));
    // IPv6 literals must be enclosed in brackets when followed by a port
    if let Some((host, port)) = connection.rsplit_once(':') {
        if !host.contains(':') || host.ends_with(']') {
            let port = port.parse().map_err(|_| invalid())?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            return Ok((host.to_owned(), port));
        }
    }
    let settings = settings.trim();
    let port = if settings.is_empty() {
        DEFAULT_PORT
    } else {
        settings.parse().map_err(|_| invalid())?
    };
    Ok((connection.to_owned(), port))
}

/// Connects to a remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// # Errors
    ///
    /// See [`parse_connection()`].
    pub fn from_connection(connection: &str, settings: &str) -> Result<Self, ConfigError> {
        let (host, port) = parse_connection(connection, settings)?;
        Ok(Self::new(host, port))
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for TcpConnector {
    fn from(from: SocketAddr) -> Self {
        Self::new(from.ip().to_string(), from.port())
    }
}

#[async_trait]
impl Transport for TcpConnector {
    type Stream = TcpStream;

    fn framing(&self) -> Framing {
        Framing::Tcp
    }

    async fn connect(&mut self) -> io::Result<(TcpStream, Peer)> {
        let mut last_err = None;
        for addr in lookup_host((self.host.as_str(), self.port)).await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok((stream, Peer::Socket(addr)));
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {}:{}", self.host, self.port),
            )
        }))
    }
}

/// Start TCP listener - configure and open TCP socket
fn listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

/// Accepts one peer after another on a listening socket.
#[derive(Debug)]
pub struct TcpAcceptor {
    addr: SocketAddr,
    listener: Option<TcpListener>,
}

impl TcpAcceptor {
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            listener: None,
        }
    }

    /// # Errors
    ///
    /// Fails if the connection string does not denote a socket address.
    pub fn from_connection(connection: &str, settings: &str) -> Result<Self, ConfigError> {
        let (host, port) = parse_connection(connection, settings)?;
        let ip = host
            .parse()
            .map_err(|_| ConfigError::Connection(format!("invalid listen address: {host}")))?;
        Ok(Self::new(SocketAddr::new(ip, port)))
    }

    /// The bound address while open, otherwise the configured one.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .unwrap_or(self.addr)
    }
}

#[async_trait]
impl Transport for TcpAcceptor {
    type Stream = TcpStream;

    fn framing(&self) -> Framing {
        Framing::Tcp
    }

    async fn open(&mut self) -> io::Result<()> {
        if self.listener.is_none() {
            let listener = listener(self.addr)?;
            // Reopen on the same port after recovery
            self.addr = listener.local_addr()?;
            log::info!("Listening on {}", self.addr);
            self.listener = Some(listener);
        }
        Ok(())
    }

    async fn connect(&mut self) -> io::Result<(TcpStream, Peer)> {
        let Some(listener) = &self.listener else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener not open",
            ));
        };
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, Peer::Socket(addr)))
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.listener.take().is_some() {
            log::info!("Stopped listening on {}", self.addr);
        }
        Ok(())
    }

    fn accepts_peers(&self) -> bool {
        true
    }
}
