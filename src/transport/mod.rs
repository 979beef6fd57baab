// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte transports
//!
//! A [`Transport`] produces byte streams on which frames of a single
//! [`Framing`] are exchanged. Clients connect once and reconnect after
//! link failures, servers additionally accept new peers.

use std::{fmt, io, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::frame::Framing;

pub(crate) mod channel;
pub mod serial;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use self::serial::{Parity, RtuConfig, Rts, SerialMode, SerialSettings};
#[cfg(feature = "serial")]
pub use self::serial::SerialPort;
#[cfg(feature = "tcp")]
pub use self::tcp::{TcpAcceptor, TcpConnector};

/// Default time to wait for a response and for the next byte of a frame.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// The remote end of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    Socket(SocketAddr),
    /// A serial line, identified by its device path.
    Line(String),
    /// An in-process stream.
    Local,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(addr) => addr.fmt(f),
            Self::Line(path) => f.write_str(path),
            Self::Local => f.write_str("local"),
        }
    }
}

/// Timing and recovery of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// Maximum time between sending a request and the first byte of
    /// its response. Also bounds how long a server waits for a request.
    pub response_timeout: Duration,
    /// Maximum gap between two bytes of the same frame.
    pub byte_timeout: Duration,
    /// Close and reopen the link after a failure.
    pub recovery_link: bool,
    /// Log every frame.
    pub debug: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_TIMEOUT,
            byte_timeout: DEFAULT_TIMEOUT,
            recovery_link: false,
            debug: false,
        }
    }
}

/// A source of byte streams for a single framing.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn framing(&self) -> Framing;

    /// Acquires resources, e.g. binds a listening socket.
    async fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Establishes the next stream.
    ///
    /// Clients call this to connect, servers to accept a peer.
    async fn connect(&mut self) -> io::Result<(Self::Stream, Peer)>;

    /// Releases the resources acquired by [`Self::open()`].
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Streams end when a peer disconnects and new peers may
    /// connect later on.
    fn accepts_peers(&self) -> bool {
        false
    }

    /// Idle time that terminates a frame on the line.
    fn silent_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Invoked before a frame is written.
    async fn begin_transmit(&self, _stream: &mut Self::Stream) -> io::Result<()> {
        Ok(())
    }

    /// Invoked after a frame has been written and flushed.
    async fn end_transmit(&self, _stream: &mut Self::Stream) -> io::Result<()> {
        Ok(())
    }
}

/// A transport around an already established stream.
///
/// The stream can be taken exactly once.
pub struct Attached<S> {
    framing: Framing,
    stream: Option<S>,
}

impl<S> Attached<S> {
    pub const fn rtu(stream: S) -> Self {
        Self {
            framing: Framing::Rtu,
            stream: Some(stream),
        }
    }

    pub const fn tcp(stream: S) -> Self {
        Self {
            framing: Framing::Tcp,
            stream: Some(stream),
        }
    }
}

impl<S> fmt::Debug for Attached<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attached")
            .field("framing", &self.framing)
            .field("attached", &self.stream.is_some())
            .finish()
    }
}

#[async_trait]
impl<S> Transport for Attached<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    type Stream = S;

    fn framing(&self) -> Framing {
        self.framing
    }

    async fn connect(&mut self) -> io::Result<(S, Peer)> {
        self.stream
            .take()
            .map(|stream| (stream, Peer::Local))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream detached"))
    }
}
