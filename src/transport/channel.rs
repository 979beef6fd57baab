// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, io, time::Duration};

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    time::{timeout_at, Instant},
};
use tokio_util::codec::{Decoder as _, Encoder as _};

use super::Transport;
use crate::{codec::FrameCodec, message::Message, Error};

const INITIAL_CAPACITY: usize = 512;

/// A connected stream that exchanges whole frames.
pub(crate) struct Channel<S> {
    stream: S,
    codec: FrameCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    debug: bool,
}

impl<S> Channel<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    pub(crate) fn new(stream: S, codec: FrameCodec, debug: bool) -> Self {
        Self {
            stream,
            codec,
            read_buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            write_buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            debug,
        }
    }

    /// Writes a single frame.
    ///
    /// After the frame the line stays silent for the silent interval
    /// of the transport.
    pub(crate) async fn send<T>(&mut self, transport: &T, message: Message) -> Result<(), Error>
    where
        T: Transport<Stream = S>,
    {
        self.write_buf.clear();
        self.codec.encode(message, &mut self.write_buf)?;
        if self.debug {
            log::debug!("Sending {} frame: {:02X?}", self.codec.framing(), &self.write_buf[..]);
        }
        transport.begin_transmit(&mut self.stream).await?;
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        transport.end_transmit(&mut self.stream).await?;
        let silent_interval = transport.silent_interval();
        if !silent_interval.is_zero() {
            tokio::time::sleep(silent_interval).await;
        }
        Ok(())
    }

    /// Reads the next frame.
    ///
    /// Waits up to `response_timeout` for the first byte and up to
    /// `byte_timeout` for every following byte. Bytes of an incomplete
    /// frame are dropped on timeout.
    pub(crate) async fn receive(
        &mut self,
        response_timeout: Duration,
        byte_timeout: Duration,
    ) -> Result<Message, Error> {
        let response_deadline = Instant::now() + response_timeout;
        loop {
            if let Some(message) = self.codec.decode(&mut self.read_buf)? {
                if self.debug {
                    log::debug!(
                        "Received {} frame: {:02X?}",
                        self.codec.framing(),
                        message.adu()
                    );
                }
                return Ok(message);
            }
            let deadline = if self.read_buf.is_empty() {
                response_deadline
            } else {
                Instant::now() + byte_timeout
            };
            let read = timeout_at(deadline, self.stream.read_buf(&mut self.read_buf)).await;
            match read {
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    )
                    .into());
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    if !self.read_buf.is_empty() {
                        log::warn!(
                            "Discarding {} bytes of an incomplete {} frame",
                            self.read_buf.len(),
                            self.codec.framing()
                        );
                        self.read_buf.clear();
                    }
                    return Err(Error::Timeout);
                }
            }
        }
    }

    /// Drops stale bytes, e.g. a late response of a previous request.
    pub(crate) fn clear_read_buffer(&mut self) {
        if !self.read_buf.is_empty() {
            log::debug!("Discarding {} stale bytes", self.read_buf.len());
            self.read_buf.clear();
        }
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

impl<S> fmt::Debug for Channel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("codec", &self.codec)
            .field("buffered", &self.read_buf.len())
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}
