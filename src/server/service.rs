// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use async_trait::async_trait;

use super::Polled;
use crate::Error;

/// A Modbus server service that is driven by polling.
#[async_trait]
pub trait Service: Send + 'static {
    /// Acquires the transports of the service.
    async fn open(&mut self) -> Result<(), Error>;

    /// Releases the transports of the service.
    async fn close(&mut self) -> Result<(), Error>;

    /// Receives and handles at most one request.
    async fn poll(&mut self, timeout: Duration) -> Result<Polled, Error>;
}
