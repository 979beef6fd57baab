// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{io, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Service;
use crate::Error;

/// A service polled by a background task.
#[derive(Debug)]
pub struct Running<S> {
    token: CancellationToken,
    handle: JoinHandle<Result<S, Error>>,
}

impl<S: Service> Running<S> {
    /// Opens `service` and polls it in a spawned task.
    ///
    /// The stop request is checked after every poll round, i.e. at least
    /// once per `poll_interval` plus the time to handle a request.
    #[must_use]
    pub fn start(service: S, poll_interval: Duration) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(service, poll_interval, token.clone()));
        Self { token, handle }
    }

    /// The task stopped, either terminated or on an error.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops polling and closes the service.
    ///
    /// Returns the service to allow restarting it.
    ///
    /// # Errors
    ///
    /// The error that stopped the task.
    pub async fn terminate(self) -> Result<S, Error> {
        self.token.cancel();
        self.handle
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
    }
}

async fn run<S: Service>(
    mut service: S,
    poll_interval: Duration,
    token: CancellationToken,
) -> Result<S, Error> {
    service.open().await?;
    while !token.is_cancelled() {
        if let Err(err) = service.poll(poll_interval).await {
            log::error!("Stopped polling: {err}");
            if let Err(err) = service.close().await {
                log::warn!("Failed to close: {err}");
            }
            return Err(err);
        }
    }
    service.close().await?;
    Ok(service)
}
