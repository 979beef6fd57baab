// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway between a server and named upstream clients

use std::{collections::BTreeMap, io, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    client::SharedClient,
    config::Config,
    server::{BufferedSlave, Polled, Server, Service},
    transport::Transport,
    ConfigError, Error,
};

/// A server whose slaves pass requests on to clients.
///
/// The router owns the clients, its slaves only refer to them.
#[derive(Debug)]
pub struct Router<T: Transport> {
    server: Server<T>,
    clients: BTreeMap<String, SharedClient>,
}

impl<T: Transport> Router<T> {
    #[must_use]
    pub const fn new(server: Server<T>) -> Self {
        Self {
            server,
            clients: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn server(&self) -> &Server<T> {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server<T> {
        &mut self.server
    }

    /// # Errors
    ///
    /// Fails if a client with the same name already exists.
    pub fn add_client(
        &mut self,
        name: impl Into<String>,
        client: SharedClient,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.clients.contains_key(&name) {
            return Err(ConfigError::DuplicateClient(name));
        }
        self.clients.insert(name, client);
        Ok(())
    }

    #[must_use]
    pub fn client(&self, name: &str) -> Option<&SharedClient> {
        self.clients.get(name)
    }

    /// Registers a slave that forwards to the client `name`.
    ///
    /// # Errors
    ///
    /// Fails for unknown clients and if the server rejects the slave.
    pub fn add_slave(
        &mut self,
        mut slave: BufferedSlave,
        name: &str,
    ) -> Result<Arc<BufferedSlave>, ConfigError> {
        let client = self
            .clients
            .get(name)
            .ok_or_else(|| ConfigError::UnknownClient(name.to_owned()))?;
        slave.set_upstream(client);
        self.server.add_slave(slave)
    }

    /// Adds the local slaves and the masters of `config`.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid entry.
    pub fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        for slave in &config.slaves {
            self.server.add_slave(slave.build()?)?;
        }
        for master in &config.masters {
            self.add_client(master.name.clone(), master.link.build_client()?)?;
            for slave in &master.slaves {
                self.add_slave(slave.build()?, &master.name)?;
            }
        }
        Ok(())
    }

    /// Connects all clients, then opens the server.
    ///
    /// # Errors
    ///
    /// If any client fails, the clients already connected are
    /// disconnected again.
    pub async fn open(&mut self) -> io::Result<()> {
        let mut connected = Vec::with_capacity(self.clients.len());
        for (name, client) in &self.clients {
            let result = client.lock().await.connect().await;
            if let Err(err) = result {
                log::warn!("Failed to connect client {name}: {err}");
                for (name, client) in connected {
                    disconnect(name, client).await;
                }
                return Err(err);
            }
            connected.push((name, client));
        }
        if let Err(err) = self.server.open().await {
            for (name, client) in connected {
                disconnect(name, client).await;
            }
            return Err(err);
        }
        log::info!("Opened router with {} client(s)", self.clients.len());
        Ok(())
    }

    /// Closes the server, then disconnects all clients.
    ///
    /// # Errors
    ///
    /// The first error, after all components have been closed.
    pub async fn close(&mut self) -> io::Result<()> {
        let mut result = self.server.close().await;
        for (name, client) in &self.clients {
            let disconnected = client.lock().await.disconnect().await;
            if let Err(err) = disconnected {
                log::warn!("Failed to disconnect client {name}: {err}");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        log::info!("Closed router");
        result
    }

    /// See [`Server::poll()`].
    ///
    /// # Errors
    ///
    /// See [`Server::poll()`].
    pub async fn poll(&mut self, timeout: Duration) -> Result<Polled, Error> {
        self.server.poll(timeout).await
    }
}

async fn disconnect(name: &str, client: &SharedClient) {
    if let Err(err) = client.lock().await.disconnect().await {
        log::debug!("Failed to disconnect client {name}: {err}");
    }
}

#[async_trait]
impl<T: Transport> Service for Router<T> {
    async fn open(&mut self) -> Result<(), Error> {
        Router::open(self).await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), Error> {
        Router::close(self).await.map_err(Into::into)
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Polled, Error> {
        Router::poll(self, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::executor::block_on;

    use super::*;
    use crate::{
        client::{shared, Client},
        frame::{Request, Response},
        server::Table,
        transport::{Attached, LinkSettings},
        Slave,
    };

    #[derive(Debug, Default)]
    struct Upstream {
        fail: bool,
        connects: Arc<AtomicUsize>,
        connected: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Client for Upstream {
        async fn call(&mut self, _: Slave, _: Request<'_>) -> crate::Result<Response> {
            Err(Error::Timeout)
        }

        async fn connect(&mut self) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&mut self) -> io::Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn router() -> Router<Attached<tokio::io::DuplexStream>> {
        let (_, stream) = tokio::io::duplex(64);
        Router::new(Server::new(Attached::tcp(stream), LinkSettings::default()))
    }

    #[test]
    fn register_slaves() {
        let mut router = router();
        let client = shared(Upstream::default());
        router.add_client("inside", Arc::clone(&client)).unwrap();
        assert!(matches!(
            router.add_client("inside", Arc::clone(&client)),
            Err(ConfigError::DuplicateClient(_))
        ));

        let mut slave = BufferedSlave::new(Slave(33));
        slave.set_block(Table::InputRegister, 6, 1);
        let slave = router.add_slave(slave, "inside").unwrap();
        assert!(Arc::ptr_eq(&slave.upstream().unwrap(), &client));
        assert!(matches!(
            router.add_slave(BufferedSlave::new(Slave(34)), "outside"),
            Err(ConfigError::UnknownClient(_))
        ));

        // Slaves do not keep clients alive
        drop(client);
        drop(router);
        assert!(slave.upstream().is_none());
    }

    #[test]
    fn roll_back_failed_open() {
        let mut router = router();
        let connected = Arc::new(AtomicBool::new(false));
        router
            .add_client(
                "a",
                shared(Upstream {
                    connected: Arc::clone(&connected),
                    ..Default::default()
                }),
            )
            .unwrap();
        router
            .add_client(
                "b",
                shared(Upstream {
                    fail: true,
                    ..Default::default()
                }),
            )
            .unwrap();
        assert!(block_on(router.open()).is_err());
        assert!(!connected.load(Ordering::SeqCst));
        assert!(!router.server().is_open());
    }

    #[test]
    fn open_and_close() {
        let mut router = router();
        let connects = Arc::new(AtomicUsize::new(0));
        let connected = Arc::new(AtomicBool::new(false));
        router
            .add_client(
                "a",
                shared(Upstream {
                    connects: Arc::clone(&connects),
                    connected: Arc::clone(&connected),
                    ..Default::default()
                }),
            )
            .unwrap();
        block_on(router.open()).unwrap();
        assert!(router.server().is_open());
        assert!(connected.load(Ordering::SeqCst));
        block_on(router.close()).unwrap();
        assert!(!router.server().is_open());
        assert!(!connected.load(Ordering::SeqCst));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }
}
