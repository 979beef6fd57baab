// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [Modbus](https://en.wikipedia.org/wiki/Modbus) client, buffered
//! server and gateway based on [tokio](https://tokio.rs).
//!
//! Modbus is based on a [master/slave](https://en.wikipedia.org/wiki/Master/slave_(technology))
//! model.
//! To avoid confusions with the tokio terminology the master is called *client*
//! and the slave is called *server* in this library.
//!
//! A [`server::Server`] answers requests for its [`server::BufferedSlave`]s
//! from their data maps. A [`router::Router`] is a server whose slaves
//! fetch and forward data through upstream [`client::Client`]s, e.g. to
//! connect Modbus TCP clients to devices on a serial line.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tokio-modbus-gateway = "*"
//! ```

pub mod prelude;

pub mod client;
pub mod codec;
pub mod config;
pub mod data;
pub mod message;
pub mod router;
pub mod server;
pub mod transport;

mod error;
pub use self::error::{ConfigError, Error, ProtocolError};

mod frame;
pub use self::frame::*;

mod slave;
pub use self::slave::{Slave, SlaveId};

/// Specialized [`std::result::Result`] type for Modbus client API.
///
/// The outer layer carries transport, protocol, timeout and configuration
/// errors, the inner layer the exception responses of the server.
pub type Result<T> = std::result::Result<std::result::Result<T, ExceptionCode>, Error>;
