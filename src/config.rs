// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration records
//!
//! Loading is left to the application, e.g. by deserializing a JSON
//! document with the `serde` feature enabled.

use std::time::Duration;

use crate::{
    client::SharedClient,
    frame::{Address, Quantity},
    server::{BufferedSlave, Table},
    slave::SlaveId,
    transport::{LinkSettings, RtuConfig, SerialSettings},
    ConfigError, Slave,
};

/// Framing of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Mode {
    Rtu,
    #[default]
    Tcp,
}

/// Settings of a single client or server link.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct LinkConfig {
    pub mode: Mode,
    /// Host name or address for TCP, device path for RTU.
    pub connection: String,
    /// Port for TCP, line settings like `"19200E1"` for RTU.
    pub settings: String,
    pub recovery_link: bool,
    pub debug: bool,
    pub response_timeout_ms: u64,
    pub byte_timeout_ms: u64,
    pub rtu: RtuConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            connection: "127.0.0.1".to_owned(),
            settings: String::new(),
            recovery_link: false,
            debug: false,
            response_timeout_ms: 500,
            byte_timeout_ms: 500,
            rtu: RtuConfig::default(),
        }
    }
}

impl From<&LinkConfig> for LinkSettings {
    fn from(from: &LinkConfig) -> Self {
        Self {
            response_timeout: Duration::from_millis(from.response_timeout_ms),
            byte_timeout: Duration::from_millis(from.byte_timeout_ms),
            recovery_link: from.recovery_link,
            debug: from.debug,
        }
    }
}

impl From<&Config> for LinkSettings {
    fn from(from: &Config) -> Self {
        Self::from(&from.link)
    }
}

impl LinkConfig {
    fn expect_mode(&self, mode: Mode) -> Result<(), ConfigError> {
        if self.mode != mode {
            return Err(ConfigError::Unsupported(format!(
                "{:?} link configured as {:?}",
                mode, self.mode
            )));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails if the settings string is invalid.
    pub fn serial_settings(&self) -> Result<SerialSettings, ConfigError> {
        if self.settings.trim().is_empty() {
            return Ok(SerialSettings::default());
        }
        self.settings.parse()
    }

    /// # Errors
    ///
    /// Fails for non-TCP links and invalid connection strings.
    #[cfg(feature = "tcp")]
    pub fn tcp_connector(&self) -> Result<crate::transport::TcpConnector, ConfigError> {
        self.expect_mode(Mode::Tcp)?;
        crate::transport::TcpConnector::from_connection(&self.connection, &self.settings)
    }

    /// # Errors
    ///
    /// Fails for non-TCP links and if the connection is not an address.
    #[cfg(feature = "tcp")]
    pub fn tcp_acceptor(&self) -> Result<crate::transport::TcpAcceptor, ConfigError> {
        self.expect_mode(Mode::Tcp)?;
        crate::transport::TcpAcceptor::from_connection(&self.connection, &self.settings)
    }

    /// # Errors
    ///
    /// Fails for non-RTU links and invalid line settings.
    #[cfg(feature = "serial")]
    pub fn serial_port(&self) -> Result<crate::transport::SerialPort, ConfigError> {
        self.expect_mode(Mode::Rtu)?;
        Ok(crate::transport::SerialPort::new(
            self.connection.clone(),
            self.serial_settings()?,
            self.rtu,
        ))
    }

    /// Builds a disconnected client for this link.
    ///
    /// # Errors
    ///
    /// Fails on invalid settings and if the transport of the mode is
    /// not compiled in.
    pub fn build_client(&self) -> Result<SharedClient, ConfigError> {
        let settings = LinkSettings::from(self);
        match self.mode {
            #[cfg(feature = "tcp")]
            Mode::Tcp => Ok(crate::client::shared(crate::client::ClientContext::new(
                self.tcp_connector()?,
                settings,
            ))),
            #[cfg(feature = "serial")]
            Mode::Rtu => Ok(crate::client::shared(crate::client::ClientContext::new(
                self.serial_port()?,
                settings,
            ))),
            #[allow(unreachable_patterns)]
            mode => {
                let _ = settings;
                Err(ConfigError::Unsupported(format!("{mode:?} transport")))
            }
        }
    }
}

/// A block of a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockConfig {
    pub table: Table,
    pub starting_address: Address,
    pub quantity: Quantity,
}

/// A buffered slave with its blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlaveConfig {
    pub id: SlaveId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub pdu_addressing: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub blocks: Vec<BlockConfig>,
}

impl SlaveConfig {
    /// # Errors
    ///
    /// Fails for ids outside the device range.
    pub fn build(&self) -> Result<BufferedSlave, ConfigError> {
        let id = Slave(self.id);
        if !id.is_single_device() && id != Slave::tcp_device() {
            return Err(ConfigError::InvalidSlave(id));
        }
        let mut slave = BufferedSlave::new(id).with_pdu_addressing(self.pdu_addressing);
        for block in &self.blocks {
            slave.set_block(block.table, block.quantity.into(), block.starting_address);
        }
        Ok(slave)
    }
}

/// An upstream client of a router and the slaves it serves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MasterConfig {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub link: LinkConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub slaves: Vec<SlaveConfig>,
}

/// A server or router.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Config {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub link: LinkConfig,
    pub slaves: Vec<SlaveConfig>,
    pub masters: Vec<MasterConfig>,
}
