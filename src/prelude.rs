// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types and traits

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::{client, server, transport};

///////////////////////////////////////////////////////////////////
/// Types
///////////////////////////////////////////////////////////////////
pub use crate::{
    client::{ClientContext, SharedClient},
    config::Config,
    data::{Data, Endian},
    router::Router,
    server::{BufferedSlave, CallbackOutcome, Polled, Running, Server, Table},
    transport::LinkSettings,
    ExceptionCode, Request, Response,
};
pub use crate::{Slave, SlaveId};

#[cfg(feature = "serial")]
pub use crate::transport::SerialPort;
#[cfg(feature = "tcp")]
pub use crate::transport::{TcpAcceptor, TcpConnector};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::client::{Client, DataAccess, Reader, Writer};
pub use crate::server::Service;
pub use crate::transport::Transport;
