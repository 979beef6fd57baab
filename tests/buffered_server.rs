// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execute this test only if the `tcp` feature is selected.

#![cfg(feature = "tcp")]

use std::time::Duration;

use tokio::{
    io::{duplex, AsyncReadExt as _, AsyncWriteExt as _, DuplexStream},
    net::TcpStream,
};

use tokio_modbus_gateway::{prelude::*, transport::Attached};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn holding_slave() -> BufferedSlave {
    let mut slave = BufferedSlave::new(Slave(0x21));
    slave.set_block(Table::HoldingRegister, 4, 1);
    slave
}

type RtuServer = Server<Attached<DuplexStream>>;

async fn rtu_server() -> anyhow::Result<(Running<RtuServer>, DuplexStream)> {
    let (client, stream) = duplex(256);
    let mut server = Server::new(Attached::rtu(stream), LinkSettings::default());
    let slave = server.add_slave(holding_slave())?;
    slave.map().lock().await.write_registers(
        Table::HoldingRegister,
        1,
        &[0x1234, 0x5678, 0x9ABC, 0xDEF0],
    )?;
    Ok((Running::start(server, POLL_INTERVAL), client))
}

#[tokio::test]
async fn rtu_read_holding_registers_on_the_wire() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (running, mut stream) = rtu_server().await?;
    stream
        .write_all(&[0x21, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC3, 0x6B])
        .await?;
    let mut response = [0; 9];
    tokio::time::timeout(Duration::from_secs(1), stream.read_exact(&mut response)).await??;
    assert_eq!(
        response,
        [0x21, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78, 0xA0, 0xC5]
    );

    running.terminate().await?;
    Ok(())
}

#[tokio::test]
async fn rtu_client_reads_and_fails() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (running, stream) = rtu_server().await?;
    let mut ctx = ClientContext::new(Attached::rtu(stream), LinkSettings::default());

    let words = ctx.read_holding_registers(Slave(0x21), 1, 2).await??;
    assert_eq!(words, [0x1234, 0x5678]);

    // Beyond the block
    let response = ctx.read_holding_registers(Slave(0x21), 4, 2).await?;
    assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));

    // The link survives exceptions
    let words = ctx.read_holding_registers(Slave(0x21), 4, 1).await??;
    assert_eq!(words, [0xDEF0]);

    let server = running.terminate().await?;
    assert!(!server.is_open());
    Ok(())
}

#[tokio::test]
async fn rtu_float_round_trip() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (running, stream) = rtu_server().await?;
    let mut ctx = ClientContext::new(Attached::rtu(stream), LinkSettings::default());

    let written = Data::new(152.3_f32, Endian::Cdab);
    ctx.write_holding_data(Slave(0x21), 3, written).await??;
    let read: Data<f32> = ctx
        .read_holding_data(Slave(0x21), 3, Endian::Cdab)
        .await??;
    assert_eq!(read.value.to_bits(), 152.3_f32.to_bits());

    let server = running.terminate().await?;
    let slave = server.slave(Slave(0x21)).unwrap();
    let map = slave.map().lock().await;
    assert_eq!(
        map.read_registers(Table::HoldingRegister, 1, 2)?,
        [0x1234, 0x5678]
    );
    assert_eq!(
        map.read_data::<f32>(Table::HoldingRegister, 3, Endian::Cdab)?,
        written
    );
    Ok(())
}

async fn tcp_server() -> anyhow::Result<(Running<Server<TcpAcceptor>>, std::net::SocketAddr)> {
    let mut server = Server::new(
        TcpAcceptor::new("127.0.0.1:0".parse()?),
        LinkSettings::default(),
    );
    let mut slave = BufferedSlave::new(Slave(0x0A));
    slave.set_block(Table::Coil, 8, 1);
    server.add_slave(slave)?;
    server.open().await?;
    let addr = server.local_addr();
    Ok((Running::start(server, POLL_INTERVAL), addr))
}

#[tokio::test]
async fn tcp_write_single_coil_on_the_wire() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (running, addr) = tcp_server().await?;
    let request = [
        0x00, 0x14, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x05, 0x00, 0x04, 0xFF, 0x00,
    ];
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&request).await?;
    let mut response = [0; 12];
    tokio::time::timeout(Duration::from_secs(1), stream.read_exact(&mut response)).await??;
    assert_eq!(response, request);
    drop(stream);

    let server = running.terminate().await?;
    let slave = server.slave(Slave(0x0A)).unwrap();
    let coils = slave.map().lock().await.read_bits(Table::Coil, 1, 8)?;
    assert_eq!(
        coils,
        [false, false, false, false, true, false, false, false]
    );
    Ok(())
}

#[tokio::test]
async fn tcp_clients_one_after_another() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (running, addr) = tcp_server().await?;

    let mut first = ClientContext::new(TcpConnector::from(addr), LinkSettings::default());
    first.set_next_transaction_id(0x0014);
    first.write_single_coil(Slave(0x0A), 5, true).await??;
    assert_eq!(first.next_transaction_id(), 0x0015);
    first.disconnect().await?;

    let mut second = ClientContext::new(TcpConnector::from(addr), LinkSettings::default());
    let coils = second.read_coils(Slave(0x0A), 1, 8).await??;
    assert!(coils[4]);
    assert_eq!(
        second.read_coils(Slave(0x0A), 8, 2).await?,
        Err(ExceptionCode::IllegalDataAddress)
    );
    // Not served by this server
    assert_eq!(
        second.read_coils(Slave(0x0B), 1, 1).await?,
        Err(ExceptionCode::GatewayTargetDevice)
    );
    second.disconnect().await?;

    running.terminate().await?;
    Ok(())
}
