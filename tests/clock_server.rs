// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A server that publishes the time of a clock in its input registers.

use std::time::Duration;

use chrono::{Datelike as _, NaiveDate, NaiveDateTime, Timelike as _};
use tokio::io::duplex;

use tokio_modbus_gateway::{
    message::Message,
    prelude::*,
    server::{CallbackContext, DataMap},
    transport::Attached,
    FunctionCode, Word,
};

const UNIT: Slave = Slave(1);

const GMT_OFFSET: i32 = 3600;

fn clock_registers(now: NaiveDateTime) -> [Word; 8] {
    let field = |value: u32| Word::try_from(value).unwrap_or_default();
    [
        field(now.second()),
        field(now.minute()),
        field(now.hour()),
        field(now.day()),
        field(now.month()),
        Word::try_from(now.year()).unwrap_or_default(),
        field(now.weekday().num_days_from_sunday()),
        field(now.ordinal()),
    ]
}

fn update_clock(map: &mut DataMap, now: NaiveDateTime) -> CallbackOutcome {
    match map.write_registers(Table::InputRegister, 1, &clock_registers(now)) {
        Ok(()) => CallbackOutcome::Continue,
        Err(err) => CallbackOutcome::Failed(err.to_string()),
    }
}

fn clock_slave(now: NaiveDateTime) -> BufferedSlave {
    let mut slave = BufferedSlave::new(UNIT);
    slave.set_block(Table::InputRegister, 8, 1);
    slave.set_block(Table::HoldingRegister, 2, 1);
    slave.set_block(Table::Coil, 1, 1);
    slave.set_before_reply_callback(
        move |message: &mut Message, ctx: &mut CallbackContext<'_>| {
            if message.function_code() == FunctionCode::ReadInputRegisters.value() {
                update_clock(ctx.map, now)
            } else {
                CallbackOutcome::Continue
            }
        },
    );
    slave
}

#[tokio::test]
async fn read_clock() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let now = NaiveDate::from_ymd_opt(2019, 11, 28)
        .and_then(|date| date.and_hms_opt(15, 40, 37))
        .unwrap();

    let (line, stream) = duplex(256);
    let mut server = Server::new(Attached::rtu(stream), LinkSettings::default());
    let slave = server.add_slave(clock_slave(now))?;
    {
        let mut map = slave.map().lock().await;
        map.write_data(
            Table::HoldingRegister,
            1,
            Data::new(GMT_OFFSET, Endian::Cdab),
        )?;
        map.write_bits(Table::Coil, 1, &[false])?;
    }
    let running = Running::start(server, Duration::from_millis(20));

    let mut ctx = ClientContext::new(Attached::rtu(line), LinkSettings::default());
    assert_eq!(
        ctx.read_input_registers(UNIT, 1, 8).await??,
        [37, 40, 15, 28, 11, 2019, 4, 332]
    );
    let offset: Data<i32> = ctx.read_holding_data(UNIT, 1, Endian::Cdab).await??;
    assert_eq!(offset.value, GMT_OFFSET);
    assert_eq!(ctx.read_holding_registers(UNIT, 1, 2).await??, [0x0E10, 0x0000]);
    assert_eq!(ctx.read_coils(UNIT, 1, 1).await??, [false]);

    // Set the daylight saving flag
    ctx.write_single_coil(UNIT, 1, true).await??;
    assert_eq!(ctx.read_coils(UNIT, 1, 1).await??, [true]);

    running.terminate().await?;
    Ok(())
}
