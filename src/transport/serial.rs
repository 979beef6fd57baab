// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serial line settings and transport

use std::{fmt, str::FromStr, time::Duration};

use crate::ConfigError;

/// Parity bit of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Data bits per character.
const DATA_BITS: u32 = 8;

/// Line settings, parsed from strings like `"19200E1"` or `"9600N"`.
///
/// Stop bits default to 2 without parity and to 1 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 19200,
            parity: Parity::Even,
            stop_bits: 1,
        }
    }
}

impl SerialSettings {
    /// Start bit, data bits, parity and stop bits.
    #[must_use]
    pub const fn bits_per_character(&self) -> u32 {
        let parity_bits = match self.parity {
            Parity::None => 0,
            Parity::Even | Parity::Odd => 1,
        };
        1 + DATA_BITS + parity_bits + self.stop_bits as u32
    }

    /// Time needed to transmit a single character.
    #[must_use]
    pub fn character_time(&self) -> Duration {
        let micros = u64::from(self.bits_per_character()) * 1_000_000 / u64::from(self.baud_rate);
        Duration::from_micros(micros)
    }

    /// Minimum idle time between two frames.
    ///
    /// 3.5 character times, but fixed to 1750 µs above 19200 baud.
    #[must_use]
    pub fn silent_interval(&self) -> Duration {
        if self.baud_rate > 19200 {
            Duration::from_micros(1750)
        } else {
            self.character_time() * 7 / 2
        }
    }
}

impl FromStr for SerialSettings {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::SerialSettings(format!("{s:?}: {reason}"));
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid("missing parity"))?;
        let (baud_rate, rest) = s.split_at(split);
        let baud_rate: u32 = baud_rate.parse().map_err(|_| invalid("invalid baud rate"))?;
        if baud_rate == 0 {
            return Err(invalid("invalid baud rate"));
        }
        let mut rest = rest.chars();
        let parity = match rest.next().map(|c| c.to_ascii_uppercase()) {
            Some('N') => Parity::None,
            Some('E') => Parity::Even,
            Some('O') => Parity::Odd,
            _ => return Err(invalid("invalid parity")),
        };
        let stop_bits = match rest.as_str() {
            "" if parity == Parity::None => 2,
            "" | "1" => 1,
            "2" => 2,
            _ => return Err(invalid("invalid stop bits")),
        };
        Ok(Self {
            baud_rate,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(f, "{}{}{}", self.baud_rate, parity, self.stop_bits)
    }
}

/// Electrical interface of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum SerialMode {
    #[default]
    Rs232,
    Rs485,
}

/// Level of the RTS line while transmitting on RS-485.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Rts {
    #[default]
    None,
    Up,
    Down,
}

/// RTU specific line options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RtuConfig {
    pub mode: SerialMode,
    pub rts: Rts,
    /// Delay between toggling RTS and the first/last bit of a frame.
    pub rts_delay_us: u32,
}

impl RtuConfig {
    /// The RTS line is toggled around every frame.
    #[must_use]
    pub fn toggles_rts(&self) -> bool {
        self.mode == SerialMode::Rs485 && self.rts != Rts::None
    }

    #[must_use]
    pub fn rts_delay(&self) -> Duration {
        Duration::from_micros(self.rts_delay_us.into())
    }
}

#[cfg(feature = "serial")]
pub use self::port::SerialPort;

#[cfg(feature = "serial")]
mod port {
    use std::io;

    use async_trait::async_trait;
    use tokio_serial::{SerialPort as _, SerialStream};

    use super::{Parity, Rts, RtuConfig, SerialSettings};
    use crate::{
        frame::Framing,
        transport::{Peer, Transport},
    };

    /// Time to let the driver settle after opening a port.
    const OPEN_DELAY_MS: u64 = 20;

    /// A serial line device.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SerialPort {
        path: String,
        settings: SerialSettings,
        rtu: RtuConfig,
    }

    impl SerialPort {
        #[must_use]
        pub fn new(path: impl Into<String>, settings: SerialSettings, rtu: RtuConfig) -> Self {
            Self {
                path: path.into(),
                settings,
                rtu,
            }
        }

        #[must_use]
        pub fn path(&self) -> &str {
            &self.path
        }

        #[must_use]
        pub const fn settings(&self) -> SerialSettings {
            self.settings
        }

        fn builder(&self) -> tokio_serial::SerialPortBuilder {
            let parity = match self.settings.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Even => tokio_serial::Parity::Even,
                Parity::Odd => tokio_serial::Parity::Odd,
            };
            let stop_bits = if self.settings.stop_bits == 2 {
                tokio_serial::StopBits::Two
            } else {
                tokio_serial::StopBits::One
            };
            tokio_serial::new(&self.path, self.settings.baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(parity)
                .stop_bits(stop_bits)
                .flow_control(tokio_serial::FlowControl::None)
        }

        fn set_rts(&self, stream: &mut SerialStream, transmitting: bool) -> io::Result<()> {
            let level = (self.rtu.rts == Rts::Up) == transmitting;
            stream.write_request_to_send(level).map_err(io::Error::from)
        }
    }

    #[async_trait]
    impl Transport for SerialPort {
        type Stream = SerialStream;

        fn framing(&self) -> Framing {
            Framing::Rtu
        }

        async fn connect(&mut self) -> io::Result<(SerialStream, Peer)> {
            let stream = SerialStream::open(&self.builder()).map_err(io::Error::from)?;
            log::info!("Opened serial port {} ({})", self.path, self.settings);
            tokio::time::sleep(std::time::Duration::from_millis(OPEN_DELAY_MS)).await;
            Ok((stream, Peer::Line(self.path.clone())))
        }

        fn silent_interval(&self) -> std::time::Duration {
            self.settings.silent_interval()
        }

        async fn begin_transmit(&self, stream: &mut SerialStream) -> io::Result<()> {
            if self.rtu.toggles_rts() {
                self.set_rts(stream, true)?;
                tokio::time::sleep(self.rtu.rts_delay()).await;
            }
            Ok(())
        }

        async fn end_transmit(&self, stream: &mut SerialStream) -> io::Result<()> {
            if self.rtu.toggles_rts() {
                tokio::time::sleep(self.rtu.rts_delay()).await;
                self.set_rts(stream, false)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_settings() {
        assert_eq!(
            "19200E1".parse::<SerialSettings>().unwrap(),
            SerialSettings {
                baud_rate: 19200,
                parity: Parity::Even,
                stop_bits: 1,
            }
        );
        assert_eq!(
            "9600N".parse::<SerialSettings>().unwrap(),
            SerialSettings {
                baud_rate: 9600,
                parity: Parity::None,
                stop_bits: 2,
            }
        );
        assert_eq!(
            "115200o".parse::<SerialSettings>().unwrap(),
            SerialSettings {
                baud_rate: 115_200,
                parity: Parity::Odd,
                stop_bits: 1,
            }
        );
        assert_eq!("38400N1".parse::<SerialSettings>().unwrap().stop_bits, 1);
    }

    #[test]
    fn reject_invalid_settings() {
        for s in ["", "19200", "E1", "19200X1", "19200E3", "0N1", "19200E12"] {
            assert!(
                matches!(s.parse::<SerialSettings>(), Err(ConfigError::SerialSettings(_))),
                "{s}"
            );
        }
    }

    #[test]
    fn format_settings() {
        assert_eq!(SerialSettings::default().to_string(), "19200E1");
        assert_eq!("9600N".parse::<SerialSettings>().unwrap().to_string(), "9600N2");
    }

    #[test]
    fn timing() {
        let settings: SerialSettings = "9600E1".parse().unwrap();
        assert_eq!(settings.bits_per_character(), 11);
        assert_eq!(settings.character_time(), Duration::from_micros(1145));
        assert_eq!(settings.silent_interval(), Duration::from_nanos(4_007_500));

        let settings: SerialSettings = "115200N1".parse().unwrap();
        assert_eq!(settings.silent_interval(), Duration::from_micros(1750));
    }

    #[test]
    fn rts_toggling() {
        let rtu = RtuConfig {
            mode: SerialMode::Rs485,
            rts: Rts::Up,
            rts_delay_us: 100,
        };
        assert!(rtu.toggles_rts());
        assert_eq!(rtu.rts_delay(), Duration::from_micros(100));
        assert!(!RtuConfig::default().toggles_rts());
        assert!(!RtuConfig {
            mode: SerialMode::Rs232,
            ..rtu
        }
        .toggles_rts());
    }
}
