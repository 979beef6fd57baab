// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-register arithmetic values
//!
//! A value that does not fit into a single 16-bit register is spread over
//! consecutive registers. Devices disagree about the order of those bytes,
//! so every conversion is parameterised by an [`Endian`] tag that describes
//! the layout relative to the big-endian network representation.

use std::fmt;

use byteorder::{BigEndian, ByteOrder as _};
use smallvec::SmallVec;

use crate::frame::Word;

/// Byte and word order of a multi-register value.
///
/// The letters name the bytes of the big-endian representation,
/// i.e. `A` is the most significant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "UPPERCASE")
)]
pub enum Endian {
    /// Network order, most significant word and byte first.
    #[default]
    Abcd,
    /// Reversed word order, bytes within a word in network order.
    Cdab,
    /// Network word order, bytes within each word swapped.
    Badc,
    /// Full byte reversal.
    Dcba,
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Abcd => "ABCD",
            Self::Cdab => "CDAB",
            Self::Badc => "BADC",
            Self::Dcba => "DCBA",
        };
        f.write_str(s)
    }
}

/// Registers holding a single arithmetic value.
pub type Registers = SmallVec<[Word; 4]>;

const MAX_SIZE: usize = 8;

/// An arithmetic type of 2, 4 or 8 bytes.
pub trait Arithmetic: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Size in bytes.
    const SIZE: usize;

    /// Writes the big-endian representation into `buf[..Self::SIZE]`.
    fn write_be(self, buf: &mut [u8]);

    /// Reads the big-endian representation from `buf[..Self::SIZE]`.
    fn read_be(buf: &[u8]) -> Self;

    /// Number of registers occupied by a value.
    #[must_use]
    fn register_count() -> usize {
        Self::SIZE / 2
    }
}

macro_rules! impl_arithmetic {
    ($($ty:ty: $size:expr, $write:ident, $read:ident;)*) => {
        $(
            impl Arithmetic for $ty {
                const SIZE: usize = $size;

                fn write_be(self, buf: &mut [u8]) {
                    BigEndian::$write(buf, self);
                }

                fn read_be(buf: &[u8]) -> Self {
                    BigEndian::$read(buf)
                }
            }
        )*
    };
}

impl_arithmetic! {
    u16: 2, write_u16, read_u16;
    i16: 2, write_i16, read_i16;
    u32: 4, write_u32, read_u32;
    i32: 4, write_i32, read_i32;
    f32: 4, write_f32, read_f32;
    u64: 8, write_u64, read_u64;
    i64: 8, write_i64, read_i64;
    f64: 8, write_f64, read_f64;
}

/// Reorders the big-endian bytes of a value.
///
/// Every variant is its own inverse.
fn reorder(bytes: &mut [u8], endian: Endian) {
    debug_assert!(bytes.len() % 2 == 0);
    match endian {
        Endian::Abcd => {}
        Endian::Cdab => {
            let words = bytes.len() / 2;
            for i in 0..words / 2 {
                let j = words - 1 - i;
                bytes.swap(2 * i, 2 * j);
                bytes.swap(2 * i + 1, 2 * j + 1);
            }
        }
        Endian::Badc => {
            for word in bytes.chunks_exact_mut(2) {
                word.swap(0, 1);
            }
        }
        Endian::Dcba => bytes.reverse(),
    }
}

/// Applies the byte/word swap selected by `endian` to `value`.
#[must_use]
pub fn swap<T: Arithmetic>(value: T, endian: Endian) -> T {
    let mut buf = [0; MAX_SIZE];
    let bytes = &mut buf[..T::SIZE];
    value.write_be(bytes);
    reorder(bytes, endian);
    T::read_be(bytes)
}

/// Spreads `value` over `T::SIZE / 2` registers.
#[must_use]
pub fn to_registers<T: Arithmetic>(value: T, endian: Endian) -> Registers {
    let mut buf = [0; MAX_SIZE];
    let bytes = &mut buf[..T::SIZE];
    value.write_be(bytes);
    reorder(bytes, endian);
    bytes.chunks_exact(2).map(BigEndian::read_u16).collect()
}

/// Collects a value from its registers.
///
/// Returns `None` if the number of registers does not match the size of `T`.
#[must_use]
pub fn from_registers<T: Arithmetic>(registers: &[Word], endian: Endian) -> Option<T> {
    if registers.len() != T::register_count() {
        return None;
    }
    let mut buf = [0; MAX_SIZE];
    let bytes = &mut buf[..T::SIZE];
    for (chunk, word) in bytes.chunks_exact_mut(2).zip(registers) {
        BigEndian::write_u16(chunk, *word);
    }
    reorder(bytes, endian);
    Some(T::read_be(bytes))
}

/// An arithmetic value together with its register layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Data<T> {
    pub value: T,
    pub endian: Endian,
}

impl<T: Arithmetic> Data<T> {
    #[must_use]
    pub const fn new(value: T, endian: Endian) -> Self {
        Self { value, endian }
    }

    #[must_use]
    pub fn register_count(&self) -> usize {
        T::register_count()
    }

    #[must_use]
    pub fn to_registers(&self) -> Registers {
        to_registers(self.value, self.endian)
    }

    #[must_use]
    pub fn from_registers(registers: &[Word], endian: Endian) -> Option<Self> {
        from_registers(registers, endian).map(|value| Self { value, endian })
    }
}
