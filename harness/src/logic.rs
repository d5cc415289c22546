// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The extended logic domain.
//!
//! Every signal value crossing the harness is a [`LogicVector`]: a fixed-width
//! string of [`Logic`] symbols, most-significant bit first. The nine symbols
//! are those of IEEE 1164 `std_ulogic`, so high-impedance and unknown states
//! survive a round trip through the harness untouched.

use std::{fmt, str::FromStr};

use snafu::{Snafu, ensure};

/// One bit of the extended logic domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logic {
    /// `U`
    Uninitialized,
    /// `X`
    Unknown,
    /// `0`
    Zero,
    /// `1`
    One,
    /// `Z`
    HighImpedance,
    /// `W`
    WeakUnknown,
    /// `L`
    WeakZero,
    /// `H`
    WeakOne,
    /// `-`
    DontCare,
}

impl Logic {
    /// Parses a single symbol, ignoring case.
    pub fn from_char(symbol: char) -> Option<Self> {
        Some(match symbol.to_ascii_uppercase() {
            'U' => Self::Uninitialized,
            'X' => Self::Unknown,
            '0' => Self::Zero,
            '1' => Self::One,
            'Z' => Self::HighImpedance,
            'W' => Self::WeakUnknown,
            'L' => Self::WeakZero,
            'H' => Self::WeakOne,
            '-' => Self::DontCare,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Uninitialized => 'U',
            Self::Unknown => 'X',
            Self::Zero => '0',
            Self::One => '1',
            Self::HighImpedance => 'Z',
            Self::WeakUnknown => 'W',
            Self::WeakZero => 'L',
            Self::WeakOne => 'H',
            Self::DontCare => '-',
        }
    }

    /// Whether this is a strong `0` or `1`.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Zero | Self::One)
    }

    /// The boolean reading of the bit, treating weak levels as their strong
    /// counterparts. `None` for every other symbol.
    pub fn to_bool(self) -> Option<bool> {
        match self {
            Self::Zero | Self::WeakZero => Some(false),
            Self::One | Self::WeakOne => Some(true),
            _ => None,
        }
    }
}

impl From<bool> for Logic {
    fn from(value: bool) -> Self {
        if value { Self::One } else { Self::Zero }
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Malformed or unrepresentable bit strings.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LogicError {
    #[snafu(display(
        "Invalid logic symbol `{symbol}` at position {position} of `{text}`"
    ))]
    InvalidSymbol {
        text: String,
        symbol: char,
        position: usize,
    },
    #[snafu(display("Bit strings must be at least one bit wide"))]
    ZeroWidth,
    #[snafu(display("Value {value} does not fit in {width} bit(s)"))]
    DoesNotFit { value: String, width: usize },
    #[snafu(display(
        "Cannot extend a {width}-bit value to {target} bit(s): extension never truncates"
    ))]
    Narrowing { width: usize, target: usize },
}

/// A fixed-width bit string, most-significant bit first.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LogicVector {
    bits: Vec<Logic>,
}

impl LogicVector {
    /// `bits[0]` is the most-significant bit.
    pub fn from_bits(bits: Vec<Logic>) -> Result<Self, LogicError> {
        ensure!(!bits.is_empty(), ZeroWidthSnafu);
        Ok(Self { bits })
    }

    pub fn filled(width: usize, bit: Logic) -> Result<Self, LogicError> {
        Self::from_bits(vec![bit; width])
    }

    /// Formats `value` as exactly `width` bits.
    pub fn from_unsigned(value: u128, width: usize) -> Result<Self, LogicError> {
        ensure!(width > 0, ZeroWidthSnafu);
        ensure!(
            width >= 128 || value >> width == 0,
            DoesNotFitSnafu {
                value: value.to_string(),
                width
            }
        );
        let bits = (0..width)
            .rev()
            .map(|index| Logic::from(index < 128 && (value >> index) & 1 == 1))
            .collect();
        Ok(Self { bits })
    }

    /// Formats `value` in two's complement as exactly `width` bits.
    pub fn from_signed(value: i128, width: usize) -> Result<Self, LogicError> {
        ensure!(width > 0, ZeroWidthSnafu);
        if width < 128 {
            let bound = 1i128 << (width - 1);
            ensure!(
                (-bound..bound).contains(&value),
                DoesNotFitSnafu {
                    value: value.to_string(),
                    width
                }
            );
        }
        let raw = value as u128;
        let negative = value < 0;
        let bits = (0..width)
            .rev()
            .map(|index| {
                Logic::from(if index < 128 {
                    (raw >> index) & 1 == 1
                } else {
                    negative
                })
            })
            .collect();
        Ok(Self { bits })
    }

    pub fn width(&self) -> usize {
        self.bits.len()
    }

    /// Most-significant bit first.
    pub fn bits(&self) -> &[Logic] {
        &self.bits
    }

    /// The bit at `index`, where index `0` is the least-significant bit.
    pub fn bit(&self, index: usize) -> Option<Logic> {
        let width = self.width();
        (index < width).then(|| self.bits[width - 1 - index])
    }

    pub fn is_binary(&self) -> bool {
        self.bits.iter().all(|bit| bit.is_binary())
    }

    /// The unsigned integer reading, if every bit has a boolean reading and
    /// the value fits in 128 bits.
    pub fn to_unsigned(&self) -> Option<u128> {
        let significant = self.width().saturating_sub(128);
        if self.bits[..significant]
            .iter()
            .any(|bit| bit.to_bool() != Some(false))
        {
            return None;
        }
        self.bits[significant..].iter().try_fold(0u128, |value, bit| {
            bit.to_bool().map(|bit| (value << 1) | u128::from(bit))
        })
    }

    pub fn zero_extend(&self, target: usize) -> Result<Self, LogicError> {
        self.extend_with(target, Logic::Zero)
    }

    pub fn sign_extend(&self, target: usize) -> Result<Self, LogicError> {
        self.extend_with(target, self.bits[0])
    }

    fn extend_with(&self, target: usize, fill: Logic) -> Result<Self, LogicError> {
        ensure!(
            target >= self.width(),
            NarrowingSnafu {
                width: self.width(),
                target
            }
        );
        let mut bits = vec![fill; target - self.width()];
        bits.extend_from_slice(&self.bits);
        Ok(Self { bits })
    }
}

impl FromStr for LogicVector {
    type Err = LogicError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let bits = text
            .chars()
            .enumerate()
            .map(|(position, symbol)| {
                Logic::from_char(symbol).ok_or_else(|| {
                    InvalidSymbolSnafu {
                        text,
                        symbol,
                        position,
                    }
                    .build()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_bits(bits)
    }
}

impl From<Logic> for LogicVector {
    fn from(bit: Logic) -> Self {
        Self { bits: vec![bit] }
    }
}

impl From<bool> for LogicVector {
    fn from(value: bool) -> Self {
        Logic::from(value).into()
    }
}

impl fmt::Display for LogicVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in &self.bits {
            write!(f, "{bit}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LogicVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicVector(\"{self}\")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_symbol_case_insensitively() {
        let vector: LogicVector = "uX01zWlH-".parse().unwrap();
        assert_eq!(vector.to_string(), "UX01ZWLH-");
        assert_eq!(vector.width(), 9);
    }

    #[test]
    fn rejects_unknown_symbols_with_position() {
        let error = "01a1".parse::<LogicVector>().unwrap_err();
        assert_eq!(
            error,
            LogicError::InvalidSymbol {
                text: "01a1".into(),
                symbol: 'a',
                position: 2
            }
        );
        assert_eq!("".parse::<LogicVector>(), Err(LogicError::ZeroWidth));
    }

    #[test]
    fn integers_are_formatted_to_width() {
        assert_eq!(LogicVector::from_unsigned(5, 4).unwrap().to_string(), "0101");
        assert_eq!(LogicVector::from_unsigned(0, 1).unwrap().to_string(), "0");
        assert!(matches!(
            LogicVector::from_unsigned(16, 4),
            Err(LogicError::DoesNotFit { .. })
        ));
        assert_eq!(LogicVector::from_signed(-1, 3).unwrap().to_string(), "111");
        assert_eq!(LogicVector::from_signed(-4, 3).unwrap().to_string(), "100");
        assert!(LogicVector::from_signed(4, 3).is_err());
    }

    #[test]
    fn wide_values_keep_high_bits_clear() {
        let vector = LogicVector::from_unsigned(u128::MAX, 130).unwrap();
        assert_eq!(vector.bits()[0], Logic::Zero);
        assert_eq!(vector.bits()[1], Logic::Zero);
        assert_eq!(vector.to_unsigned(), Some(u128::MAX));
        let negative = LogicVector::from_signed(-2, 130).unwrap();
        assert_eq!(negative.bits()[0], Logic::One);
        assert_eq!(negative.bit(0), Some(Logic::Zero));
    }

    #[test]
    fn extension_is_only_ever_widening() {
        let narrow: LogicVector = "10".parse().unwrap();
        assert_eq!(narrow.zero_extend(4).unwrap().to_string(), "0010");
        assert_eq!(narrow.sign_extend(4).unwrap().to_string(), "1110");
        assert_eq!(
            narrow.zero_extend(1),
            Err(LogicError::Narrowing {
                width: 2,
                target: 1
            })
        );
    }

    #[test]
    fn unsigned_reading_requires_levels() {
        assert_eq!("0HL1".parse::<LogicVector>().unwrap().to_unsigned(), Some(0b0101));
        assert_eq!("0Z".parse::<LogicVector>().unwrap().to_unsigned(), None);
        let vector: LogicVector = "10Z".parse().unwrap();
        assert_eq!(vector.bit(0), Some(Logic::HighImpedance));
        assert_eq!(vector.bit(2), Some(Logic::One));
        assert_eq!(vector.bit(3), None);
    }
}
