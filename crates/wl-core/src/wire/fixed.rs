//! 24.8 signed fixed-point numbers.

use std::fmt;

use crate::error::ArgumentError;

/// A signed 24.8 fixed-point value as carried on the wire.
///
/// The raw representation is an `i32` holding the value multiplied by 256,
/// so the resolution is 1/256 and the range is roughly ±8.4 million.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const MIN: Fixed = Fixed(i32::MIN);
    pub const MAX: Fixed = Fixed(i32::MAX);

    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn from_int(value: i16) -> Self {
        Fixed((value as i32) << 8)
    }

    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 256.0
    }
}

impl TryFrom<f64> for Fixed {
    type Error = ArgumentError;

    /// Multiplies by 256 and rounds to the nearest raw value.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let scaled = (value * 256.0).round();
        if !scaled.is_finite() || scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
            return Err(ArgumentError::OutOfRange {
                arg: "fixed".to_string(),
                value: value.to_string(),
            });
        }
        Ok(Fixed(scaled as i32))
    }
}

impl From<Fixed> for f64 {
    fn from(value: Fixed) -> Self {
        value.to_f64()
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}
