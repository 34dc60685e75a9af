//! Unit value model.
//!
//! The operator publishes a fractional target `(k, N)`: a unit proving
//! exactly `k` zero bits is worth `1/N`, and every further zero bit doubles
//! the value. Units below `k` bits, or whose hash misses their own declared
//! requirement, are worth nothing and score as [`UnitValue::Invalid`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Denominator used when printing unit values
pub const VALUE_DENOMINATOR: f64 = 1024.0;

/// Server-reported fractional target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTarget {
    /// Zero bits worth exactly `1/N`
    pub k: u32,
    /// Value denominator
    #[serde(rename = "N")]
    pub n: u64,
}

/// Scored value of a unit
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnitValue {
    /// Value as a fraction of one whole unit
    Valid(f64),
    /// The unit does not satisfy the current target
    Invalid,
}

impl UnitValue {
    /// Value of a unit declaring `zero_bits` under `target`.
    ///
    /// The caller is responsible for checking the unit hash actually meets
    /// `zero_bits`.
    #[must_use]
    pub fn from_zero_bits(zero_bits: u8, target: &ValidationTarget) -> Self {
        let zero_bits = u32::from(zero_bits);
        if target.n == 0 || zero_bits < target.k {
            return Self::Invalid;
        }
        let doublings = (zero_bits - target.k) as i32;
        Self::Valid(2f64.powi(doublings) / target.n as f64)
    }

    /// Whether this is the invalid sentinel
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }
}

impl fmt::Display for UnitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid(v) => write!(f, "{}/{}", v * VALUE_DENOMINATOR, VALUE_DENOMINATOR),
            Self::Invalid => write!(f, "InvalidDICE"),
        }
    }
}

/// Zero bits a unit needs to be worth at least `value` under `target`.
///
/// Monotonic in `value`; never below `k`, saturating at 255.
#[must_use]
pub fn zeros_for_value(value: f64, target: &ValidationTarget) -> u8 {
    let base = target.k.min(u32::from(u8::MAX));
    if value.is_nan() || value <= 0.0 {
        return base as u8;
    }
    if value.is_infinite() {
        return u8::MAX;
    }

    let scaled = value * target.n.max(1) as f64;
    let extra = if scaled <= 1.0 {
        0
    } else {
        scaled.log2().ceil() as u32
    };
    base.saturating_add(extra).min(u32::from(u8::MAX)) as u8
}
