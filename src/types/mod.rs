//! Core data types shared by the miner, the session engine and persistence.

mod address;
mod unit;
mod value;

pub use address::{Address, AddressError, ADDRESS_SIZE};
pub use unit::{Unit, UnitError, UnitResult, PAYLOAD_SIZE, UNIT_ENCODED_SIZE};
pub use value::{zeros_for_value, UnitValue, ValidationTarget, VALUE_DENOMINATOR};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds
#[must_use]
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
