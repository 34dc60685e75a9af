//! DICE units.
//!
//! A unit binds an operator address and a miner address to a proof of work:
//! SHA3-256 over `operator ‖ miner ‖ timestamp ‖ payload` must start with at
//! least `required_zero_bits` zero bits. The zero-bit requirement itself is
//! not part of the hashed preimage.
//!
//! Units persist as lowercase hex of the packed layout:
//!
//! ```text
//! operator[32] ‖ miner[32] ‖ zero_bits[1] ‖ timestamp[8, BE] ‖ payload[32]
//! ```

use serde::{Deserialize, Serialize};

use super::{Address, AddressError, ADDRESS_SIZE};

/// Payload (nonce) size in bytes
pub const PAYLOAD_SIZE: usize = 32;

/// Size of the packed unit encoding
pub const UNIT_ENCODED_SIZE: usize = ADDRESS_SIZE * 2 + 1 + 8 + PAYLOAD_SIZE;

/// Size of the proof-of-work preimage
pub(crate) const PREIMAGE_SIZE: usize = ADDRESS_SIZE * 2 + 8 + PAYLOAD_SIZE;

/// Result type for unit decoding
pub type UnitResult<T> = Result<T, UnitError>;

/// A proof-of-work unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    /// Operator that authorises the unit
    pub operator: Address,
    /// Miner that performed the search
    pub miner: Address,
    /// Minimum leading zero bits of the unit hash
    pub required_zero_bits: u8,
    /// Creation time in milliseconds
    pub timestamp: u64,
    /// Search payload
    pub payload: [u8; PAYLOAD_SIZE],
}

/// Structured form accepted when reading older unit files
#[derive(Serialize, Deserialize)]
struct UnitJson {
    operator: String,
    miner: String,
    zero_bits: u8,
    timestamp: u64,
    payload: String,
}

impl Unit {
    /// Create a unit from its fields
    #[must_use]
    pub fn new(
        operator: Address,
        miner: Address,
        required_zero_bits: u8,
        timestamp: u64,
        payload: [u8; PAYLOAD_SIZE],
    ) -> Self {
        Self {
            operator,
            miner,
            required_zero_bits,
            timestamp,
            payload,
        }
    }

    /// Bytes hashed for the proof of work
    #[must_use]
    pub fn pow_preimage(&self) -> [u8; PREIMAGE_SIZE] {
        let mut out = [0u8; PREIMAGE_SIZE];
        out[..32].copy_from_slice(self.operator.as_bytes());
        out[32..64].copy_from_slice(self.miner.as_bytes());
        out[64..72].copy_from_slice(&self.timestamp.to_be_bytes());
        out[72..].copy_from_slice(&self.payload);
        out
    }

    /// Packed binary encoding
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(UNIT_ENCODED_SIZE);
        out.extend_from_slice(self.operator.as_bytes());
        out.extend_from_slice(self.miner.as_bytes());
        out.push(self.required_zero_bits);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode the packed binary encoding
    ///
    /// # Errors
    /// Returns error if the length is wrong
    pub fn from_bytes(bytes: &[u8]) -> UnitResult<Self> {
        if bytes.len() != UNIT_ENCODED_SIZE {
            return Err(UnitError::InvalidLength {
                expected: UNIT_ENCODED_SIZE,
                got: bytes.len(),
            });
        }
        let operator = Address::from_slice(&bytes[..32])?;
        let miner = Address::from_slice(&bytes[32..64])?;
        let required_zero_bits = bytes[64];
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[65..73]);
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[73..]);

        Ok(Self {
            operator,
            miner,
            required_zero_bits,
            timestamp: u64::from_be_bytes(ts),
            payload,
        })
    }

    /// Persisted textual encoding
    #[must_use]
    pub fn to_text(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode a persisted unit.
    ///
    /// Accepts the packed hex form and the structured JSON form.
    ///
    /// # Errors
    /// Returns error if neither form decodes
    pub fn from_text(text: &str) -> UnitResult<Self> {
        let text = text.trim();
        if text.starts_with('{') {
            return Self::from_json(text);
        }
        let bytes = hex::decode(text).map_err(|_| UnitError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    fn from_json(text: &str) -> UnitResult<Self> {
        let raw: UnitJson =
            serde_json::from_str(text).map_err(|e| UnitError::Json(e.to_string()))?;
        let payload_bytes = hex::decode(&raw.payload).map_err(|_| UnitError::InvalidHex)?;
        let payload: [u8; PAYLOAD_SIZE] =
            payload_bytes
                .as_slice()
                .try_into()
                .map_err(|_| UnitError::InvalidLength {
                    expected: PAYLOAD_SIZE,
                    got: payload_bytes.len(),
                })?;

        Ok(Self {
            operator: Address::parse(&raw.operator)?,
            miner: Address::parse(&raw.miner)?,
            required_zero_bits: raw.zero_bits,
            timestamp: raw.timestamp,
            payload,
        })
    }
}

/// Unit decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    /// Invalid hex encoding
    #[error("invalid hex encoding")]
    InvalidHex,
    /// Wrong encoded length
    #[error("invalid unit length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        got: usize,
    },
    /// Invalid address field
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),
    /// Structured form could not be parsed
    #[error("invalid unit json: {0}")]
    Json(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit() -> Unit {
        Unit::new(
            Address::from_bytes([1u8; 32]),
            Address::from_bytes([2u8; 32]),
            20,
            1_700_000_000_123,
            [9u8; PAYLOAD_SIZE],
        )
    }

    #[test]
    fn test_encoded_size() {
        assert_eq!(unit().to_bytes().len(), UNIT_ENCODED_SIZE);
        assert_eq!(unit().to_text().len(), UNIT_ENCODED_SIZE * 2);
    }

    #[test]
    fn test_preimage_excludes_zero_bits() {
        let mut a = unit();
        let mut b = unit();
        a.required_zero_bits = 1;
        b.required_zero_bits = 30;
        assert_eq!(a.pow_preimage(), b.pow_preimage());
    }

    #[test]
    fn test_json_form_accepted() {
        let u = unit();
        let json = serde_json::json!({
            "operator": u.operator.to_hex_dash(),
            "miner": u.miner.to_hex(),
            "zero_bits": u.required_zero_bits,
            "timestamp": u.timestamp,
            "payload": hex::encode(u.payload),
        });
        assert_eq!(Unit::from_text(&json.to_string()).unwrap(), u);
    }

    #[test]
    fn test_truncated_text_rejected() {
        let text = unit().to_text();
        assert!(matches!(
            Unit::from_text(&text[..40]),
            Err(UnitError::InvalidLength { .. })
        ));
        assert_eq!(Unit::from_text("not hex"), Err(UnitError::InvalidHex));
    }

    proptest! {
        #[test]
        fn prop_text_roundtrip(
            op in any::<[u8; 32]>(),
            miner in any::<[u8; 32]>(),
            zero_bits in any::<u8>(),
            timestamp in any::<u64>(),
            payload in any::<[u8; 32]>(),
        ) {
            let u = Unit::new(
                Address::from_bytes(op),
                Address::from_bytes(miner),
                zero_bits,
                timestamp,
                payload,
            );
            let decoded = Unit::from_text(&u.to_text()).unwrap();
            prop_assert_eq!(decoded.operator, u.operator);
            prop_assert_eq!(decoded.miner, u.miner);
            prop_assert_eq!(decoded.required_zero_bits, u.required_zero_bits);
            prop_assert_eq!(decoded.timestamp, u.timestamp);
            prop_assert_eq!(decoded.payload, u.payload);
        }
    }
}
