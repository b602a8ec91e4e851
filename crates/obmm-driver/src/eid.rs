//! 128-bit endpoint identifier

use crate::error::{ObmmError, Result};
use obmm_abi::EID_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Endpoint identifier of a UB bus endpoint.
///
/// Stored little-endian: byte 0 is the least significant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid([u8; EID_SIZE]);

impl Eid {
    /// The reserved all-zero identifier.
    pub const ZERO: Self = Self([0; EID_SIZE]);

    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; EID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from a 128-bit integer.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_le_bytes())
    }

    /// Raw bytes, as the driver expects them.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; EID_SIZE] {
        &self.0
    }

    /// Integer value.
    #[must_use]
    pub const fn as_u128(&self) -> u128 {
        u128::from_le_bytes(self.0)
    }

    /// The zero EID is reserved and never resolvable.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; EID_SIZE]
    }

    /// High and low 64-bit halves.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn halves(&self) -> (u64, u64) {
        let v = self.as_u128();
        ((v >> 64) as u64, v as u64)
    }
}

impl From<[u8; EID_SIZE]> for Eid {
    fn from(bytes: [u8; EID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hi, lo) = self.halves();
        write!(f, "{hi:#x}:{lo:#x}")
    }
}

impl FromStr for Eid {
    type Err = ObmmError;

    /// Accepts `hi:lo` (as printed by `Display`) or one 128-bit integer,
    /// each part hex with `0x` or decimal.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((hi, lo)) = s.split_once(':') {
            let hi = parse_part(hi, s)?;
            let lo = parse_part(lo, s)?;
            if hi > u128::from(u64::MAX) || lo > u128::from(u64::MAX) {
                return Err(ObmmError::invalid_argument(format!(
                    "EID half out of range: {s}"
                )));
            }
            Ok(Self::from_u128((hi << 64) | lo))
        } else {
            parse_part(s, s).map(Self::from_u128)
        }
    }
}

fn parse_part(part: &str, whole: &str) -> Result<u128> {
    let part = part.trim();
    let parsed = match part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
    {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => part.parse::<u128>(),
    };
    parsed.map_err(|e| ObmmError::invalid_argument(format!("Bad EID '{whole}': {e}")))
}
