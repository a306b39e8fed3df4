// src/core/lsn.rs

//! A write-ahead-log position, formatted as two hex integers separated by
//! a slash (for example `0/4E1B38`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 64-bit WAL byte position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The invalid (zero) position, used when no position is known.
    pub const INVALID: Lsn = Lsn(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Lag in bytes between this position and `other`, as reported to the
    /// monitor. Returns -1 when either side is unknown.
    pub fn lag_from(&self, other: Lsn) -> i64 {
        if !self.is_valid() || !other.is_valid() {
            return -1;
        }
        other.0.saturating_sub(self.0) as i64
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid LSN '{s}': missing '/'"))?;
        let hi = u64::from_str_radix(hi, 16).map_err(|e| format!("invalid LSN '{s}': {e}"))?;
        let lo = u64::from_str_radix(lo, 16).map_err(|e| format!("invalid LSN '{s}': {e}"))?;
        if hi > u32::MAX as u64 || lo > u32::MAX as u64 {
            return Err(format!("invalid LSN '{s}': segment out of range"));
        }
        Ok(Lsn((hi << 32) | lo))
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Lsn(value)
    }
}

impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
