// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Persisted snapshot shapes
//!
//! Two shapes exist on disk. [`MeterSnapshot`] is the current one,
//! written after every state-affecting operation. [`LegacySnapshot`] is
//! the pre-structured form - a bare state string plus free-form
//! attributes - accepted as a read-only fallback so old installations
//! keep their counters. Decoding tries the shapes in that order; both
//! decoders are pure so they stay independently testable.
//!
//! Decimals are stored as strings to survive hosts that round floats.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::gate::MeterStatus;

/// Preferred persisted shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSnapshot {
    /// Running total; unset before the first reading.
    #[serde(with = "rust_decimal::serde::str_option")]
    pub native_value: Option<Decimal>,
    /// Unit of measurement discovered from the source.
    pub unit: Option<String>,
    /// Total frozen at the most recent reset.
    #[serde(with = "rust_decimal::serde::str")]
    pub last_period: Decimal,
    /// Last raw source reading seen.
    #[serde(with = "rust_decimal::serde::str_option")]
    pub last_value: Option<Decimal>,
    /// Instant of the most recent reset or initialization.
    pub last_reset: DateTime<Utc>,
    /// Collecting/paused at the time of the write.
    pub status: MeterStatus,
}

impl MeterSnapshot {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Legacy persisted shape: a bare state string plus free-form attributes.
/// Never written, only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacySnapshot {
    /// Bare meter value.
    pub state: String,
    #[serde(default)]
    pub attributes: LegacyAttributes,
}

/// Free-form attributes the legacy shape carried. Every field is
/// optional and arrives as an unvalidated string.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LegacyAttributes {
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    #[serde(default)]
    pub last_period: Option<String>,
    #[serde(default)]
    pub last_value: Option<String>,
    #[serde(default)]
    pub last_reset: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Tagged union over the two persisted shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredSnapshot {
    Preferred(MeterSnapshot),
    Legacy(LegacySnapshot),
}

impl StoredSnapshot {
    /// Decode a stored record, preferring the current shape. A preferred
    /// record with any undecodable field is retried as legacy; a record
    /// fitting neither shape is `None`.
    pub fn decode(json: &str) -> Option<Self> {
        if let Ok(snapshot) = serde_json::from_str::<MeterSnapshot>(json) {
            return Some(StoredSnapshot::Preferred(snapshot));
        }
        serde_json::from_str::<LegacySnapshot>(json)
            .ok()
            .map(StoredSnapshot::Legacy)
    }
}
