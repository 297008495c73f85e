// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Startup state restoration
//!
//! Restore runs once per meter at startup and never fails: a preferred
//! record restores verbatim, a legacy record is upgraded field by field
//! with corrupted values treated as absent, and anything else is a cold
//! start. The one hard requirement on the legacy path is the bare value
//! itself - if that does not parse, the whole record is abandoned rather
//! than restoring a meter with an invented total.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, error};
use rust_decimal::Decimal;

use crate::gate::MeterStatus;
use crate::snapshot::{LegacySnapshot, MeterSnapshot, StoredSnapshot};

/// Meter state reassembled from a stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredState {
    pub total: Option<Decimal>,
    pub unit: Option<String>,
    pub last_period: Decimal,
    pub last_value: Option<Decimal>,
    pub last_reset: DateTime<Utc>,
    pub status: MeterStatus,
}

impl RestoredState {
    /// Cold-start defaults: nothing accumulated yet, paused until the
    /// gate observes a tariff (or the group engages an ungated meter).
    pub fn cold(now: DateTime<Utc>) -> Self {
        Self {
            total: None,
            unit: None,
            last_period: Decimal::ZERO,
            last_value: None,
            last_reset: now,
            status: MeterStatus::Paused,
        }
    }
}

/// Rebuild meter state from whatever the store held.
pub fn restore(name: &str, stored: Option<StoredSnapshot>, now: DateTime<Utc>) -> RestoredState {
    match stored {
        Some(StoredSnapshot::Preferred(snapshot)) => {
            debug!("{name}: restoring from current snapshot shape");
            from_preferred(snapshot)
        }
        Some(StoredSnapshot::Legacy(snapshot)) => {
            debug!("{name}: restoring from legacy snapshot shape");
            from_legacy(name, snapshot, now)
        }
        None => RestoredState::cold(now),
    }
}

fn from_preferred(snapshot: MeterSnapshot) -> RestoredState {
    RestoredState {
        total: snapshot.native_value,
        unit: snapshot.unit,
        last_period: snapshot.last_period,
        last_value: snapshot.last_value,
        last_reset: snapshot.last_reset,
        status: snapshot.status,
    }
}

fn from_legacy(name: &str, snapshot: LegacySnapshot, now: DateTime<Utc>) -> RestoredState {
    let Some(total) = parse_decimal(&snapshot.state) else {
        error!(
            "Could not restore state <{}>. Resetting meter {}",
            snapshot.state, name
        );
        return RestoredState::cold(now);
    };

    let attributes = snapshot.attributes;
    let status = if attributes.status.as_deref() == Some(MeterStatus::Collecting.as_str()) {
        MeterStatus::Collecting
    } else {
        MeterStatus::Paused
    };

    RestoredState {
        total: Some(total),
        unit: attributes.unit_of_measurement,
        last_period: attributes
            .last_period
            .as_deref()
            .and_then(parse_decimal)
            .unwrap_or(Decimal::ZERO),
        last_value: attributes.last_value.as_deref().and_then(parse_decimal),
        last_reset: attributes
            .last_reset
            .as_deref()
            .and_then(parse_utc)
            .unwrap_or(now),
        status,
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    raw.trim().parse().ok()
}

/// Parse a stored timestamp; unzoned values are assumed UTC.
fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
        return Some(zoned.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::LegacyAttributes;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn legacy(state: &str, attributes: LegacyAttributes) -> Option<StoredSnapshot> {
        Some(StoredSnapshot::Legacy(LegacySnapshot {
            state: state.to_string(),
            attributes,
        }))
    }

    #[test]
    fn test_cold_start() {
        let restored = restore("meter", None, now());
        assert_eq!(restored, RestoredState::cold(now()));
        assert_eq!(restored.total, None);
        assert_eq!(restored.status, MeterStatus::Paused);
    }

    #[test]
    fn test_preferred_restores_verbatim() {
        let snapshot = MeterSnapshot {
            native_value: Some("12.3".parse().unwrap()),
            unit: Some("kWh".to_string()),
            last_period: "4".parse().unwrap(),
            last_value: Some("99".parse().unwrap()),
            last_reset: Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap(),
            status: MeterStatus::Collecting,
        };
        let restored = restore("meter", Some(StoredSnapshot::Preferred(snapshot)), now());
        assert_eq!(restored.total, Some("12.3".parse().unwrap()));
        assert_eq!(restored.unit.as_deref(), Some("kWh"));
        assert_eq!(restored.last_value, Some("99".parse().unwrap()));
        assert_eq!(restored.status, MeterStatus::Collecting);
        assert_ne!(restored.last_reset, now());
    }

    #[test]
    fn test_legacy_full_restore() {
        let attributes = LegacyAttributes {
            unit_of_measurement: Some("m³".to_string()),
            last_period: Some("8.25".to_string()),
            last_value: Some("1024".to_string()),
            last_reset: Some("2023-11-05T08:00:00+01:00".to_string()),
            status: Some("collecting".to_string()),
        };
        let restored = restore("meter", legacy("77.7", attributes), now());
        assert_eq!(restored.total, Some("77.7".parse().unwrap()));
        assert_eq!(restored.last_period, "8.25".parse().unwrap());
        assert_eq!(restored.last_value, Some("1024".parse().unwrap()));
        assert_eq!(
            restored.last_reset,
            Utc.with_ymd_and_hms(2023, 11, 5, 7, 0, 0).unwrap()
        );
        assert_eq!(restored.status, MeterStatus::Collecting);
    }

    #[test]
    fn test_legacy_unparsable_state_is_cold_start() {
        let restored = restore("meter", legacy("unavailable", LegacyAttributes::default()), now());
        assert_eq!(restored, RestoredState::cold(now()));
    }

    #[test]
    fn test_legacy_missing_last_period_defaults_to_zero() {
        let restored = restore("meter", legacy("5", LegacyAttributes::default()), now());
        assert_eq!(restored.total, Some("5".parse().unwrap()));
        assert_eq!(restored.last_period, Decimal::ZERO);
    }

    #[test]
    fn test_legacy_corrupt_fields_treated_as_absent() {
        let attributes = LegacyAttributes {
            unit_of_measurement: None,
            last_period: Some("NaN-ish".to_string()),
            last_value: Some("not a number".to_string()),
            last_reset: Some("yesterday".to_string()),
            status: Some("sleeping".to_string()),
        };
        let restored = restore("meter", legacy("10", attributes), now());
        assert_eq!(restored.last_period, Decimal::ZERO);
        assert_eq!(restored.last_value, None);
        assert_eq!(restored.last_reset, now());
        assert_eq!(restored.status, MeterStatus::Paused);
    }

    #[test]
    fn test_legacy_unzoned_timestamp_assumed_utc() {
        let attributes = LegacyAttributes {
            last_reset: Some("2023-11-05 08:00:00.123".to_string()),
            ..Default::default()
        };
        let restored = restore("meter", legacy("1", attributes), now());
        assert_eq!(
            restored.last_reset,
            Utc.with_ymd_and_hms(2023, 11, 5, 8, 0, 0).unwrap()
                + chrono::Duration::milliseconds(123)
        );
    }
}
