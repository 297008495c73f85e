// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Meter configuration
//!
//! [`MeterConfig`] is immutable after construction: the interpretation
//! mode, net-consumption flag, tariff identity, tariff selector reference
//! and reset schedule are all fixed for the lifetime of a meter. Unit of
//! measurement is deliberately absent; it is discovered from the source,
//! not configured.

use serde::{Deserialize, Serialize};

use crate::schedule::Period;

/// How raw source readings are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadingMode {
    /// The source reports a monotonically growing total; each update
    /// contributes the delta against the previous source state.
    #[default]
    Normal,
    /// The source reports increments directly.
    Delta,
    /// Delta against the meter's own last seen raw value.
    LastReading,
}

/// Offset applied to a named period's reset instants.
///
/// Days map to a 1-based day of month (or day of week for weekly
/// periods); seconds within the day map to hour and minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOffset {
    pub days: u32,
    pub seconds: u32,
}

impl ResetOffset {
    pub fn new(days: u32, seconds: u32) -> Self {
        Self { days, seconds }
    }
}

/// Reset schedule specification.
///
/// The periodic form is the backward-compatible one; it is converted into
/// a calendar pattern once, at meter construction. The pattern form
/// supplies the five-field pattern directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSpec {
    Periodic {
        period: Period,
        #[serde(default)]
        offset: ResetOffset,
    },
    Pattern(String),
}

impl ScheduleSpec {
    /// Named period without an offset.
    pub fn periodic(period: Period) -> Self {
        ScheduleSpec::Periodic {
            period,
            offset: ResetOffset::default(),
        }
    }
}

/// Immutable configuration for one meter series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Display name, used in diagnostics.
    pub name: String,
    /// Unique identity; keys the durable snapshot.
    pub unique_id: String,
    /// Source sensor reference.
    pub source: String,
    /// Reading interpretation mode.
    #[serde(default)]
    pub mode: ReadingMode,
    /// Allow the total to decrease (bidirectional metering).
    #[serde(default)]
    pub net_consumption: bool,
    /// Tariff identity this series collects under, when the meter is
    /// split per tariff.
    #[serde(default)]
    pub tariff: Option<String>,
    /// Tariff selector entity reference; absent means always collecting.
    #[serde(default)]
    pub tariff_selector: Option<String>,
    /// Reset schedule; absent means the meter never auto-resets.
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
}

impl MeterConfig {
    /// Minimal configuration: accumulate `source` into a meter named
    /// `name`, Normal mode, no tariff, no schedule.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let name = name.into();
        let unique_id = name.trim().to_lowercase().replace(char::is_whitespace, "_");
        Self {
            name,
            unique_id,
            source: source.into(),
            mode: ReadingMode::default(),
            net_consumption: false,
            tariff: None,
            tariff_selector: None,
            schedule: None,
        }
    }

    /// Set the interpretation mode.
    pub fn with_mode(mut self, mode: ReadingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Allow negative adjustments.
    pub fn with_net_consumption(mut self) -> Self {
        self.net_consumption = true;
        self
    }

    /// Assign a tariff identity and the selector that gates it.
    pub fn with_tariff(mut self, tariff: impl Into<String>, selector: impl Into<String>) -> Self {
        let tariff = tariff.into();
        self.unique_id = format!("{}_{}", self.unique_id, tariff);
        self.tariff = Some(tariff);
        self.tariff_selector = Some(selector.into());
        self
    }

    /// Assign a reset schedule.
    pub fn with_schedule(mut self, schedule: ScheduleSpec) -> Self {
        self.schedule = Some(schedule);
        self
    }
}
