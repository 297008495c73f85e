// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Running-total accumulation
//!
//! The accumulator owns the meter state for one tariff series: the
//! running total for the current period, the total frozen at the last
//! reset, the last raw source value and the discovered unit. Readings are
//! interpreted according to the configured [`ReadingMode`]; the three
//! branches share one control flow, so the mode is a tagged variant
//! consumed by a single `apply_reading`, not a trait object.
//!
//! Anomalies never propagate: an unusable or unparsable reading, or a
//! rollover with net consumption disabled, leaves the state untouched and
//! is reported through the returned [`AdjustmentResult`] plus a log line.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;

use crate::config::ReadingMode;
use crate::event::{SourceUpdate, StateValue};

/// Why a reading produced no adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The series has not been initialized by a first valid reading.
    NotStarted,
    /// The new source state carries no value.
    SourceUnavailable,
    /// Normal mode cannot derive a delta without a previous source state.
    NoPreviousState,
    /// Last-reading mode saw its first value since the basis was cleared;
    /// the reading only establishes the new comparison basis.
    BasisEstablished,
    /// An operand failed to parse as a decimal.
    Unparsable,
}

/// Outcome of applying one source reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentResult {
    /// The adjustment was added to the running total.
    Applied(Decimal),
    /// A negative adjustment was discarded as a source rollover.
    Discarded(Decimal),
    /// No state change.
    Skipped(SkipReason),
}

impl AdjustmentResult {
    /// Whether the reading changed the running total.
    pub fn is_applied(&self) -> bool {
        matches!(self, AdjustmentResult::Applied(_))
    }
}

/// Meter state for one tariff series.
#[derive(Debug, Clone)]
pub struct Accumulator {
    name: String,
    mode: ReadingMode,
    net_consumption: bool,
    /// Unset until the first valid source reading arrives.
    total: Option<Decimal>,
    last_period: Decimal,
    last_value: Option<Decimal>,
    last_reset: DateTime<Utc>,
    unit: Option<String>,
}

impl Accumulator {
    pub fn new(
        name: impl Into<String>,
        mode: ReadingMode,
        net_consumption: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            net_consumption,
            total: None,
            last_period: Decimal::ZERO,
            last_value: None,
            last_reset: now,
            unit: None,
        }
    }

    /// Initialize unit and zero total upon the source's first valid
    /// update. Guarded: has no effect once a total exists.
    pub fn start(&mut self, unit: Option<&str>) {
        if self.total.is_some() {
            return;
        }
        self.unit = unit.map(str::to_owned);
        self.total = Some(Decimal::ZERO);
        debug!("{} started, unit <{:?}>", self.name, self.unit);
    }

    /// Apply one source reading according to the interpretation mode.
    pub fn apply_reading(&mut self, update: &SourceUpdate) -> AdjustmentResult {
        use AdjustmentResult::{Applied, Discarded, Skipped};

        let Some(total) = self.total else {
            return Skipped(SkipReason::NotStarted);
        };
        if !update.new.is_usable() {
            return Skipped(SkipReason::SourceUnavailable);
        }
        if self.mode == ReadingMode::Normal
            && !update.old.as_ref().is_some_and(StateValue::is_usable)
        {
            // A transient outage drops exactly one delta; the next update
            // carries a usable old state again.
            return Skipped(SkipReason::NoPreviousState);
        }

        if let Some(unit) = &update.unit {
            self.unit = Some(unit.clone());
        }

        let Some(new_value) = update.new.as_decimal() else {
            self.warn_unparsable(update);
            return Skipped(SkipReason::Unparsable);
        };

        let adjustment = match self.mode {
            ReadingMode::Delta => {
                self.last_value = Some(new_value);
                new_value
            }
            ReadingMode::Normal => {
                let old = update.old.as_ref().and_then(StateValue::as_decimal);
                let Some(old_value) = old else {
                    self.warn_unparsable(update);
                    return Skipped(SkipReason::Unparsable);
                };
                self.last_value = Some(new_value);
                new_value - old_value
            }
            ReadingMode::LastReading => {
                let Some(basis) = self.last_value.replace(new_value) else {
                    debug!("{}: comparison basis set to {}", self.name, new_value);
                    return Skipped(SkipReason::BasisEstablished);
                };
                new_value - basis
            }
        };

        if !self.net_consumption && adjustment < Decimal::ZERO {
            // Source rolled over for unknown reasons; the sample cannot
            // contribute to a consumption total.
            return Discarded(adjustment);
        }

        self.total = Some(total + adjustment);
        Applied(adjustment)
    }

    /// Close the current period. Freezes the running total into
    /// `last_period`, zeroes the total, clears the last-reading basis and
    /// stamps the reset instant. Returns the closed total.
    pub fn reset_period(&mut self, now: DateTime<Utc>) -> Decimal {
        let closed = self.total.unwrap_or(Decimal::ZERO);
        self.last_period = closed;
        self.total = Some(Decimal::ZERO);
        self.last_value = None;
        self.last_reset = now;
        closed
    }

    /// Force the running total to a known-good value. The last-reading
    /// basis is cleared so the next delta is computed fresh; the closed
    /// period and reset instant are untouched.
    pub fn calibrate(&mut self, value: Decimal) {
        self.total = Some(value);
        self.last_value = None;
    }

    /// Drop the last-reading comparison basis.
    pub fn clear_basis(&mut self) {
        self.last_value = None;
    }

    pub fn total(&self) -> Option<Decimal> {
        self.total
    }

    pub fn last_period(&self) -> Decimal {
        self.last_period
    }

    pub fn last_value(&self) -> Option<Decimal> {
        self.last_value
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        self.last_reset
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn is_started(&self) -> bool {
        self.total.is_some()
    }

    /// Overwrite the state wholesale; used by startup recovery.
    pub(crate) fn restore_state(
        &mut self,
        total: Option<Decimal>,
        unit: Option<String>,
        last_period: Decimal,
        last_value: Option<Decimal>,
        last_reset: DateTime<Utc>,
    ) {
        self.total = total;
        self.unit = unit;
        self.last_period = last_period;
        self.last_value = last_value;
        self.last_reset = last_reset;
    }

    fn warn_unparsable(&self, update: &SourceUpdate) {
        match self.mode {
            ReadingMode::Delta => {
                warn!("Invalid adjustment of {}", update.new.as_str());
            }
            ReadingMode::Normal => {
                let old = update.old.as_ref().map(StateValue::as_str).unwrap_or("");
                warn!("Invalid state ({} > {})", old, update.new.as_str());
            }
            ReadingMode::LastReading => {
                warn!(
                    "Invalid state ({:?} > {})",
                    self.last_value,
                    update.new.as_str()
                );
            }
        }
    }
}
