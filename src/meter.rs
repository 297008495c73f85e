// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Meter engine
//!
//! A [`Meter`] combines the accumulator, the collection gate and the
//! reset schedule for one tariff series. All operations are synchronous
//! state transitions; the host event loop serializes delivery, so events
//! for one meter are processed strictly in arrival order.
//!
//! Meters that split one source across tariffs live in a
//! [`MeterGroup`](crate::group::MeterGroup), which routes events and
//! performs the fan-out initialization.

use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;

use crate::accumulator::{Accumulator, AdjustmentResult};
use crate::config::MeterConfig;
use crate::error::{MeterError, Result};
use crate::event::{SourceUpdate, TariffChange};
use crate::gate::{CollectionGate, MeterStatus};
use crate::recovery;
use crate::schedule::CalendarPattern;
use crate::snapshot::{MeterSnapshot, StoredSnapshot};

/// A single utility meter series.
pub struct Meter {
    config: MeterConfig,
    pattern: Option<CalendarPattern>,
    next_reset: Option<DateTime<Utc>>,
    accumulator: Accumulator,
    gate: CollectionGate,
}

impl Meter {
    /// Build a meter from its configuration, resolving the reset
    /// schedule. A malformed pattern is fatal here, never deferred.
    pub fn new(config: MeterConfig, now: DateTime<Utc>) -> Result<Self> {
        let pattern = config
            .schedule
            .as_ref()
            .map(CalendarPattern::resolve)
            .transpose()?;
        if let Some(pattern) = &pattern {
            debug!("{}: reset pattern {}", config.name, pattern);
        }
        let accumulator = Accumulator::new(
            config.name.as_str(),
            config.mode,
            config.net_consumption,
            now,
        );
        let gate = CollectionGate::new(
            config.name.as_str(),
            config.source.as_str(),
            config.tariff.clone(),
        );
        Ok(Self {
            next_reset: pattern.as_ref().map(|p| p.next_after(now)),
            pattern,
            accumulator,
            gate,
            config,
        })
    }

    /// Restore state from a stored record (cold start when `None`) and
    /// arm the first scheduled reset.
    pub fn restore(&mut self, stored: Option<StoredSnapshot>, now: DateTime<Utc>) {
        let restored = recovery::restore(&self.config.name, stored, now);
        self.accumulator.restore_state(
            restored.total,
            restored.unit,
            restored.last_period,
            restored.last_value,
            restored.last_reset,
        );
        match restored.status {
            MeterStatus::Collecting => self.gate.engage(),
            MeterStatus::Paused => self.gate.disengage(),
        }
        self.next_reset = self.pattern.as_ref().map(|p| p.next_after(now));
    }

    /// Begin tracking: prime the gate from the selector's current value,
    /// or collect unconditionally when no selector is configured. With a
    /// selector whose state is not yet known, the restored status stands
    /// until the first tariff event.
    pub fn activate(&mut self, selector_state: Option<&str>) {
        match (&self.config.tariff_selector, selector_state) {
            (None, _) => self.gate.engage(),
            (Some(_), Some(state)) => {
                self.gate.on_tariff_value(state);
            }
            (Some(_), None) => {}
        }
    }

    /// Initialize unit and zero total; idempotent-guarded.
    pub fn start(&mut self, unit: Option<&str>) {
        self.accumulator.start(unit);
    }

    /// Handle a source update. Paused meters drop the update and return
    /// `None`; collecting meters return the accumulator's outcome.
    pub fn handle_source_update(&mut self, update: &SourceUpdate) -> Option<AdjustmentResult> {
        if !self.gate.is_collecting() {
            return None;
        }
        Some(self.accumulator.apply_reading(update))
    }

    /// Handle a tariff selector change. The comparison basis is cleared
    /// unconditionally so collection resumes from a fresh baseline.
    pub fn handle_tariff_change(&mut self, change: &TariffChange) {
        self.accumulator.clear_basis();
        self.gate.on_tariff_value(change.new.as_str());
    }

    /// Run the reset schedule. The next occurrence is armed *before* the
    /// reset itself, so a slow handler cannot cause a missed cycle.
    /// Returns the closed total when a reset fired.
    pub fn poll_schedule(&mut self, now: DateTime<Utc>) -> Option<Decimal> {
        let pattern = self.pattern.as_ref()?;
        let due = self.next_reset?;
        if now < due {
            return None;
        }
        self.next_reset = Some(pattern.next_after(now));
        Some(self.reset(now))
    }

    /// Close the current period immediately. Returns the closed total.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Decimal {
        debug!("Reset meter <{}>", self.config.name);
        self.accumulator.reset_period(now)
    }

    /// Force the total to a known-good value. Non-finite inputs are
    /// rejected; meters only hold real quantities.
    pub fn calibrate(&mut self, value: f64) -> Result<()> {
        let value = Decimal::try_from(value)
            .map_err(|_| MeterError::InvalidCalibration(value.to_string()))?;
        debug!("Calibrate {} = {}", self.config.name, value);
        self.accumulator.calibrate(value);
        Ok(())
    }

    /// Snapshot for the durable store.
    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            native_value: self.accumulator.total(),
            unit: self.accumulator.unit().map(str::to_owned),
            last_period: self.accumulator.last_period(),
            last_value: self.accumulator.last_value(),
            last_reset: self.accumulator.last_reset(),
            status: self.gate.status(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn unique_id(&self) -> &str {
        &self.config.unique_id
    }

    pub fn source(&self) -> &str {
        &self.config.source
    }

    pub fn tariff(&self) -> Option<&str> {
        self.config.tariff.as_deref()
    }

    pub fn tariff_selector(&self) -> Option<&str> {
        self.config.tariff_selector.as_deref()
    }

    pub fn status(&self) -> MeterStatus {
        self.gate.status()
    }

    pub fn total(&self) -> Option<Decimal> {
        self.accumulator.total()
    }

    pub fn unit(&self) -> Option<&str> {
        self.accumulator.unit()
    }

    pub fn last_period(&self) -> Decimal {
        self.accumulator.last_period()
    }

    pub fn last_value(&self) -> Option<Decimal> {
        self.accumulator.last_value()
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        self.accumulator.last_reset()
    }

    /// Next scheduled reset instant, if a schedule exists.
    pub fn next_reset(&self) -> Option<DateTime<Utc>> {
        self.next_reset
    }

    /// Five-field descriptor of the reset schedule, if one exists.
    pub fn schedule_descriptor(&self) -> Option<String> {
        self.pattern.as_ref().map(|p| p.to_string())
    }

    pub fn is_started(&self) -> bool {
        self.accumulator.is_started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReadingMode, ResetOffset, ScheduleSpec};
    use crate::event::StateValue;
    use crate::schedule::Period;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn reading(old: Option<&str>, new: &str) -> SourceUpdate {
        SourceUpdate::new(old.map(StateValue::from_report), StateValue::from_report(new))
    }

    fn simple_meter(now: DateTime<Utc>) -> Meter {
        let mut meter = Meter::new(MeterConfig::new("house", "sensor.energy"), now).unwrap();
        meter.activate(None);
        meter.start(Some("kWh"));
        meter
    }

    #[test]
    fn test_malformed_pattern_is_fatal() {
        let config = MeterConfig::new("house", "sensor.energy")
            .with_schedule(ScheduleSpec::Pattern("99 * * * *".to_string()));
        assert!(matches!(
            Meter::new(config, at(2024, 1, 1, 0, 0, 0)),
            Err(MeterError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_ungated_meter_collects_after_activate() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let meter = simple_meter(now);
        assert_eq!(meter.status(), MeterStatus::Collecting);
    }

    #[test]
    fn test_gated_meter_waits_for_selector() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let config =
            MeterConfig::new("house", "sensor.energy").with_tariff("peak", "select.tariff");
        let mut meter = Meter::new(config, now).unwrap();
        meter.activate(None);
        assert_eq!(meter.status(), MeterStatus::Paused);
        meter.handle_tariff_change(&TariffChange::to("peak"));
        assert_eq!(meter.status(), MeterStatus::Collecting);
    }

    #[test]
    fn test_paused_meter_drops_updates() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let config =
            MeterConfig::new("house", "sensor.energy").with_tariff("peak", "select.tariff");
        let mut meter = Meter::new(config, now).unwrap();
        meter.activate(Some("off-peak"));
        meter.start(Some("kWh"));
        assert_eq!(meter.handle_source_update(&reading(Some("1"), "5")), None);
        assert_eq!(meter.total(), Some(Decimal::ZERO));
    }

    #[test]
    fn test_tariff_switch_clears_basis() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let config = MeterConfig::new("house", "sensor.energy")
            .with_mode(ReadingMode::LastReading)
            .with_tariff("peak", "select.tariff");
        let mut meter = Meter::new(config, now).unwrap();
        meter.activate(Some("peak"));
        meter.start(Some("kWh"));
        meter.handle_source_update(&reading(None, "100"));
        meter.handle_source_update(&reading(None, "110"));
        assert_eq!(meter.total(), Some("10".parse().unwrap()));

        meter.handle_tariff_change(&TariffChange::to("off-peak"));
        meter.handle_tariff_change(&TariffChange::to("peak"));
        // Stale basis is gone: the next reading only re-establishes it.
        meter.handle_source_update(&reading(None, "250"));
        assert_eq!(meter.total(), Some("10".parse().unwrap()));
        meter.handle_source_update(&reading(None, "255"));
        assert_eq!(meter.total(), Some("15".parse().unwrap()));
    }

    #[test]
    fn test_poll_schedule_rearms_before_reset() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let config = MeterConfig::new("house", "sensor.energy").with_schedule(
            ScheduleSpec::Periodic {
                period: Period::Daily,
                offset: ResetOffset::default(),
            },
        );
        let mut meter = Meter::new(config, now).unwrap();
        meter.activate(None);
        meter.start(Some("kWh"));
        assert_eq!(meter.next_reset(), Some(at(2024, 1, 2, 0, 0, 0)));

        meter.handle_source_update(&reading(Some("0"), "7"));
        // Nothing due yet.
        assert_eq!(meter.poll_schedule(at(2024, 1, 1, 23, 59, 0)), None);
        // Firing closes the period and arms the following occurrence.
        let closed = meter.poll_schedule(at(2024, 1, 2, 0, 0, 1));
        assert_eq!(closed, Some("7".parse().unwrap()));
        assert_eq!(meter.last_period(), "7".parse().unwrap());
        assert_eq!(meter.total(), Some(Decimal::ZERO));
        assert_eq!(meter.next_reset(), Some(at(2024, 1, 3, 0, 0, 0)));
    }

    #[test]
    fn test_late_poll_does_not_double_fire() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let config = MeterConfig::new("house", "sensor.energy").with_schedule(
            ScheduleSpec::Periodic {
                period: Period::Daily,
                offset: ResetOffset::default(),
            },
        );
        let mut meter = Meter::new(config, now).unwrap();
        meter.activate(None);
        let late = at(2024, 1, 5, 12, 0, 0);
        assert!(meter.poll_schedule(late).is_some());
        // Re-armed strictly after the late firing.
        assert_eq!(meter.next_reset(), Some(at(2024, 1, 6, 0, 0, 0)));
        assert_eq!(meter.poll_schedule(late), None);
    }

    #[test]
    fn test_meter_without_schedule_never_fires() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let mut meter = simple_meter(now);
        assert_eq!(meter.next_reset(), None);
        assert_eq!(meter.poll_schedule(at(2030, 1, 1, 0, 0, 0)), None);
        assert_eq!(meter.schedule_descriptor(), None);
    }

    #[test]
    fn test_calibrate_rejects_non_finite() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let mut meter = simple_meter(now);
        assert!(matches!(
            meter.calibrate(f64::NAN),
            Err(MeterError::InvalidCalibration(_))
        ));
        assert!(matches!(
            meter.calibrate(f64::INFINITY),
            Err(MeterError::InvalidCalibration(_))
        ));
        meter.calibrate(100.5).unwrap();
        assert_eq!(meter.total(), Some("100.5".parse().unwrap()));
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let mut meter = simple_meter(now);
        meter.handle_source_update(&reading(Some("0"), "12.5"));
        meter.reset(at(2024, 2, 1, 0, 0, 0));
        meter.handle_source_update(&reading(Some("12.5"), "20"));

        let snapshot = meter.snapshot();
        let mut twin = Meter::new(MeterConfig::new("house", "sensor.energy"), now).unwrap();
        twin.restore(
            Some(StoredSnapshot::Preferred(snapshot.clone())),
            at(2024, 3, 1, 0, 0, 0),
        );
        assert_eq!(twin.total(), meter.total());
        assert_eq!(twin.last_period(), meter.last_period());
        assert_eq!(twin.last_reset(), meter.last_reset());
        assert_eq!(twin.status(), meter.status());
        assert_eq!(twin.snapshot(), snapshot);
    }

    #[test]
    fn test_restore_arms_schedule() {
        let config = MeterConfig::new("house", "sensor.energy").with_schedule(
            ScheduleSpec::Periodic {
                period: Period::Monthly,
                offset: ResetOffset::new(4, 5400),
            },
        );
        let mut meter = Meter::new(config, at(2024, 1, 1, 0, 0, 0)).unwrap();
        meter.restore(None, at(2024, 1, 5, 1, 30, 1));
        assert_eq!(meter.next_reset(), Some(at(2024, 2, 5, 1, 30, 0)));
    }
}
