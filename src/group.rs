// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-source meter coordination
//!
//! One source sensor fans out to N per-tariff meters. The group owns
//! that collection explicitly - meters join during setup, never during
//! steady-state delivery - and routes every host event to its members:
//! source updates (with first-reading fan-out initialization), tariff
//! changes, tariff selection services, reset broadcasts and calibration.
//!
//! When a [`SnapshotStore`] is attached, member snapshots are written
//! after every state-affecting operation; write failures are logged and
//! never roll back in-memory state.

use chrono::{DateTime, Utc};
use log::warn;
use rust_decimal::Decimal;

use crate::config::MeterConfig;
use crate::error::{MeterError, Result};
use crate::event::{SourceUpdate, StateValue, TariffChange};
use crate::meter::Meter;
use crate::store::SnapshotStore;

/// Coordinator for every meter fed by one source.
pub struct MeterGroup {
    source: String,
    tariff_selector: Option<String>,
    current_tariff: Option<String>,
    meters: Vec<Meter>,
    store: Option<Box<dyn SnapshotStore>>,
}

impl MeterGroup {
    /// Group without a tariff selector: members collect unconditionally.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            tariff_selector: None,
            current_tariff: None,
            meters: Vec::new(),
            store: None,
        }
    }

    /// Group gated by a tariff selector entity.
    pub fn with_selector(source: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            tariff_selector: Some(selector.into()),
            ..Self::new(source)
        }
    }

    /// Attach a durable snapshot store. Members added afterwards restore
    /// from it; every state-affecting operation writes back to it.
    pub fn with_store(mut self, store: Box<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a meter during setup and restore its durable state.
    pub fn add_meter(&mut self, config: MeterConfig, now: DateTime<Utc>) -> Result<()> {
        let mut meter = Meter::new(config, now)?;
        let stored = self
            .store
            .as_ref()
            .and_then(|store| store.load(meter.unique_id()));
        meter.restore(stored, now);
        self.meters.push(meter);
        Ok(())
    }

    /// Activate the group: prime gates from the selector's current value
    /// when it is already known; ungated members start collecting.
    pub fn activate(&mut self, selector_state: Option<&str>) {
        if let Some(state) = selector_state {
            self.current_tariff = Some(state.to_string());
        }
        for meter in &mut self.meters {
            meter.activate(selector_state);
        }
        self.persist_all();
    }

    /// Route one source update. The first usable reading delivered while
    /// any collecting member is uninitialized starts *every* member with
    /// the discovered unit, then the update is delivered to collecting
    /// members in order.
    pub fn handle_source_update(&mut self, update: &SourceUpdate) {
        if update.new.is_usable()
            && self
                .meters
                .iter()
                .any(|meter| meter.status().is_collecting() && !meter.is_started())
        {
            for meter in &mut self.meters {
                meter.start(update.unit.as_deref());
            }
        }
        for meter in &mut self.meters {
            meter.handle_source_update(update);
        }
        self.persist_all();
    }

    /// Route a tariff selector change to every member.
    pub fn handle_tariff_change(&mut self, change: &TariffChange) {
        if let StateValue::Value(tariff) = &change.new {
            self.current_tariff = Some(tariff.clone());
        }
        for meter in &mut self.meters {
            meter.handle_tariff_change(change);
        }
        self.persist_all();
    }

    /// Service: switch the selector to a named tariff.
    pub fn select_tariff(&mut self, tariff: &str) -> Result<()> {
        if !self.tariffs().iter().any(|t| t == tariff) {
            return Err(MeterError::UnknownTariff(tariff.to_string()));
        }
        self.handle_tariff_change(&TariffChange::to(tariff));
        Ok(())
    }

    /// Service: advance the selector to the next configured tariff,
    /// wrapping around.
    pub fn next_tariff(&mut self) -> Result<()> {
        let tariffs = self.tariffs();
        if tariffs.is_empty() {
            return Err(MeterError::NoTariffs);
        }
        let next = match &self.current_tariff {
            Some(current) => {
                let position = tariffs.iter().position(|t| t == current);
                match position {
                    Some(index) => tariffs[(index + 1) % tariffs.len()].clone(),
                    None => tariffs[0].clone(),
                }
            }
            None => tariffs[0].clone(),
        };
        self.handle_tariff_change(&TariffChange::to(&next));
        Ok(())
    }

    /// Reset broadcast addressed by tariff-selector identity: only
    /// members whose selector matches are reset. Returns the closed
    /// totals in member order.
    pub fn reset_meters(&mut self, selector: Option<&str>, now: DateTime<Utc>) -> Vec<Decimal> {
        let mut closed = Vec::new();
        for meter in &mut self.meters {
            if meter.tariff_selector() == selector {
                closed.push(meter.reset(now));
            }
        }
        self.persist_all();
        closed
    }

    /// Scheduled-reset sweep over every member.
    pub fn poll_schedule(&mut self, now: DateTime<Utc>) {
        let mut fired = false;
        for meter in &mut self.meters {
            fired |= meter.poll_schedule(now).is_some();
        }
        if fired {
            self.persist_all();
        }
    }

    /// Calibrate the series collecting under `tariff` (`None` addresses
    /// the single ungated member).
    pub fn calibrate(&mut self, tariff: Option<&str>, value: f64) -> Result<()> {
        let meter = self
            .meters
            .iter_mut()
            .find(|meter| meter.tariff() == tariff)
            .ok_or_else(|| MeterError::MeterNotFound(tariff.unwrap_or("<none>").to_string()))?;
        meter.calibrate(value)?;
        self.persist_all();
        Ok(())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tariff_selector(&self) -> Option<&str> {
        self.tariff_selector.as_deref()
    }

    /// Currently selected tariff, as last observed or selected.
    pub fn current_tariff(&self) -> Option<&str> {
        self.current_tariff.as_deref()
    }

    /// Member tariffs in registration order.
    pub fn tariffs(&self) -> Vec<String> {
        self.meters
            .iter()
            .filter_map(|meter| meter.tariff().map(str::to_owned))
            .collect()
    }

    pub fn meters(&self) -> &[Meter] {
        &self.meters
    }

    /// Member collecting under `tariff`.
    pub fn meter(&self, tariff: Option<&str>) -> Option<&Meter> {
        self.meters.iter().find(|meter| meter.tariff() == tariff)
    }

    fn persist_all(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        for meter in &self.meters {
            if let Err(err) = store.save(meter.unique_id(), &meter.snapshot()) {
                warn!("Failed to persist meter <{}>: {}", meter.name(), err);
            }
        }
    }
}
