// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Collection gating
//!
//! A meter is either `Collecting` (subscribed to its source) or `Paused`.
//! The gate flips between the two on tariff selector values: the meter
//! collects exactly while the selector matches its own tariff. A meter
//! without a selector bypasses gating and collects from group start.
//!
//! The live subscription is a [`Subscription`] capability rather than a
//! boolean: it is acquired on entering `Collecting` and must be released
//! exactly once on leaving, which `release(self)` enforces by move.
//! Release is synchronous - a paused gate drops the very next delivery.

use log::debug;
use serde::{Deserialize, Serialize};

/// Whether a meter is currently fed by its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterStatus {
    /// Subscribed to source updates.
    Collecting,
    /// Not subscribed; source updates are dropped.
    #[default]
    Paused,
}

impl MeterStatus {
    pub fn is_collecting(&self) -> bool {
        matches!(self, MeterStatus::Collecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MeterStatus::Collecting => "collecting",
            MeterStatus::Paused => "paused",
        }
    }
}

/// Capability representing a live subscription to one source's updates.
#[derive(Debug)]
#[must_use = "an unreleased subscription keeps the meter collecting"]
pub struct Subscription {
    source: String,
}

impl Subscription {
    fn acquire(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }

    /// Source reference this subscription is attached to.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Release the subscription. Consumes the capability, so a release
    /// cannot happen twice.
    fn release(self) {}
}

/// Two-state controller gating a meter's source subscription on an
/// external tariff selector.
#[derive(Debug)]
pub struct CollectionGate {
    name: String,
    source: String,
    tariff: Option<String>,
    subscription: Option<Subscription>,
}

impl CollectionGate {
    pub fn new(name: impl Into<String>, source: impl Into<String>, tariff: Option<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            tariff,
            subscription: None,
        }
    }

    pub fn status(&self) -> MeterStatus {
        if self.subscription.is_some() {
            MeterStatus::Collecting
        } else {
            MeterStatus::Paused
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.subscription.is_some()
    }

    /// React to a tariff selector value: collect while it matches this
    /// meter's tariff, pause otherwise. Idempotent.
    pub fn on_tariff_value(&mut self, value: &str) -> MeterStatus {
        if self.tariff.as_deref() == Some(value) {
            self.engage();
        } else {
            self.disengage();
        }
        debug!(
            "{} - {} - source <{}>",
            self.name,
            self.status().as_str(),
            self.source
        );
        self.status()
    }

    /// Enter `Collecting`. Used directly for meters without a selector
    /// and for restoring a persisted `Collecting` status.
    pub fn engage(&mut self) {
        if self.subscription.is_none() {
            self.subscription = Some(Subscription::acquire(&self.source));
        }
    }

    /// Enter `Paused`, releasing the subscription if one is live.
    pub fn disengage(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }
    }
}
