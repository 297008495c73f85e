// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Host-facing event types
//!
//! The engine consumes two notification shapes from its host bus: source
//! sensor state changes and tariff selector state changes. States arrive
//! as raw strings; `unknown` and `unavailable` are reserved markers for
//! states that carry no value.

use rust_decimal::Decimal;

/// Reserved marker for a state that was never observed.
pub const STATE_UNKNOWN: &str = "unknown";
/// Reserved marker for an entity that is currently unreachable.
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// An entity state as reported on the host bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValue {
    /// No state has ever been observed.
    Unknown,
    /// The entity exists but is currently unreachable.
    Unavailable,
    /// A raw state payload.
    Value(String),
}

impl StateValue {
    /// Classify a raw reported state string.
    pub fn from_report(raw: &str) -> Self {
        match raw {
            STATE_UNKNOWN => StateValue::Unknown,
            STATE_UNAVAILABLE => StateValue::Unavailable,
            _ => StateValue::Value(raw.to_string()),
        }
    }

    /// Whether this state carries a payload at all.
    pub fn is_usable(&self) -> bool {
        matches!(self, StateValue::Value(_))
    }

    /// Numeric view of the payload, if it parses as a decimal.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            StateValue::Value(raw) => raw.trim().parse().ok(),
            _ => None,
        }
    }

    /// Raw string form, with the reserved markers for valueless states.
    pub fn as_str(&self) -> &str {
        match self {
            StateValue::Unknown => STATE_UNKNOWN,
            StateValue::Unavailable => STATE_UNAVAILABLE,
            StateValue::Value(raw) => raw,
        }
    }
}

impl From<&str> for StateValue {
    fn from(raw: &str) -> Self {
        StateValue::from_report(raw)
    }
}

/// Source-sensor state-change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUpdate {
    /// Previous source state, absent when none was ever delivered.
    pub old: Option<StateValue>,
    /// New source state.
    pub new: StateValue,
    /// Unit of measurement attached to the new state, if reported.
    pub unit: Option<String>,
}

impl SourceUpdate {
    /// Build an update without a unit hint.
    pub fn new(old: Option<StateValue>, new: StateValue) -> Self {
        Self {
            old,
            new,
            unit: None,
        }
    }

    /// Attach the source's reported unit of measurement.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Tariff-selector state-change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct TariffChange {
    /// New selector state.
    pub new: StateValue,
}

impl TariffChange {
    /// Selector switched to the named tariff.
    pub fn to(tariff: &str) -> Self {
        Self {
            new: StateValue::from_report(tariff),
        }
    }
}
