// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Tally
//!
//! Transient data anomalies (unavailable sources, unparsable readings,
//! rollovers) are never errors; they surface as skipped adjustments with a
//! diagnostic log line. The variants here cover configuration and command
//! failures, which are surfaced to the caller immediately.

use thiserror::Error;

/// Result type alias for metering operations
pub type Result<T> = std::result::Result<T, MeterError>;

/// Main error type for metering operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeterError {
    /// Malformed calendar pattern (construction-time, fatal)
    #[error("Invalid calendar pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Unknown named period
    #[error("Unknown meter period: {0}")]
    UnknownPeriod(String),

    /// Calibration value cannot be represented as a decimal (NaN, infinite)
    #[error("Invalid calibration value: {0}")]
    InvalidCalibration(String),

    /// Tariff is not configured on this group
    #[error("Unknown tariff: {0}")]
    UnknownTariff(String),

    /// The group has no tariff-split members to cycle through
    #[error("No tariffs configured")]
    NoTariffs,

    /// No meter matches the addressed series
    #[error("No meter for tariff: {0}")]
    MeterNotFound(String),

    /// Snapshot store failure (persistence writes are fire-and-forget at
    /// the engine level; this surfaces only from direct store calls)
    #[error("Store error: {0}")]
    Store(String),
}
