// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Tally
//!
//! A stateful accumulation engine for utility metering. Tally turns a
//! monotonically increasing (or delta) source measurement stream into a
//! running meter total, with:
//!
//! - **Three interpretation modes**: deltas against the previous source
//!   state, direct increments, or deltas against the meter's own last
//!   reading
//! - **Scheduled resets**: named periods (quarter-hourly up to yearly)
//!   with offsets, or explicit five-field calendar patterns
//! - **Tariff gating**: one source fans out to per-tariff series that
//!   collect exactly while an external selector matches their tariff
//! - **Durable restore**: snapshots survive restarts, including the
//!   legacy persisted shape, with corruption falling back to safe
//!   defaults instead of failing startup
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use tally::{Meter, MeterConfig, SourceUpdate, StateValue};
//!
//! let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let mut meter = Meter::new(MeterConfig::new("energy", "sensor.energy"), now).unwrap();
//! meter.activate(None); // no tariff selector: always collecting
//!
//! // The first valid reading initializes the series with the source's unit.
//! meter.start(Some("kWh"));
//! let update = SourceUpdate::new(
//!     Some(StateValue::from_report("10.0")),
//!     StateValue::from_report("12.5"),
//! );
//! meter.handle_source_update(&update);
//! assert_eq!(meter.total(), Some("2.5".parse().unwrap()));
//! ```
//!
//! ## Tariff splitting
//!
//! A [`MeterGroup`] owns every series fed by one source. Tariff changes
//! move collection between members; the first valid reading initializes
//! all of them:
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use tally::{MeterConfig, MeterGroup, SourceUpdate, StateValue, TariffChange};
//!
//! let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let mut group = MeterGroup::with_selector("sensor.energy", "select.tariff");
//! for tariff in ["peak", "off-peak"] {
//!     let config = MeterConfig::new("house", "sensor.energy")
//!         .with_tariff(tariff, "select.tariff");
//!     group.add_meter(config, now).unwrap();
//! }
//! group.activate(Some("peak"));
//!
//! let first = SourceUpdate::new(None, StateValue::from_report("100")).with_unit("kWh");
//! group.handle_source_update(&first);
//! group.handle_source_update(&SourceUpdate::new(
//!     Some(StateValue::from_report("100")),
//!     StateValue::from_report("105"),
//! ));
//!
//! assert_eq!(
//!     group.meter(Some("peak")).unwrap().total(),
//!     Some("5".parse().unwrap())
//! );
//! group.handle_tariff_change(&TariffChange::to("off-peak"));
//! ```
//!
//! ## Modules
//!
//! - [`accumulator`]: running totals and reading interpretation
//! - [`schedule`]: period-to-pattern conversion and next-instant math
//! - [`gate`]: collecting/paused control driven by tariff selection
//! - [`meter`]: one tariff series tying the pieces together
//! - [`group`]: per-source fan-out and event routing
//! - [`snapshot`] / [`recovery`] / [`store`]: durable state

// Modules
pub mod accumulator;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod group;
pub mod meter;
pub mod recovery;
pub mod schedule;
pub mod snapshot;
pub mod store;

// Re-exports for convenience
pub use accumulator::{Accumulator, AdjustmentResult, SkipReason};
pub use config::{MeterConfig, ReadingMode, ResetOffset, ScheduleSpec};
pub use error::{MeterError, Result};
pub use event::{SourceUpdate, StateValue, TariffChange};
pub use gate::{CollectionGate, MeterStatus, Subscription};
pub use group::MeterGroup;
pub use meter::Meter;
pub use recovery::RestoredState;
pub use schedule::{CalendarPattern, Period};
pub use snapshot::{LegacySnapshot, MeterSnapshot, StoredSnapshot};
pub use store::{JsonFileStore, MemoryStore, SnapshotStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
