// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Simple walkthrough: a dual-tariff energy meter with a daily reset.
//!
//! Run with: cargo run --example simple_meter

use chrono::Utc;
use tally::{
    MeterConfig, MeterGroup, Period, ReadingMode, ResetOffset, ScheduleSpec, SourceUpdate,
    StateValue, TariffChange,
};

fn update(old: Option<&str>, new: &str) -> SourceUpdate {
    SourceUpdate::new(old.map(StateValue::from_report), StateValue::from_report(new))
}

fn main() -> tally::Result<()> {
    let now = Utc::now();

    println!("=== Tally - dual-tariff meter demo ===\n");

    let mut group = MeterGroup::with_selector("sensor.energy", "select.tariff");
    let schedule = ScheduleSpec::Periodic {
        period: Period::Daily,
        offset: ResetOffset::default(),
    };
    for tariff in ["peak", "off-peak"] {
        let config = MeterConfig::new("house", "sensor.energy")
            .with_mode(ReadingMode::Normal)
            .with_tariff(tariff, "select.tariff")
            .with_schedule(schedule.clone());
        group.add_meter(config, now)?;
    }
    group.activate(Some("peak"));

    // The first valid reading initializes every series with the unit.
    group.handle_source_update(&update(None, "1000.0").with_unit("kWh"));
    group.handle_source_update(&update(Some("1000.0"), "1004.2"));
    group.handle_source_update(&update(Some("1004.2"), "1010.0"));

    // Evening: the selector flips to off-peak.
    group.handle_tariff_change(&TariffChange::to("off-peak"));
    group.handle_source_update(&update(Some("1010.0"), "1013.5"));

    for meter in group.meters() {
        println!(
            "{:10} {:10} total={:>8} last_period={:>6} unit={}",
            meter.tariff().unwrap_or("-"),
            meter.status().as_str(),
            meter
                .total()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unset".to_string()),
            meter.last_period(),
            meter.unit().unwrap_or("?"),
        );
        if let Some(next) = meter.next_reset() {
            println!("{:10} next reset at {}", "", next);
        }
    }

    Ok(())
}
