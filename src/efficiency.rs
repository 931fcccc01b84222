//! Fuel efficiency over a vehicle's fillup history.

use crate::models::FillupRecord;
use rust_decimal::Decimal;

/// Recomputes `fuel_efficiency` for every record and returns them in odometer order.
///
/// Efficiency is distance per unit of volume, measured between two full
/// fillups. Partial fillups in between share the value of the full fillup that
/// closes their tank. A record flagged with `previous_missed_fillups` breaks the
/// chain: it and any pending partials get no value. Partials still pending at
/// the end of the history get no value either.
pub fn recalculate(mut records: Vec<FillupRecord>) -> Vec<FillupRecord> {
    // Stable, so equal odometer readings keep their input order.
    records.sort_by(|a, b| a.odometer_reading.cmp(&b.odometer_reading));

    let mut last_full_odometer: Option<Decimal> = None;
    let mut current_partials: Vec<FillupRecord> = Vec::new();
    let mut output = Vec::with_capacity(records.len());

    for mut record in records {
        if record.previous_missed_fillups {
            flush(&mut output, &mut current_partials, None);
            record.fuel_efficiency = None;
            last_full_odometer = (!record.partial).then_some(record.odometer_reading);
            output.push(record);
        } else if record.partial {
            current_partials.push(record);
        } else {
            let efficiency = last_full_odometer.and_then(|baseline| {
                let distance = record.odometer_reading - baseline;
                let total_volume =
                    current_partials.iter().map(|p| p.volume).sum::<Decimal>() + record.volume;
                if total_volume.is_zero() {
                    None
                } else {
                    distance.checked_div(total_volume)
                }
            });
            flush(&mut output, &mut current_partials, efficiency);
            record.fuel_efficiency = efficiency;
            last_full_odometer = Some(record.odometer_reading);
            output.push(record);
        }
    }

    flush(&mut output, &mut current_partials, None);
    output
}

fn flush(
    output: &mut Vec<FillupRecord>,
    partials: &mut Vec<FillupRecord>,
    efficiency: Option<Decimal>,
) {
    output.extend(partials.drain(..).map(|mut p| {
        p.fuel_efficiency = efficiency;
        p
    }));
}
