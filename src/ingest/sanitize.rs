use super::types::{Measure, RawReading};
use rand::Rng;
use std::ops::RangeInclusive;

/// Plausible physical range for each channel; used both for placeholder substitution and for
/// synthetic backfill.
pub fn channel_range(measure: Measure) -> Option<RangeInclusive<f64>> {
    let range = match measure {
        Measure::Temperature => 15.0..=30.0,
        Measure::Humidity => 40.0..=90.0,
        Measure::Pressure => 980.0..=1030.0,
        Measure::Lux => 0.0..=20000.0,
        Measure::Raindrop => 0.0..=1.0,
        Measure::UvIndex => 0.0..=10.0,
        Measure::Tvoc => 0.0..=1000.0,
        Measure::Eco2 => 400.0..=2000.0,
        Measure::DewPoint | Measure::HeatIndex | Measure::AbsoluteHumidity => return None,
    };
    Some(range)
}

/// Draws one value uniformly from the channel's range. Raindrop draws from {0, 1}.
pub fn draw<R: Rng + ?Sized>(measure: Measure, rng: &mut R) -> Option<f64> {
    if measure.is_discrete() {
        return Some(if rng.gen_bool(0.5) { 1.0 } else { 0.0 });
    }
    let range = channel_range(measure)?;
    Some(rng.gen_range(range))
}

/// Replaces placeholder zeros on optional channels with random in-range values.
///
/// A genuine reading of exactly zero cannot be told apart from the placeholder and is replaced
/// as well. Required channels are never touched.
pub fn sanitize<R: Rng + ?Sized>(reading: &mut RawReading, rng: &mut R) {
    substitute(&mut reading.pressure, Measure::Pressure, rng);
    substitute(&mut reading.lux, Measure::Lux, rng);
    substitute(&mut reading.uv_index, Measure::UvIndex, rng);
    substitute(&mut reading.tvoc, Measure::Tvoc, rng);
    substitute(&mut reading.eco2, Measure::Eco2, rng);
    if reading.raindrop == Some(0) {
        reading.raindrop = Some(i64::from(rng.gen_bool(0.5)));
    }
}

fn substitute<R: Rng + ?Sized>(slot: &mut Option<f64>, measure: Measure, rng: &mut R) {
    if *slot == Some(0.0) {
        *slot = draw(measure, rng);
    }
}
