//! Physically derived quantities computed from temperature (°C) and relative humidity (%).
//!
//! Each metric is computed independently; a metric whose domain guard fails is `None` and simply
//! not emitted for that batch.

use super::types::{Measure, Sample};

const MAGNUS_A: f64 = 17.27;
const MAGNUS_B: f64 = 237.7;
const MIN_RH_FRACTION_PERCENT: f64 = 1e-6;

/// Rothfusz coefficients for the terms `1, T, R, T·R, T², R², T²·R, T·R², T²·R²` (T in °F).
const ROTHFUSZ: [f64; 9] = [
    -42.379,
    2.04901523,
    10.14333127,
    -0.22475541,
    -0.00683783,
    -0.05481717,
    0.00122874,
    0.00085282,
    -0.00000199,
];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DerivedMetrics {
    pub dew_point: Option<f64>,
    pub heat_index: Option<f64>,
    pub absolute_humidity: Option<f64>,
}

impl DerivedMetrics {
    pub fn compute(celsius: f64, humidity: f64) -> Self {
        Self {
            dew_point: dew_point(celsius, humidity),
            heat_index: Some(heat_index(celsius, humidity)),
            absolute_humidity: absolute_humidity(celsius, humidity),
        }
    }

    /// Samples for every metric that was computed and is finite, stamped with `timestamp_ms`.
    pub fn samples(&self, timestamp_ms: i64) -> Vec<Sample> {
        [
            (Measure::DewPoint, self.dew_point),
            (Measure::HeatIndex, self.heat_index),
            (Measure::AbsoluteHumidity, self.absolute_humidity),
        ]
        .into_iter()
        .filter_map(|(measure, value)| {
            value
                .filter(|v| v.is_finite())
                .map(|v| Sample::new(measure, v, timestamp_ms))
        })
        .collect()
    }
}

/// Magnus dew point in °C. Undefined for `rh <= 0`.
pub fn dew_point(celsius: f64, rh: f64) -> Option<f64> {
    if rh.is_nan() || rh <= 0.0 {
        return None;
    }
    let rh = rh.min(100.0).max(MIN_RH_FRACTION_PERCENT);
    let gamma = (MAGNUS_A * celsius) / (MAGNUS_B + celsius) + (rh / 100.0).ln();
    Some((MAGNUS_B * gamma) / (MAGNUS_A - gamma))
}

/// Rothfusz heat index, evaluated in °F and returned in °C. No domain restriction.
pub fn heat_index(celsius: f64, rh: f64) -> f64 {
    let t = celsius * 9.0 / 5.0 + 32.0;
    let r = clamp_rh(rh);
    let terms = [
        1.0,
        t,
        r,
        t * r,
        t * t,
        r * r,
        t * t * r,
        t * r * r,
        t * t * r * r,
    ];
    let hi_f: f64 = ROTHFUSZ.iter().zip(terms).map(|(c, term)| c * term).sum();
    (hi_f - 32.0) * 5.0 / 9.0
}

/// Absolute humidity in g/m³.
///
/// `es` is the saturation vapour pressure in hPa; with RH in percent, `es·RH·2.1674/T_K` equals
/// `216.74·e/T_K`, the usual ideal-gas form with `e = es·RH/100`. This is not the frequently
/// quoted `es·(RH/100)·2.1674/T_K`, which divides RH by 100 twice and comes out 100 times too
/// small: 20 °C at 50 % gives ≈ 8.64 g/m³ here and 0.0864 there.
pub fn absolute_humidity(celsius: f64, rh: f64) -> Option<f64> {
    if rh.is_nan() {
        return None;
    }
    let r = clamp_rh(rh);
    let es = 6.112 * ((17.67 * celsius) / (celsius + 243.5)).exp();
    Some(es * r * 2.1674 / (273.15 + celsius))
}

fn clamp_rh(rh: f64) -> f64 {
    rh.clamp(0.0, 100.0)
}
