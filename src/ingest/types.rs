use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Every channel name the station persists or broadcasts. Raw and derived channels share one
/// namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Measure {
    Temperature,
    Humidity,
    Pressure,
    Lux,
    Raindrop,
    UvIndex,
    Tvoc,
    Eco2,
    DewPoint,
    HeatIndex,
    AbsoluteHumidity,
}

impl Measure {
    pub const RAW: [Measure; 8] = [
        Measure::Temperature,
        Measure::Humidity,
        Measure::Pressure,
        Measure::Lux,
        Measure::Raindrop,
        Measure::UvIndex,
        Measure::Tvoc,
        Measure::Eco2,
    ];

    pub const DERIVED: [Measure; 3] = [
        Measure::DewPoint,
        Measure::HeatIndex,
        Measure::AbsoluteHumidity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Measure::Temperature => "temperature",
            Measure::Humidity => "humidity",
            Measure::Pressure => "pressure",
            Measure::Lux => "lux",
            Measure::Raindrop => "raindrop",
            Measure::UvIndex => "uv_index",
            Measure::Tvoc => "tvoc",
            Measure::Eco2 => "eco2",
            Measure::DewPoint => "dew_point",
            Measure::HeatIndex => "heat_index",
            Measure::AbsoluteHumidity => "absolute_humidity",
        }
    }

    /// Raindrop is a 0/1 flag; everything else is continuous.
    pub fn is_discrete(self) -> bool {
        matches!(self, Measure::Raindrop)
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Measure {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Measure::RAW
            .iter()
            .chain(Measure::DERIVED.iter())
            .copied()
            .find(|m| m.as_str() == raw)
            .ok_or_else(|| format!("unknown measure {raw:?}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub measure: Measure,
    pub value: f64,
    pub timestamp_ms: i64,
}

impl Sample {
    pub fn new(measure: Measure, value: f64, timestamp_ms: i64) -> Self {
        Self {
            measure,
            value,
            timestamp_ms,
        }
    }

    /// JSON number for the value; discrete channels are rendered as integers.
    pub fn json_value(&self) -> JsonValue {
        if self.measure.is_discrete() {
            JsonValue::from(self.value.round() as i64)
        } else {
            JsonValue::from(self.value)
        }
    }
}

/// One batch as delivered by a device transport.
///
/// `celsius` and `humidity` are required; a `None` there rejects the whole batch. Optional
/// channels use `None` for "not reported by this device" and the wire sentinel `0` for
/// "sensor present but no reading", which the sanitizer substitutes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawReading {
    pub celsius: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub lux: Option<f64>,
    pub raindrop: Option<i64>,
    pub uv_index: Option<f64>,
    pub tvoc: Option<f64>,
    pub eco2: Option<f64>,
}

impl RawReading {
    pub fn primary(celsius: f64, humidity: f64) -> Self {
        Self {
            celsius: Some(celsius),
            humidity: Some(humidity),
            ..Self::default()
        }
    }

    /// Optional channels in their fixed order, as `(measure, value)` pairs.
    pub(crate) fn optional_channels(&self) -> [(Measure, Option<f64>); 6] {
        [
            (Measure::Pressure, self.pressure),
            (Measure::Lux, self.lux),
            (Measure::Raindrop, self.raindrop.map(|v| v as f64)),
            (Measure::UvIndex, self.uv_index),
            (Measure::Tvoc, self.tvoc),
            (Measure::Eco2, self.eco2),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_names_round_trip_and_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for measure in Measure::RAW.iter().chain(Measure::DERIVED.iter()) {
            assert!(seen.insert(measure.as_str()));
            assert_eq!(measure.as_str().parse::<Measure>().unwrap(), *measure);
        }
        assert!("wind_speed".parse::<Measure>().is_err());
    }

    #[test]
    fn raindrop_renders_as_integer() {
        let sample = Sample::new(Measure::Raindrop, 1.0, 0);
        assert_eq!(sample.json_value().to_string(), "1");
        let sample = Sample::new(Measure::Pressure, 1001.5, 0);
        assert_eq!(sample.json_value().to_string(), "1001.5");
    }
}
