use crate::ingest::RawReading;
use anyhow::Result;
use serde::Deserialize;

/// A reading batch decoded from an MQTT publish.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub device: String,
    pub reading: RawReading,
}

#[derive(Debug, Deserialize)]
struct WireReading {
    #[serde(default, alias = "temperature")]
    celsius: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    pressure: Option<f64>,
    #[serde(default)]
    lux: Option<f64>,
    #[serde(default)]
    raindrop: Option<WireFlag>,
    #[serde(default)]
    uv_index: Option<f64>,
    #[serde(default)]
    tvoc: Option<f64>,
    #[serde(default)]
    eco2: Option<f64>,
}

/// Firmware sends the rain flag as an integer, a float or a boolean.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireFlag {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl WireFlag {
    fn as_flag(&self) -> i64 {
        match self {
            WireFlag::Bool(v) => i64::from(*v),
            WireFlag::Int(v) => i64::from(*v != 0),
            WireFlag::Float(v) => i64::from(*v != 0.0),
        }
    }
}

/// Decodes one JSON reading batch. `temperature` is accepted as an alias for `celsius`.
pub fn parse_reading(payload: &mut [u8]) -> Result<RawReading> {
    let wire: WireReading = simd_json::from_slice(payload)?;
    Ok(RawReading {
        celsius: wire.celsius,
        humidity: wire.humidity,
        pressure: wire.pressure,
        lux: wire.lux,
        raindrop: wire.raindrop.as_ref().map(WireFlag::as_flag),
        uv_index: wire.uv_index,
        tvoc: wire.tvoc,
        eco2: wire.eco2,
    })
}

/// Decodes `{prefix}/{device}/readings` publishes. Other topics yield `Ok(None)`.
pub fn parse_mqtt_payload(
    topic_prefix: &str,
    topic: &str,
    payload: &mut [u8],
) -> Result<Option<DeviceReading>> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() != 3 || parts[0] != topic_prefix || parts[2] != "readings" {
        return Ok(None);
    }

    let reading = parse_reading(payload)?;
    Ok(Some(DeviceReading {
        device: parts[1].to_string(),
        reading,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_reading() {
        let mut payload = br#"{
            "celsius": 22.4,
            "humidity": 48.0,
            "pressure": 0.0,
            "lux": 312.5,
            "raindrop": 1,
            "uv_index": 2.5,
            "tvoc": 0.0,
            "eco2": 612.0
        }"#
        .to_vec();
        let parsed = parse_mqtt_payload("weather", "weather/garden/readings", &mut payload)
            .unwrap()
            .expect("reading");
        assert_eq!(parsed.device, "garden");
        assert_eq!(parsed.reading.celsius, Some(22.4));
        assert_eq!(parsed.reading.pressure, Some(0.0));
        assert_eq!(parsed.reading.raindrop, Some(1));
        assert_eq!(parsed.reading.tvoc, Some(0.0));
        assert_eq!(parsed.reading.eco2, Some(612.0));
    }

    #[test]
    fn null_primary_and_boolean_rain_flag() {
        let mut payload = br#"{"celsius": null, "humidity": 40.0, "raindrop": false}"#.to_vec();
        let parsed = parse_mqtt_payload("weather", "weather/roof/readings", &mut payload)
            .unwrap()
            .expect("reading");
        assert_eq!(parsed.reading.celsius, None);
        assert_eq!(parsed.reading.humidity, Some(40.0));
        assert_eq!(parsed.reading.raindrop, Some(0));
        assert_eq!(parsed.reading.lux, None);
    }

    #[test]
    fn foreign_topics_are_ignored() {
        let mut payload = br#"{"celsius": 1, "humidity": 2}"#.to_vec();
        assert!(parse_mqtt_payload("weather", "weather/roof/status", &mut payload)
            .unwrap()
            .is_none());
        assert!(parse_mqtt_payload("weather", "iot/roof/readings", &mut payload)
            .unwrap()
            .is_none());
    }

    #[test]
    fn temperature_alias_is_accepted() {
        let mut payload = br#"{"temperature": 19.5, "humidity": 61.0}"#.to_vec();
        let reading = parse_reading(&mut payload).unwrap();
        assert_eq!(reading, RawReading::primary(19.5, 61.0));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let mut payload = b"celsius=20".to_vec();
        assert!(parse_mqtt_payload("weather", "weather/roof/readings", &mut payload).is_err());
    }
}
