use serde::Serialize;

use crate::error::{Error, Result};

/// Serialization format for sensor payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, good for debugging).
    #[default]
    Json,

    /// CBOR format (compact binary).
    Cbor,
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{Sensor, SensorValue};

    #[test]
    fn test_cbor_is_smaller() {
        let sensor = Sensor::new("battery", "Battery Level", SensorValue::Number(80.0))
            .with_unit("%")
            .with_attribute("Data Source", "upower");

        let json = encode(&sensor, Format::Json).unwrap();
        let cbor = encode(&sensor, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len());
        assert_eq!(json.first(), Some(&b'{'));

        let decoded: Sensor = ciborium::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(decoded.id, "battery");
        assert_eq!(decoded.value, SensorValue::Number(80.0));
    }

    #[test]
    fn test_format_names() {
        let format: Format = serde_json::from_str(r#""cbor""#).unwrap();
        assert_eq!(format, Format::Cbor);
        assert_eq!(Format::default(), Format::Json);
    }
}
