//! Dynamically-typed values returned by the bus.
//!
//! [`BusValue`] is a tagged union over the shapes desktop services commonly
//! return. Every shape has a checked `try_*` decoder returning
//! [`BusError::TypeMismatch`] and a lenient `as_*` accessor that logs the
//! mismatch and hands back the shape's empty value, so callers can treat a
//! failed coercion as "no data".

use std::collections::HashMap;
use std::fmt::Display;

use tracing::debug;
use zbus::Message;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Structure, Value};

use crate::error::{BusError, Result};

/// A value read from the bus.
#[derive(Debug, Default, PartialEq)]
pub enum BusValue {
    /// No value (failed read, empty reply).
    #[default]
    Empty,
    /// `s`
    Str(String),
    /// `as`
    StrList(Vec<String>),
    /// `o`
    Path(String),
    /// `ao`
    PathList(Vec<String>),
    /// `a{ss}`
    StrMap(HashMap<String, String>),
    /// Any other shape, kept as-is.
    Raw(OwnedValue),
}

impl BusValue {
    /// Classify a zvariant value. Variants are unwrapped.
    pub fn from_value(value: &Value<'_>) -> Self {
        match value {
            Value::Value(inner) => Self::from_value(inner),
            Value::Str(s) => Self::Str(s.to_string()),
            Value::ObjectPath(p) => Self::Path(p.to_string()),
            other => {
                let signature = other.value_signature().to_string();
                match other.try_clone() {
                    Ok(cloned) => Self::from_container(&signature, cloned),
                    Err(e) => {
                        debug!(signature = %signature, error = %e, "Could not copy bus value");
                        Self::Empty
                    }
                }
            }
        }
    }

    fn from_container(signature: &str, value: Value<'_>) -> Self {
        let decoded = match signature {
            "as" => Vec::<String>::try_from(value).map(Self::StrList),
            "ao" => Vec::<OwnedObjectPath>::try_from(value).map(|paths| {
                Self::PathList(paths.into_iter().map(|p| p.to_string()).collect())
            }),
            "a{ss}" => HashMap::<String, String>::try_from(value).map(Self::StrMap),
            _ => value.try_to_owned().map(Self::Raw),
        };

        decoded.unwrap_or_else(|e| {
            debug!(signature = %signature, error = %e, "Could not decode bus value");
            Self::Empty
        })
    }

    /// Decode the body of a method reply.
    ///
    /// Single-argument bodies of a known shape map onto the matching variant.
    /// Other bodies are kept as a [`BusValue::Raw`] structure of all arguments.
    pub fn from_message(message: &Message) -> Result<Self> {
        let body = message.body();
        let signature = body.signature().to_string();

        let mismatch = |e: zbus::Error| BusError::mismatch("reply body", format!("{signature}: {e}"));

        let value = match signature.as_str() {
            "" => Self::Empty,
            "s" => Self::Str(body.deserialize::<String>().map_err(mismatch)?),
            "o" => Self::Path(body.deserialize::<OwnedObjectPath>().map_err(mismatch)?.to_string()),
            "as" => Self::StrList(body.deserialize::<Vec<String>>().map_err(mismatch)?),
            "ao" => Self::PathList(
                body.deserialize::<Vec<OwnedObjectPath>>()
                    .map_err(mismatch)?
                    .into_iter()
                    .map(|p| p.to_string())
                    .collect(),
            ),
            "a{ss}" => Self::StrMap(
                body.deserialize::<HashMap<String, String>>()
                    .map_err(mismatch)?,
            ),
            "v" => Self::from(&body.deserialize::<OwnedValue>().map_err(mismatch)?),
            "b" => raw(body.deserialize::<bool>().map_err(mismatch)?)?,
            "y" => raw(body.deserialize::<u8>().map_err(mismatch)?)?,
            "n" => raw(body.deserialize::<i16>().map_err(mismatch)?)?,
            "q" => raw(body.deserialize::<u16>().map_err(mismatch)?)?,
            "i" => raw(body.deserialize::<i32>().map_err(mismatch)?)?,
            "u" => raw(body.deserialize::<u32>().map_err(mismatch)?)?,
            "x" => raw(body.deserialize::<i64>().map_err(mismatch)?)?,
            "t" => raw(body.deserialize::<u64>().map_err(mismatch)?)?,
            "d" => raw(body.deserialize::<f64>().map_err(mismatch)?)?,
            _ => raw(body.deserialize::<Structure<'_>>().map_err(mismatch)?)?,
        };

        Ok(value)
    }

    /// Short name of the held shape, used in mismatch reports.
    pub fn kind(&self) -> String {
        match self {
            Self::Empty => "empty".to_string(),
            Self::Str(_) => "string".to_string(),
            Self::StrList(_) => "string list".to_string(),
            Self::Path(_) => "object path".to_string(),
            Self::PathList(_) => "object path list".to_string(),
            Self::StrMap(_) => "string map".to_string(),
            Self::Raw(v) => format!("raw '{}'", v.value_signature()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn try_str(&self) -> Result<&str> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(BusError::mismatch("string", other.kind())),
        }
    }

    pub fn try_str_list(&self) -> Result<&[String]> {
        match self {
            Self::StrList(list) => Ok(list),
            other => Err(BusError::mismatch("string list", other.kind())),
        }
    }

    pub fn try_path(&self) -> Result<&str> {
        match self {
            Self::Path(p) => Ok(p),
            other => Err(BusError::mismatch("object path", other.kind())),
        }
    }

    pub fn try_path_list(&self) -> Result<&[String]> {
        match self {
            Self::PathList(list) => Ok(list),
            other => Err(BusError::mismatch("object path list", other.kind())),
        }
    }

    pub fn try_str_map(&self) -> Result<&HashMap<String, String>> {
        match self {
            Self::StrMap(map) => Ok(map),
            other => Err(BusError::mismatch("string map", other.kind())),
        }
    }

    /// Decode into any type zvariant can convert an owned value to.
    ///
    /// Known shapes are re-encoded first, so `try_into_type::<String>()` works
    /// on a [`BusValue::Str`] as well as on a raw string.
    pub fn try_into_type<T>(&self) -> Result<T>
    where
        T: TryFrom<OwnedValue>,
        T::Error: Display,
    {
        let expected = std::any::type_name::<T>();
        let owned = self
            .to_owned_value()
            .map_err(|e| BusError::mismatch(expected, format!("{}: {e}", self.kind())))?;
        T::try_from(owned).map_err(|e| BusError::mismatch(expected, e.to_string()))
    }

    /// Re-encode the held shape as a zvariant value.
    fn to_owned_value(&self) -> std::result::Result<OwnedValue, zbus::zvariant::Error> {
        match self {
            Self::Empty => Err(zbus::zvariant::Error::Message("no value".to_string())),
            Self::Str(s) => Value::from(s.as_str()).try_to_owned(),
            Self::StrList(list) => Value::from(list.clone()).try_to_owned(),
            Self::Path(p) => Value::from(ObjectPath::try_from(p.as_str())?).try_to_owned(),
            Self::PathList(list) => {
                let paths = list
                    .iter()
                    .map(|p| ObjectPath::try_from(p.as_str()))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Value::from(paths).try_to_owned()
            }
            Self::StrMap(map) => Value::from(map.clone()).try_to_owned(),
            Self::Raw(value) => value.try_clone(),
        }
    }

    pub fn as_str(&self) -> String {
        lenient(self.try_str().map(str::to_string))
    }

    pub fn as_str_list(&self) -> Vec<String> {
        lenient(self.try_str_list().map(<[String]>::to_vec))
    }

    pub fn as_path(&self) -> String {
        lenient(self.try_path().map(str::to_string))
    }

    pub fn as_path_list(&self) -> Vec<String> {
        lenient(self.try_path_list().map(<[String]>::to_vec))
    }

    pub fn as_str_map(&self) -> HashMap<String, String> {
        lenient(self.try_str_map().cloned())
    }

    /// Lenient [`try_into_type`](Self::try_into_type): the type's default on mismatch.
    pub fn into_type<T>(&self) -> T
    where
        T: TryFrom<OwnedValue> + Default,
        T::Error: Display,
    {
        lenient(self.try_into_type())
    }

    /// The underlying zvariant value, if this is a raw value.
    pub fn as_raw(&self) -> Option<&OwnedValue> {
        match self {
            Self::Raw(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&OwnedValue> for BusValue {
    fn from(value: &OwnedValue) -> Self {
        Self::from_value(value)
    }
}

fn raw<'a>(value: impl Into<Value<'a>>) -> Result<BusValue> {
    value
        .into()
        .try_to_owned()
        .map(BusValue::Raw)
        .map_err(|e| BusError::mismatch("owned value", e.to_string()))
}

fn lenient<T: Default>(result: Result<T>) -> T {
    result.unwrap_or_else(|e| {
        debug!(error = %e, "Could not represent bus data, using an empty value");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(value: Value<'_>) -> OwnedValue {
        value.try_to_owned().unwrap()
    }

    #[test]
    fn test_string_shapes() {
        let value = owned(Value::from("Charging"));
        let bus = BusValue::from(&value);
        assert_eq!(bus, BusValue::Str("Charging".to_string()));
        assert_eq!(bus.as_str(), "Charging");
        assert!(bus.as_str_map().is_empty());
    }

    #[test]
    fn test_variant_is_unwrapped() {
        let inner = Value::from("nested");
        let wrapped = Value::Value(Box::new(inner));
        assert_eq!(
            BusValue::from_value(&wrapped),
            BusValue::Str("nested".to_string())
        );
    }

    #[test]
    fn test_reply_bodies() {
        let reply = Message::method_call("/org/hassagent/Test", "Get")
            .unwrap()
            .build(&(Value::from(42u32),))
            .unwrap();
        let bus = BusValue::from_message(&reply).unwrap();
        assert!(matches!(bus, BusValue::Raw(_)));
        assert_eq!(bus.into_type::<u32>(), 42);

        let reply = Message::method_call("/org/hassagent/Test", "Get")
            .unwrap()
            .build(&(Value::from("Charging"),))
            .unwrap();
        assert_eq!(
            BusValue::from_message(&reply).unwrap(),
            BusValue::Str("Charging".to_string())
        );

        let reply = Message::method_call("/org/hassagent/Test", "Sessions")
            .unwrap()
            .build(&(vec!["c1".to_string(), "c2".to_string()],))
            .unwrap();
        assert_eq!(
            BusValue::from_message(&reply).unwrap().as_str_list(),
            vec!["c1".to_string(), "c2".to_string()]
        );
    }

    #[test]
    fn test_path_and_path_list() {
        let path = ObjectPath::try_from("/org/freedesktop/UPower/devices/battery_BAT0").unwrap();
        let bus = BusValue::from_value(&Value::from(path.clone()));
        assert_eq!(bus.as_path(), "/org/freedesktop/UPower/devices/battery_BAT0");

        let list = Value::from(vec![path]);
        let bus = BusValue::from_value(&list);
        assert_eq!(
            bus.as_path_list(),
            vec!["/org/freedesktop/UPower/devices/battery_BAT0".to_string()]
        );
        assert!(bus.as_str_list().is_empty());
    }

    #[test]
    fn test_string_list_and_map() {
        let list = Value::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            BusValue::from_value(&list).as_str_list(),
            vec!["a".to_string(), "b".to_string()]
        );

        let mut map = HashMap::new();
        map.insert("Vendor".to_string(), "ACME".to_string());
        let bus = BusValue::from_value(&Value::from(map.clone()));
        assert_eq!(bus.as_str_map(), map);
    }

    #[test]
    fn test_raw_values_decode_by_type() {
        let bus = BusValue::from_value(&Value::from(87.5f64));
        assert!(matches!(bus, BusValue::Raw(_)));
        assert_eq!(bus.try_into_type::<f64>().unwrap(), 87.5);
        assert_eq!(bus.into_type::<u32>(), 0);
        assert!(matches!(
            bus.try_into_type::<u32>(),
            Err(BusError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_known_shapes_decode_by_type() {
        let bus = BusValue::Str("Charging".to_string());
        assert_eq!(bus.try_into_type::<String>().unwrap(), "Charging");
        assert_eq!(BusValue::Empty.into_type::<String>(), "");
    }

    #[test]
    fn test_empty_is_no_data() {
        let bus = BusValue::default();
        assert!(bus.is_empty());
        assert!(bus.as_str_map().is_empty());
        assert!(bus.as_path_list().is_empty());
        assert_eq!(bus.as_path(), "");
        assert!(bus.as_raw().is_none());
        assert!(matches!(
            bus.try_str_map(),
            Err(BusError::TypeMismatch { expected: "string map", .. })
        ));
    }
}
