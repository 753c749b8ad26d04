use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Anything a producer can emit as a sensor reading.
///
/// The `id` is the sensor's stable identity: two updates with the same id
/// describe the same logical sensor.
pub trait SensorUpdate: Send + Sync + std::fmt::Debug {
    /// Stable identity of the sensor.
    fn id(&self) -> String;

    /// Human-readable name.
    fn name(&self) -> String;

    /// Current state.
    fn value(&self) -> SensorValue;

    /// Unit of measurement, empty when unitless.
    fn unit(&self) -> String {
        String::new()
    }

    /// Additional attributes reported alongside the state.
    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    /// Material Design icon name (e.g. `mdi:harddisk`).
    fn icon(&self) -> Option<String> {
        None
    }

    fn device_class(&self) -> Option<DeviceClass> {
        None
    }

    fn state_class(&self) -> Option<StateClass> {
        None
    }

    fn sensor_type(&self) -> SensorType {
        SensorType::Sensor
    }
}

/// A boxed update as carried over producer channels.
pub type BoxedUpdate = Box<dyn SensorUpdate>;

/// Snapshot of a sensor as held by the tracker and sent to the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    pub name: String,
    pub value: SensorValue,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<DeviceClass>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<StateClass>,

    #[serde(default)]
    pub sensor_type: SensorType,

    /// Unix epoch milliseconds of the last update.
    pub updated_at: i64,
}

impl Sensor {
    /// Create a sensor with the current timestamp.
    pub fn new(id: impl Into<String>, name: impl Into<String>, value: SensorValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value,
            unit: String::new(),
            attributes: HashMap::new(),
            icon: None,
            device_class: None,
            state_class: None,
            sensor_type: SensorType::Sensor,
            updated_at: current_timestamp_millis(),
        }
    }

    /// Take a snapshot of any update.
    pub fn from_update(update: &dyn SensorUpdate) -> Self {
        Self {
            id: update.id(),
            name: update.name(),
            value: update.value(),
            unit: update.unit(),
            attributes: update.attributes(),
            icon: update.icon(),
            device_class: update.device_class(),
            state_class: update.state_class(),
            sensor_type: update.sensor_type(),
            updated_at: current_timestamp_millis(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.device_class = Some(class);
        self
    }

    pub fn with_state_class(mut self, class: StateClass) -> Self {
        self.state_class = Some(class);
        self
    }

    pub fn with_sensor_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = sensor_type;
        self
    }

    /// Add an attribute.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Box this sensor for sending over a producer channel.
    pub fn boxed(self) -> BoxedUpdate {
        Box::new(self)
    }
}

impl SensorUpdate for Sensor {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn value(&self) -> SensorValue {
        self.value.clone()
    }

    fn unit(&self) -> String {
        self.unit.clone()
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        self.attributes.clone()
    }

    fn icon(&self) -> Option<String> {
        self.icon.clone()
    }

    fn device_class(&self) -> Option<DeviceClass> {
        self.device_class
    }

    fn state_class(&self) -> Option<StateClass> {
        self.state_class
    }

    fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }
}

/// Typed sensor state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SensorValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    #[default]
    Unknown,
}

impl SensorValue {
    /// Numeric view of the state, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Integer(v) => Some(*v as f64),
            SensorValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for SensorValue {
    fn from(v: f64) -> Self {
        SensorValue::Number(v)
    }
}

impl From<i64> for SensorValue {
    fn from(v: i64) -> Self {
        SensorValue::Integer(v)
    }
}

impl From<u64> for SensorValue {
    fn from(v: u64) -> Self {
        SensorValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for SensorValue {
    fn from(v: bool) -> Self {
        SensorValue::Boolean(v)
    }
}

impl From<String> for SensorValue {
    fn from(v: String) -> Self {
        SensorValue::Text(v)
    }
}

impl From<&str> for SensorValue {
    fn from(v: &str) -> Self {
        SensorValue::Text(v.to_string())
    }
}

impl std::fmt::Display for SensorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorValue::Boolean(v) => write!(f, "{}", v),
            SensorValue::Integer(v) => write!(f, "{}", v),
            SensorValue::Number(v) => write!(f, "{}", v),
            SensorValue::Text(v) => f.write_str(v),
            SensorValue::Unknown => f.write_str("unknown"),
        }
    }
}

/// Whether a sensor is a regular or a binary (on/off) sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    #[default]
    Sensor,
    BinarySensor,
}

/// How the remote side should aggregate a sensor's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

/// Subset of remote device classes used by the Linux producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Battery,
    DataRate,
    DataSize,
    Duration,
    Enum,
    Power,
    Temperature,
    Timestamp,
    Voltage,
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
