//! Battery state from UPower.
//!
//! Every UPower device of type battery yields three sensors: charge
//! percentage, charging state and warning level. Initial values are read
//! once; afterwards the device's `PropertiesChanged` signal drives updates.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hassagent_common::{DeviceClass, StateClass};
use hassagent_dbus::{
    BusHandle, BusRequest, BusScope, BusValue, MatchOption, PropertiesChanged, RequestOptions,
    Signal,
};
use hassagent_framework::{BoxedUpdate, BusRegistry, Sensor, Shutdown};

use super::{WATCH_BUFFER, send_all};

pub const UPOWER_DESTINATION: &str = "org.freedesktop.UPower";
pub const UPOWER_PATH: &str = "/org/freedesktop/UPower";
pub const UPOWER_INTERFACE: &str = "org.freedesktop.UPower";
pub const UPOWER_DEVICE: &str = "org.freedesktop.UPower.Device";

/// `Type` property value of a battery.
const DEVICE_TYPE_BATTERY: u32 = 2;

/// Charging state as reported in the `State` property.
pub fn state_name(state: u32) -> &'static str {
    match state {
        1 => "Charging",
        2 => "Discharging",
        3 => "Empty",
        4 => "Fully Charged",
        5 => "Pending Charge",
        6 => "Pending Discharge",
        _ => "Unknown",
    }
}

/// Warning level as reported in the `BatteryLevel` property.
pub fn level_name(level: u32) -> &'static str {
    match level {
        1 => "None",
        3 => "Low",
        4 => "Critical",
        6 => "Normal",
        7 => "High",
        8 => "Full",
        _ => "Unknown",
    }
}

/// One battery device and the sensors derived from it.
#[derive(Debug, Clone)]
pub struct Battery {
    path: String,
    key: String,
}

impl Battery {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let key = path.rsplit('/').next().unwrap_or_default().to_string();
        Self { path, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn sensor(&self, property: &str, value: &BusValue) -> Option<Sensor> {
        let sensor = match property {
            "Percentage" => Sensor::new(
                format!("{}_percentage", self.key),
                format!("Battery {} Level", self.key),
                value.into_type::<f64>().into(),
            )
            .with_unit("%")
            .with_device_class(DeviceClass::Battery)
            .with_state_class(StateClass::Measurement),
            "State" => Sensor::new(
                format!("{}_state", self.key),
                format!("Battery {} State", self.key),
                state_name(value.into_type::<u32>()).into(),
            )
            .with_icon("mdi:battery-charging")
            .with_device_class(DeviceClass::Enum),
            "BatteryLevel" => Sensor::new(
                format!("{}_level", self.key),
                format!("Battery {} Warning Level", self.key),
                level_name(value.into_type::<u32>()).into(),
            )
            .with_icon("mdi:battery-alert")
            .with_device_class(DeviceClass::Enum),
            _ => return None,
        };

        Some(sensor.with_attribute("device_path", self.path.clone()))
    }

    /// Sensors for the properties a `PropertiesChanged` signal carries.
    pub fn changed(&self, changed: &PropertiesChanged) -> Vec<BoxedUpdate> {
        if changed.interface != UPOWER_DEVICE {
            return Vec::new();
        }

        let mut names: Vec<&String> = changed.changed.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.sensor(name, &changed.changed[name]))
            .map(Sensor::boxed)
            .collect()
    }

    /// Read every tracked property. Failed reads are skipped.
    async fn read(&self, device: &BusRequest) -> Vec<BoxedUpdate> {
        let mut updates = Vec::new();
        for property in ["Percentage", "State", "BatteryLevel"] {
            match device.get_property(property).await {
                Ok(value) => updates.extend(self.sensor(property, &value).map(Sensor::boxed)),
                Err(e) => debug!(battery = %self.key, property, error = %e, "Skipping battery property"),
            }
        }
        updates
    }
}

fn device_request(bus: &Arc<BusHandle>, path: &str) -> BusRequest {
    BusRequest::new(
        Some(bus.clone()),
        RequestOptions {
            destination: UPOWER_DESTINATION.to_string(),
            path: path.to_string(),
            interface: Some(UPOWER_DEVICE.to_string()),
            match_rules: MatchOption::properties_changed(path),
            ..Default::default()
        },
    )
}

/// Object paths of every UPower battery.
async fn batteries(bus: &Arc<BusHandle>) -> hassagent_dbus::Result<Vec<String>> {
    let upower = BusRequest::new(
        Some(bus.clone()),
        RequestOptions {
            destination: UPOWER_DESTINATION.to_string(),
            path: UPOWER_PATH.to_string(),
            interface: Some(UPOWER_INTERFACE.to_string()),
            ..Default::default()
        },
    );

    let mut found = Vec::new();
    for path in upower.call_with_reply("EnumerateDevices", &()).await?.as_path_list() {
        let kind: u32 = device_request(bus, &path)
            .get_property("Type")
            .await
            .unwrap_or_default()
            .into_type();
        if kind == DEVICE_TYPE_BATTERY {
            found.push(path);
        }
    }
    Ok(found)
}

/// Report battery state until shutdown.
///
/// The stream closes right away when the system bus or UPower is missing.
pub fn spawn(shutdown: Shutdown, buses: Arc<BusRegistry>) -> mpsc::Receiver<BoxedUpdate> {
    let (tx, rx) = mpsc::channel(WATCH_BUFFER);

    tokio::spawn(async move {
        let Some(bus) = buses.try_get(BusScope::System).await else {
            return;
        };

        let paths = match batteries(&bus).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "UPower unavailable, battery sensors disabled");
                return;
            }
        };
        info!(batteries = paths.len(), "Found batteries");

        for path in paths {
            let battery = Battery::new(path.as_str());
            let device = device_request(&bus, &path);

            if !send_all(&tx, battery.read(&device).await, &shutdown).await {
                return;
            }

            let handler = {
                let tx = tx.clone();
                let shutdown = shutdown.clone();
                let battery = battery.clone();
                move |signal: Signal| {
                    let tx = tx.clone();
                    let shutdown = shutdown.clone();
                    let battery = battery.clone();
                    async move {
                        match signal.properties_changed() {
                            Ok(changed) => {
                                send_all(&tx, battery.changed(&changed), &shutdown).await;
                            }
                            Err(e) => debug!(battery = %battery.key(), error = %e, "Malformed PropertiesChanged"),
                        }
                    }
                }
            };

            if let Err(e) = device.add_watch(shutdown.clone(), handler).await {
                warn!(battery = %battery.key(), error = %e, "Unable to watch battery");
            }
        }
        // Watch handlers keep their own senders; the stream closes once they exit.
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use hassagent_dbus::zvariant::Value;
    use hassagent_framework::SensorValue;

    fn raw(value: Value<'_>) -> BusValue {
        BusValue::from_value(&value)
    }

    #[test]
    fn test_state_names() {
        assert_eq!(state_name(0), "Unknown");
        assert_eq!(state_name(1), "Charging");
        assert_eq!(state_name(2), "Discharging");
        assert_eq!(state_name(4), "Fully Charged");
        assert_eq!(state_name(6), "Pending Discharge");
        assert_eq!(state_name(42), "Unknown");
    }

    #[test]
    fn test_level_names() {
        assert_eq!(level_name(0), "Unknown");
        assert_eq!(level_name(1), "None");
        assert_eq!(level_name(2), "Unknown");
        assert_eq!(level_name(3), "Low");
        assert_eq!(level_name(4), "Critical");
        assert_eq!(level_name(8), "Full");
    }

    #[test]
    fn test_key_from_path() {
        let battery = Battery::new("/org/freedesktop/UPower/devices/battery_BAT0");
        assert_eq!(battery.key(), "battery_BAT0");
    }

    #[test]
    fn test_changed_properties() {
        let battery = Battery::new("/org/freedesktop/UPower/devices/battery_BAT0");
        let changed = PropertiesChanged {
            interface: UPOWER_DEVICE.to_string(),
            changed: HashMap::from([
                ("Percentage".to_string(), raw(Value::from(79.0))),
                ("State".to_string(), raw(Value::from(2u32))),
                ("UpdateTime".to_string(), raw(Value::from(1700000000u64))),
            ]),
            invalidated: Vec::new(),
        };

        let updates = battery.changed(&changed);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].id(), "battery_BAT0_percentage");
        assert_eq!(updates[0].value(), SensorValue::Number(79.0));
        assert_eq!(updates[0].unit(), "%");
        assert_eq!(updates[1].id(), "battery_BAT0_state");
        assert_eq!(updates[1].value(), SensorValue::Text("Discharging".to_string()));
    }

    #[test]
    fn test_changed_ignores_other_interfaces() {
        let battery = Battery::new("/org/freedesktop/UPower/devices/battery_BAT0");
        let changed = PropertiesChanged {
            interface: "org.freedesktop.UPower.KbdBacklight".to_string(),
            changed: HashMap::from([("Percentage".to_string(), raw(Value::from(10.0)))]),
            invalidated: Vec::new(),
        };
        assert!(battery.changed(&changed).is_empty());
    }
}
