//! Idle and lock state of the current user's logind session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hassagent_common::SensorType;
use hassagent_dbus::login::{self, LOGIN1_DESTINATION, LOGIN1_SESSION};
use hassagent_dbus::{
    BusRequest, BusScope, BusValue, MatchOption, PropertiesChanged, RequestOptions, Signal,
};
use hassagent_framework::{BoxedUpdate, BusRegistry, Sensor, SensorValue, Shutdown};

use super::{WATCH_BUFFER, send_all};

/// Tracked session properties with their sensor id, name and icon.
const PROPERTIES: [(&str, &str, &str, &str); 2] = [
    ("IdleHint", "session_idle", "Session Idle", "mdi:sleep"),
    ("LockedHint", "session_locked", "Session Locked", "mdi:lock"),
];

/// Binary sensor for a session property, `None` for untracked properties.
pub fn session_sensor(property: &str, value: &BusValue) -> Option<Sensor> {
    let (_, id, name, icon) = PROPERTIES.iter().find(|(p, ..)| *p == property)?;

    Some(
        Sensor::new(*id, *name, SensorValue::Boolean(value.into_type::<bool>()))
            .with_icon(*icon)
            .with_sensor_type(SensorType::BinarySensor),
    )
}

/// Sensors for the properties a `PropertiesChanged` signal carries.
pub fn changed(changed: &PropertiesChanged) -> Vec<BoxedUpdate> {
    if changed.interface != LOGIN1_SESSION {
        return Vec::new();
    }

    PROPERTIES
        .iter()
        .filter_map(|(property, ..)| {
            changed
                .changed
                .get(*property)
                .and_then(|value| session_sensor(property, value))
        })
        .map(Sensor::boxed)
        .collect()
}

/// Login name of the user running the agent.
fn current_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .ok()
        .filter(|user| !user.is_empty())
}

/// Report session state until shutdown.
///
/// The stream closes right away when the user has no logind session.
pub fn spawn(shutdown: Shutdown, buses: Arc<BusRegistry>) -> mpsc::Receiver<BoxedUpdate> {
    let (tx, rx) = mpsc::channel(WATCH_BUFFER);

    tokio::spawn(async move {
        let Some(user) = current_user() else {
            warn!("Neither USER nor LOGNAME set, session sensors disabled");
            return;
        };
        let Some(bus) = buses.try_get(BusScope::System).await else {
            return;
        };

        let path = match login::session_path(&bus, &user).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                info!(user = %user, "No logind session, session sensors disabled");
                return;
            }
            Err(e) => {
                warn!(error = %e, "logind unavailable, session sensors disabled");
                return;
            }
        };

        let mut match_rules = MatchOption::properties_changed(path.as_str());
        match_rules.push(MatchOption::Arg(0, LOGIN1_SESSION.to_string()));

        let session = BusRequest::new(
            Some(bus),
            RequestOptions {
                destination: LOGIN1_DESTINATION.to_string(),
                path: path.clone(),
                interface: Some(LOGIN1_SESSION.to_string()),
                match_rules,
                ..Default::default()
            },
        );

        let mut initial = Vec::new();
        for (property, ..) in PROPERTIES {
            match session.get_property(property).await {
                Ok(value) => initial.extend(session_sensor(property, &value).map(Sensor::boxed)),
                Err(e) => debug!(property, error = %e, "Skipping session property"),
            }
        }
        if !send_all(&tx, initial, &shutdown).await {
            return;
        }

        let handler = {
            let shutdown = shutdown.clone();
            move |signal: Signal| {
                let tx = tx.clone();
                let shutdown = shutdown.clone();
                async move {
                    match signal.properties_changed() {
                        Ok(props) => {
                            send_all(&tx, changed(&props), &shutdown).await;
                        }
                        Err(e) => debug!(error = %e, "Malformed PropertiesChanged"),
                    }
                }
            }
        };

        match session.add_watch(shutdown, handler).await {
            Ok(_) => info!(session = %path, "Watching logind session"),
            Err(e) => warn!(session = %path, error = %e, "Unable to watch logind session"),
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use hassagent_dbus::zvariant::Value;

    fn flag(value: bool) -> BusValue {
        BusValue::from_value(&Value::from(value))
    }

    #[test]
    fn test_session_sensor() {
        let sensor = session_sensor("LockedHint", &flag(true)).unwrap();
        assert_eq!(sensor.id, "session_locked");
        assert_eq!(sensor.value, SensorValue::Boolean(true));
        assert_eq!(sensor.icon.as_deref(), Some("mdi:lock"));
        assert_eq!(sensor.sensor_type, SensorType::BinarySensor);

        let sensor = session_sensor("IdleHint", &flag(false)).unwrap();
        assert_eq!(sensor.id, "session_idle");
        assert_eq!(sensor.value, SensorValue::Boolean(false));

        assert!(session_sensor("Active", &flag(true)).is_none());
    }

    #[test]
    fn test_failed_read_is_false() {
        let sensor = session_sensor("IdleHint", &BusValue::Empty).unwrap();
        assert_eq!(sensor.value, SensorValue::Boolean(false));
    }

    #[test]
    fn test_changed() {
        let props = PropertiesChanged {
            interface: LOGIN1_SESSION.to_string(),
            changed: HashMap::from([
                ("LockedHint".to_string(), flag(true)),
                ("IdleHint".to_string(), flag(true)),
                ("IdleSinceHint".to_string(), BusValue::from_value(&Value::from(5u64))),
            ]),
            invalidated: Vec::new(),
        };

        let updates = changed(&props);
        let ids: Vec<String> = updates.iter().map(|u| u.id()).collect();
        assert_eq!(ids, vec!["session_idle", "session_locked"]);

        let other = PropertiesChanged {
            interface: "org.freedesktop.login1.User".to_string(),
            ..props
        };
        assert!(changed(&other).is_empty());
    }
}
