//! Request descriptors and their execution against a bus.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};
use zbus::zvariant::{DynamicType, OwnedValue, Type, Value};

use hassagent_common::Shutdown;

use crate::bus::BusHandle;
use crate::error::{BusError, Result};
use crate::rule::{MatchOption, PROPERTIES_INTERFACE, build_match_rule};
use crate::value::BusValue;
use crate::watch::{SignalHandler, SignalWatch, spawn_watch};

/// Named options a [`RequestDescriptor`] is built from.
///
/// ```ignore
/// let request = BusRequest::new(bus, RequestOptions {
///     destination: "org.freedesktop.UPower".into(),
///     path: "/org/freedesktop/UPower".into(),
///     interface: Some("org.freedesktop.UPower".into()),
///     ..Default::default()
/// });
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Bus name of the remote service.
    pub destination: String,
    /// Object path the request operates on.
    pub path: String,
    /// Interface used when a member or property name is not fully qualified.
    pub interface: Option<String>,
    /// Signal member this request is about, used for logging.
    pub member: Option<String>,
    /// Filters for signal watches.
    pub match_rules: Vec<MatchOption>,
}

/// Immutable description of one bus operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    destination: String,
    path: String,
    interface: Option<String>,
    member: Option<String>,
    match_rules: Vec<MatchOption>,
}

impl From<RequestOptions> for RequestDescriptor {
    fn from(options: RequestOptions) -> Self {
        Self {
            destination: options.destination,
            path: options.path,
            interface: options.interface,
            member: options.member,
            match_rules: options.match_rules,
        }
    }
}

impl RequestDescriptor {
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    pub fn match_rules(&self) -> &[MatchOption] {
        &self.match_rules
    }

    /// Split `name` into interface and member.
    ///
    /// Fully qualified names (`org.freedesktop.UPower.Device.Percentage`)
    /// are split at the last dot; bare names use the descriptor's interface.
    pub fn resolve<'a>(&'a self, name: &'a str) -> Result<(&'a str, &'a str)> {
        if let Some(iface) = self.interface.as_deref() {
            if !name.contains('.') {
                return Ok((iface, name));
            }
        }

        match name.rsplit_once('.') {
            Some((iface, member)) if !iface.is_empty() && !member.is_empty() => Ok((iface, member)),
            _ => Err(BusError::InvalidMember(name.to_string())),
        }
    }
}

/// One bus operation bound to an (optional) bus handle.
///
/// Every operation fails with [`BusError::NoConnection`] when the handle is
/// absent, so producers can be wired up even on machines without a bus.
#[derive(Debug, Clone)]
pub struct BusRequest {
    bus: Option<Arc<BusHandle>>,
    descriptor: RequestDescriptor,
}

impl BusRequest {
    pub fn new(bus: Option<Arc<BusHandle>>, options: RequestOptions) -> Self {
        Self {
            bus,
            descriptor: options.into(),
        }
    }

    pub fn from_descriptor(bus: Option<Arc<BusHandle>>, descriptor: RequestDescriptor) -> Self {
        Self { bus, descriptor }
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    fn bus(&self) -> Result<&Arc<BusHandle>> {
        self.bus.as_ref().ok_or(BusError::NoConnection)
    }

    fn remote(&self, member: &str) -> impl FnOnce(zbus::Error) -> BusError {
        let destination = self.descriptor.destination.clone();
        let member = member.to_string();
        move |source| BusError::Remote {
            destination,
            member,
            source,
        }
    }

    async fn invoke<B>(&self, iface: &str, member: &str, args: &B) -> Result<zbus::Message>
    where
        B: Serialize + DynamicType,
    {
        let bus = self.bus()?;
        trace!(
            destination = %self.descriptor.destination,
            path = %self.descriptor.path,
            interface = %iface,
            member = %member,
            "Calling D-Bus method"
        );

        bus.connection()
            .call_method(
                Some(self.descriptor.destination.as_str()),
                self.descriptor.path.as_str(),
                Some(iface),
                member,
                args,
            )
            .await
            .map_err(self.remote(&format!("{iface}.{member}")))
    }

    /// Read a property.
    pub async fn get_property(&self, name: &str) -> Result<BusValue> {
        self.bus()?;
        let (iface, prop) = self.descriptor.resolve(name)?;

        let reply = self
            .invoke(PROPERTIES_INTERFACE, "Get", &(iface, prop))
            .await
            .inspect_err(|e| {
                debug!(property = %name, destination = %self.descriptor.destination, error = %e,
                    "Unable to retrieve property");
            })?;

        let value: OwnedValue = reply
            .body()
            .deserialize()
            .map_err(|e| BusError::mismatch("variant", e.to_string()))?;

        Ok(BusValue::from(&value))
    }

    /// Write a property. Nothing is cached locally.
    pub async fn set_property(&self, name: &str, value: &Value<'_>) -> Result<()> {
        self.bus()?;
        let (iface, prop) = self.descriptor.resolve(name)?;

        self.invoke(PROPERTIES_INTERFACE, "Set", &(iface, prop, value))
            .await
            .map(|_| ())
    }

    /// Call a method, discarding any reply.
    ///
    /// `args` is forwarded verbatim; pass `&()` for no arguments.
    pub async fn call<B>(&self, method: &str, args: &B) -> Result<()>
    where
        B: Serialize + DynamicType,
    {
        self.bus()?;
        let (iface, member) = self.descriptor.resolve(method)?;
        self.invoke(iface, member, args).await.map(|_| ())
    }

    /// Call a method and classify its reply.
    pub async fn call_with_reply<B>(&self, method: &str, args: &B) -> Result<BusValue>
    where
        B: Serialize + DynamicType,
    {
        self.bus()?;
        let (iface, member) = self.descriptor.resolve(method)?;
        let reply = self.invoke(iface, member, args).await?;
        BusValue::from_message(&reply)
    }

    /// Call a method and decode its reply into `R`.
    pub async fn call_typed<B, R>(&self, method: &str, args: &B) -> Result<R>
    where
        B: Serialize + DynamicType,
        R: for<'d> serde::Deserialize<'d> + Type,
    {
        self.bus()?;
        let (iface, member) = self.descriptor.resolve(method)?;
        let reply = self.invoke(iface, member, args).await?;
        reply
            .body()
            .deserialize::<R>()
            .map_err(|e| BusError::mismatch(std::any::type_name::<R>(), e.to_string()))
    }

    /// Subscribe to the signals matching this request's rules.
    ///
    /// The handler is awaited inline for each signal. The watch ends when
    /// `shutdown` or the bus's own shutdown fires, or when it is removed.
    pub async fn add_watch<H: SignalHandler>(
        &self,
        shutdown: Shutdown,
        handler: H,
    ) -> Result<SignalWatch> {
        let bus = self.bus()?;
        let rule = build_match_rule(&self.descriptor.match_rules)?;
        let watch = spawn_watch(bus, rule, shutdown, handler).await?;

        debug!(
            path = %self.descriptor.path,
            destination = %self.descriptor.destination,
            member = ?self.descriptor.member,
            "Watching D-Bus signals"
        );

        Ok(watch)
    }

    /// Stop every watch on the bus registered with this request's rules.
    ///
    /// Waits for their dispatch tasks to exit. A no-op when none is active.
    pub async fn remove_watch(&self) -> Result<()> {
        let bus = self.bus()?;
        let rule = build_match_rule(&self.descriptor.match_rules)?.to_string();

        let watches = bus.watches_for_rule(&rule);
        for watch in &watches {
            watch.stop_and_wait().await;
        }

        trace!(
            path = %self.descriptor.path,
            destination = %self.descriptor.destination,
            removed = watches.len(),
            "Removed D-Bus signal watches"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upower_device() -> RequestDescriptor {
        RequestOptions {
            destination: "org.freedesktop.UPower".to_string(),
            path: "/org/freedesktop/UPower/devices/battery_BAT0".to_string(),
            interface: Some("org.freedesktop.UPower.Device".to_string()),
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn test_resolve_bare_name_uses_interface() {
        let descriptor = upower_device();
        assert_eq!(
            descriptor.resolve("Percentage").unwrap(),
            ("org.freedesktop.UPower.Device", "Percentage")
        );
    }

    #[test]
    fn test_resolve_qualified_name() {
        let descriptor = upower_device();
        assert_eq!(
            descriptor
                .resolve("org.freedesktop.login1.Manager.ListSessions")
                .unwrap(),
            ("org.freedesktop.login1.Manager", "ListSessions")
        );
    }

    #[test]
    fn test_resolve_bare_name_without_interface() {
        let descriptor: RequestDescriptor = RequestOptions::default().into();
        assert!(matches!(
            descriptor.resolve("Percentage"),
            Err(BusError::InvalidMember(_))
        ));
        assert!(matches!(
            descriptor.resolve("trailing."),
            Err(BusError::InvalidMember(_))
        ));
    }

    #[tokio::test]
    async fn test_absent_bus_is_no_connection() {
        let request = BusRequest::from_descriptor(None, upower_device());

        assert!(matches!(
            request.get_property("Percentage").await,
            Err(BusError::NoConnection)
        ));
        assert!(matches!(
            request.set_property("Percentage", &Value::from(1.0)).await,
            Err(BusError::NoConnection)
        ));
        assert!(matches!(
            request.call("Refresh", &()).await,
            Err(BusError::NoConnection)
        ));
        assert!(matches!(
            request.call_with_reply("GetStatistics", &("charging",)).await,
            Err(BusError::NoConnection)
        ));
        assert!(matches!(
            request.remove_watch().await,
            Err(BusError::NoConnection)
        ));

        let (_trigger, shutdown) = Shutdown::pair();
        let watch = request
            .add_watch(shutdown, |_signal: crate::Signal| async {}).await;
        assert!(matches!(watch, Err(BusError::NoConnection)));
    }

    #[tokio::test]
    async fn test_failed_read_is_no_data() {
        let request = BusRequest::from_descriptor(None, upower_device());
        let value = request.get_property("Percentage").await.unwrap_or_default();
        assert!(value.as_str_map().is_empty());
    }
}
