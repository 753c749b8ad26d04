//! hassagent D-Bus Layer
//!
//! A thin request/response and signal-subscription abstraction over the
//! session and system buses.
//!
//! # Overview
//!
//! - [`BusHandle`] owns one connection and tears it down after every signal
//!   watch on it has exited
//! - [`BusRequest`] reads and writes properties, calls methods and manages
//!   signal watches for one [`RequestDescriptor`]
//! - [`BusValue`] is the tagged union replies are decoded into
//! - [`login`] resolves the current user's logind session
//!
//! # Example
//!
//! ```ignore
//! use hassagent_dbus::{BusHandle, BusRequest, BusScope, MatchOption, RequestOptions};
//!
//! let bus = BusHandle::open(BusScope::System, shutdown.clone()).await?;
//! let battery = BusRequest::new(Some(bus), RequestOptions {
//!     destination: "org.freedesktop.UPower".into(),
//!     path: "/org/freedesktop/UPower/devices/battery_BAT0".into(),
//!     interface: Some("org.freedesktop.UPower.Device".into()),
//!     match_rules: MatchOption::properties_changed("/org/freedesktop/UPower/devices/battery_BAT0"),
//!     ..Default::default()
//! });
//!
//! let percentage: f64 = battery.get_property("Percentage").await?.into_type();
//! battery.add_watch(shutdown, |signal| async move { /* ... */ }).await?;
//! ```

mod bus;
mod error;
pub mod login;
mod request;
mod rule;
mod value;
mod watch;

pub use bus::{BusHandle, BusScope};
pub use error::{BusError, Result};
pub use request::{BusRequest, RequestDescriptor, RequestOptions};
pub use rule::{MatchOption, PROPERTIES_CHANGED, PROPERTIES_INTERFACE, build_match_rule};
pub use value::BusValue;
pub use watch::{PropertiesChanged, Signal, SignalHandler, SignalWatch};

// Re-exported so producers can name zvariant types without a direct zbus dependency.
pub use zbus::zvariant;
