//! Desktop telemetry agent for Linux.
//!
//! Reports disk, network and memory usage polled through `sysinfo`, battery
//! state from UPower and the idle/lock state of the user's logind session.
//!
//! # Key Expressions
//!
//! ```text
//! hassagent/<device>/@/status
//! hassagent/<device>/sensor/mountpoint_root/register
//! hassagent/<device>/sensor/mountpoint_root/state
//! hassagent/<device>/sensor/battery_BAT0_percentage/state
//! hassagent/<device>/sensor/session_locked/state
//! ```

pub mod config;
pub mod sensors;
