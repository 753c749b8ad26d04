//! Signal match options.

use zbus::MatchRule;
use zbus::message::Type as MessageType;

use crate::error::{BusError, Result};

/// Well-known name of the properties-changed signal.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// One filter of a signal match rule.
///
/// Options map one-to-one onto the bus's match rule grammar; the message
/// type is always `signal`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchOption {
    /// `sender=`
    Sender(String),
    /// `interface=`
    Interface(String),
    /// `member=`
    Member(String),
    /// `path=`
    Path(String),
    /// `path_namespace=`
    PathNamespace(String),
    /// `argN=`
    Arg(u8, String),
}

impl MatchOption {
    /// Shorthand for matching `PropertiesChanged` on one object.
    pub fn properties_changed(path: impl Into<String>) -> Vec<MatchOption> {
        vec![
            MatchOption::Interface(PROPERTIES_INTERFACE.to_string()),
            MatchOption::Member(PROPERTIES_CHANGED.to_string()),
            MatchOption::Path(path.into()),
        ]
    }
}

/// Build a signal match rule from a list of options.
pub fn build_match_rule(options: &[MatchOption]) -> Result<MatchRule<'static>> {
    let invalid = |e: zbus::Error| BusError::InvalidRule(e.to_string());

    let mut builder = MatchRule::builder().msg_type(MessageType::Signal);
    for option in options {
        builder = match option {
            MatchOption::Sender(sender) => builder.sender(sender.as_str()).map_err(invalid)?,
            MatchOption::Interface(iface) => builder.interface(iface.as_str()).map_err(invalid)?,
            MatchOption::Member(member) => builder.member(member.as_str()).map_err(invalid)?,
            MatchOption::Path(path) => builder.path(path.as_str()).map_err(invalid)?,
            MatchOption::PathNamespace(ns) => builder.path_namespace(ns.as_str()).map_err(invalid)?,
            MatchOption::Arg(idx, value) => builder.arg(*idx, value.as_str()).map_err(invalid)?,
        };
    }

    Ok(builder.build().into_owned())
}
