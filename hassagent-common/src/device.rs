use serde::{Deserialize, Serialize};

/// Metadata describing the device the agent runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Display name, usually the hostname.
    pub name: String,
    /// Stable identifier of the machine.
    pub id: String,
    /// Agent version.
    pub app_version: String,
    pub os: String,
    pub arch: String,
}

impl DeviceInfo {
    /// Describe this machine with the given name and id.
    pub fn new(name: impl Into<String>, id: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            app_version: app_version.into(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// The name in a form usable as a key expression chunk.
    pub fn key(&self) -> String {
        sanitize_key(&self.name)
    }
}

/// Replace characters that are not allowed in a key expression chunk.
///
/// Runs of separators collapse to a single underscore; leading and trailing
/// underscores are dropped.
pub fn sanitize_key(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '/' | ' ' | '#' | '?' | '*' | '$' => {
                if !result.ends_with('_') && !result.is_empty() {
                    result.push('_');
                }
            }
            _ => result.push(c),
        }
    }
    result.trim_matches('_').to_string()
}
