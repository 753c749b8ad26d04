//! systemd-logind helpers.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use zbus::zvariant::{OwnedObjectPath, Type};

use crate::bus::BusHandle;
use crate::error::Result;
use crate::request::{BusRequest, RequestOptions};

pub const LOGIN1_DESTINATION: &str = "org.freedesktop.login1";
pub const LOGIN1_PATH: &str = "/org/freedesktop/login1";
pub const LOGIN1_MANAGER: &str = "org.freedesktop.login1.Manager";
pub const LOGIN1_SESSION: &str = "org.freedesktop.login1.Session";

/// One entry of `Manager.ListSessions` (`a(susso)`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Type)]
pub struct SessionEntry {
    pub id: String,
    pub uid: u32,
    pub user: String,
    pub seat: String,
    pub path: OwnedObjectPath,
}

/// List every session known to logind.
pub async fn list_sessions(bus: &Arc<BusHandle>) -> Result<Vec<SessionEntry>> {
    let request = BusRequest::new(
        Some(bus.clone()),
        RequestOptions {
            destination: LOGIN1_DESTINATION.to_string(),
            path: LOGIN1_PATH.to_string(),
            interface: Some(LOGIN1_MANAGER.to_string()),
            ..Default::default()
        },
    );

    request.call_typed::<_, Vec<SessionEntry>>("ListSessions", &()).await
}

/// Object path of the first logind session owned by `user`.
///
/// `Ok(None)` when the user has no session.
pub async fn session_path(bus: &Arc<BusHandle>, user: &str) -> Result<Option<String>> {
    let sessions = list_sessions(bus).await?;
    let found = find_session(&sessions, user);

    debug!(user = %user, sessions = sessions.len(), path = ?found, "Resolved logind session");
    Ok(found)
}

fn find_session(sessions: &[SessionEntry], user: &str) -> Option<String> {
    sessions
        .iter()
        .find(|s| s.user == user)
        .map(|s| s.path.to_string())
}
