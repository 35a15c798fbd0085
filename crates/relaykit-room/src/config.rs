//! Room configuration and lifecycle state.

use std::collections::BTreeMap;

use relaykit_protocol::Visibility;
use relaykit_tick::TickConfig;
use serde::{Deserialize, Serialize};

use crate::RoomError;

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// What happens to a room when its master client leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPolicy {
    /// Elect the remaining client with the lowest id.
    #[default]
    Continue,
    /// Disconnect everyone with `MasterLeft` and close the room.
    Stop,
}

/// Settings for one room. Every field has a default, so a JSON config only
/// needs the ones it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub app_id: String,
    /// Clients and rooms only meet when their versions match exactly.
    pub version: String,
    pub name: String,
    /// Most registered clients at once.
    pub capacity: u16,
    pub visibility: Visibility,
    pub password: Option<String>,
    /// A locked room admits no new clients, password or not.
    pub locked: bool,
    pub migration: MigrationPolicy,
    pub tick: TickConfig,
    pub attributes: BTreeMap<String, String>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            app_id: "default".into(),
            version: "1".into(),
            name: "room".into(),
            capacity: 16,
            visibility: Visibility::Public,
            password: None,
            locked: false,
            migration: MigrationPolicy::Continue,
            tick: TickConfig::default(),
            attributes: BTreeMap::new(),
        }
    }
}

impl RoomConfig {
    pub fn validate(&self) -> Result<(), RoomError> {
        if self.capacity == 0 {
            return Err(RoomError::InvalidConfig("capacity must be at least 1".into()));
        }
        if self.app_id.is_empty() {
            return Err(RoomError::InvalidConfig("app_id must not be empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Starting → Running → Stopping → Closed
/// ```
///
/// A room is `Starting` until its first tick, admits clients while
/// `Running`, disconnects everyone while `Stopping`, and is gone once
/// `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomState {
    Starting,
    Running,
    Stopping,
    Closed,
}

impl RoomState {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Starting => Some(Self::Running),
            Self::Running => Some(Self::Stopping),
            Self::Stopping => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Only forward moves are allowed. A room may stop before it ever ran.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (self == Self::Starting && target == Self::Stopping)
    }

    /// New connections are queued while starting and admitted while running.
    pub fn accepts_connections(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}
