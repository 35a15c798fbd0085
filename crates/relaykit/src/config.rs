//! Server configuration, loaded from JSON.

use std::path::Path;

use relaykit_room::RoomConfig;
use serde::{Deserialize, Serialize};

use crate::RelayError;

/// What a relay process listens on and which rooms it opens at startup.
///
/// ```json
/// {
///   "ws_addr": "0.0.0.0:7777",
///   "udp_addr": "0.0.0.0:7778",
///   "log_filter": "info,relaykit_room=debug",
///   "rooms": [{ "app_id": "arena", "name": "main", "capacity": 8 }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ws_addr: Option<String>,
    pub udp_addr: Option<String>,
    /// Used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub rooms: Vec<RoomConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_addr: Some("127.0.0.1:7777".into()),
            udp_addr: None,
            log_filter: "info".into(),
            rooms: vec![RoomConfig::default()],
        }
    }
}

impl ServerConfig {
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.ws_addr.is_none() && self.udp_addr.is_none() {
            return Err(RelayError::Config("at least one of ws_addr and udp_addr is required".into()));
        }
        for room in &self.rooms {
            room.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use relaykit_protocol::Visibility;
    use relaykit_room::MigrationPolicy;

    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = ServerConfig::from_json(
            r#"{
                "udp_addr": "0.0.0.0:9000",
                "rooms": [
                    { "name": "duel", "capacity": 2, "migration": "stop" },
                    { "visibility": "private", "password": "hunter2" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.ws_addr.as_deref(), Some("127.0.0.1:7777"));
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.rooms.len(), 2);
        assert_eq!(config.rooms[0].capacity, 2);
        assert_eq!(config.rooms[0].migration, MigrationPolicy::Stop);
        assert_eq!(config.rooms[1].visibility, Visibility::Private);
        assert_eq!(config.rooms[1].app_id, "default");
    }

    #[test]
    fn test_rejects_config_without_listeners() {
        let err = ServerConfig::from_json(r#"{ "ws_addr": null }"#).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_rejects_invalid_room() {
        let err = ServerConfig::from_json(r#"{ "rooms": [{ "capacity": 0 }] }"#).unwrap_err();
        assert!(matches!(err, RelayError::Room(_)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ServerConfig::from_json("{ rooms: }"),
            Err(RelayError::Json(_))
        ));
    }
}
