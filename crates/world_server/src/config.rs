//! # Runtime Configuration
//!
//! Tunable behavior of the world runtime: guest policy, on-demand world
//! creation, write-back buffering, session limits, scene defaults and the
//! dispatch/cleanup policy switches.
//!
//! Everything here deserializes with sensible defaults so an empty config
//! section yields a working server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Allow connections without an authenticated principal to log in as
    /// temporary guest clients.
    #[serde(default = "default_guest_allowed")]
    pub guest_allowed: bool,

    /// Create worlds on demand when a client enters an unknown world name.
    /// When disabled, entering an unknown world is rejected.
    #[serde(default = "default_create_worlds")]
    pub create_worlds: bool,

    /// Buffer high-frequency persistence through per-client write-back.
    /// When disabled every write goes straight to the store.
    #[serde(default = "default_write_back_active")]
    pub write_back_active: bool,

    /// Minimum interval between write-back flushes, in milliseconds.
    #[serde(default = "default_write_back_delay_ms")]
    pub write_back_delay_ms: u64,

    /// Maximum number of concurrently tracked sessions. Zero means unlimited.
    #[serde(default)]
    pub max_sessions: usize,

    /// How long a session start may wait for free capacity before it is
    /// rejected, in seconds.
    #[serde(default = "default_session_start_timeout_secs")]
    pub session_start_timeout_secs: u64,

    /// Default scene parameters handed to each client at login.
    #[serde(default)]
    pub scene: SceneProperties,

    /// Event dispatch policy switches.
    #[serde(default)]
    pub dispatch: DispatchPolicy,

    /// Exit-time cleanup policy switches.
    #[serde(default)]
    pub cleanup: CleanupPolicy,
}

fn default_guest_allowed() -> bool {
    true
}

fn default_create_worlds() -> bool {
    true
}

fn default_write_back_active() -> bool {
    true
}

fn default_write_back_delay_ms() -> u64 {
    1000
}

fn default_session_start_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            guest_allowed: default_guest_allowed(),
            create_worlds: default_create_worlds(),
            write_back_active: default_write_back_active(),
            write_back_delay_ms: default_write_back_delay_ms(),
            max_sessions: 0,
            session_start_timeout_secs: default_session_start_timeout_secs(),
            scene: SceneProperties::default(),
            dispatch: DispatchPolicy::default(),
            cleanup: CleanupPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Validate the configuration, returning a description of the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.write_back_active && self.write_back_delay_ms == 0 {
            return Err("write_back_delay_ms must be greater than 0 when write-back is active".to_string());
        }
        self.scene.validate()
    }
}

/// Parameters of a client's scene: what it can see and how often it refreshes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SceneProperties {
    /// Visibility range around the client, in world units.
    #[serde(default = "default_scene_range")]
    pub range: f64,

    /// Movement threshold that forces a scene refresh before the timeout.
    #[serde(default = "default_scene_resolution")]
    pub resolution: f64,

    /// Maximum number of objects a scene may contain.
    #[serde(default = "default_scene_size")]
    pub size: usize,

    /// Maximum age of scene content before an update re-queries, in
    /// milliseconds.
    #[serde(default = "default_scene_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_scene_range() -> f64 {
    2000.0
}

fn default_scene_resolution() -> f64 {
    10.0
}

fn default_scene_size() -> usize {
    1000
}

fn default_scene_timeout_ms() -> u64 {
    30_000
}

impl Default for SceneProperties {
    fn default() -> Self {
        Self {
            range: default_scene_range(),
            resolution: default_scene_resolution(),
            size: default_scene_size(),
            timeout_ms: default_scene_timeout_ms(),
        }
    }
}

impl SceneProperties {
    pub fn validate(&self) -> Result<(), String> {
        if self.range <= 0.0 {
            return Err("scene range must be positive".to_string());
        }
        if self.resolution < 0.0 {
            return Err("scene resolution cannot be negative".to_string());
        }
        if self.size == 0 {
            return Err("scene size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Switches for the event dispatch pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct DispatchPolicy {
    /// When enabled, an event source resolved from the global cache (rather
    /// than the client's scene) must be a permanent object.
    #[serde(default)]
    pub permanents_only: bool,
}

/// Switches for exit-time cleanup of owned objects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CleanupPolicy {
    /// Read the temporary flag of owned objects from the live cached instance
    /// when available; otherwise trust the stored copy.
    #[serde(default = "default_live_owned")]
    pub live_owned: bool,
}

fn default_live_owned() -> bool {
    true
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            live_owned: default_live_owned(),
        }
    }
}

/// Worlds to ensure at startup, keyed by world name.
pub type WorldsConfig = HashMap<String, WorldTemplate>;

/// Declarative description of one configured world.
///
/// Any keys beyond `kind` are copied verbatim onto the world's property map.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorldTemplate {
    /// Admission hook tag this world is bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.guest_allowed);
        assert!(config.create_worlds);
        assert_eq!(config.max_sessions, 0);
    }

    #[test]
    fn empty_sections_deserialize_to_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert!(config.write_back_active);
        assert_eq!(config.write_back_delay_ms, 1000);
        assert_eq!(config.scene.range, 2000.0);
        assert_eq!(config.scene.size, 1000);
        assert!(config.cleanup.live_owned);
        assert!(!config.dispatch.permanents_only);
    }

    #[test]
    fn validation_rejects_zero_flush_delay() {
        let mut config = ServerConfig::default();
        config.write_back_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_scene() {
        let mut config = ServerConfig::default();
        config.scene.range = 0.0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.scene.size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn world_template_keeps_extra_properties() {
        let template: WorldTemplate = serde_json::from_str(
            r#"{"kind": "lobby", "gravity": 9.81, "motd": "welcome"}"#,
        )
        .unwrap();
        assert_eq!(template.kind.as_deref(), Some("lobby"));
        assert_eq!(template.properties["gravity"], 9.81);
        assert_eq!(template.properties["motd"], "welcome");
    }
}
