//! Engine configuration loaded from ~/.shortcut-scout/config.json.
//!
//! Every field has a default so the engine works with no config file at all.
//! A malformed file logs a warning and falls back to defaults rather than
//! failing startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Default bound on menu-tree traversal depth. A second-level submenu item
/// already sits seven hops below the menu bar (bar, bar item, menu, item,
/// menu, item, menu, item), so the bound leaves headroom for one more
/// nesting level while still cutting off pathological trees.
pub const DEFAULT_MENU_DEPTH: usize = 8;

/// Default cap on total menu elements visited in one scan. The tree belongs
/// to another process and its shape is not under our control.
pub const DEFAULT_MENU_ELEMENT_CAP: usize = 4096;

/// Default interval between CLI catalog refreshes, in seconds.
pub const DEFAULT_REFRESH_SECS: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum menu-tree depth to descend during a scan.
    #[serde(default = "default_menu_depth", rename = "menuDepth")]
    pub menu_depth: usize,
    /// Maximum number of menu elements visited in one scan.
    #[serde(default = "default_menu_element_cap", rename = "menuElementCap")]
    pub menu_element_cap: usize,
    /// Whether to seed the catalog with the stock macOS system shortcuts
    /// in addition to the user's key-equivalents table.
    #[serde(default = "default_true", rename = "seedSystemDefaults")]
    pub seed_system_defaults: bool,
    /// Seconds between catalog refreshes in the CLI output loop.
    #[serde(default = "default_refresh_secs", rename = "refreshSecs")]
    pub refresh_secs: u64,
}

fn default_menu_depth() -> usize {
    DEFAULT_MENU_DEPTH
}
fn default_menu_element_cap() -> usize {
    DEFAULT_MENU_ELEMENT_CAP
}
fn default_refresh_secs() -> u64 {
    DEFAULT_REFRESH_SECS
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            menu_depth: DEFAULT_MENU_DEPTH,
            menu_element_cap: DEFAULT_MENU_ELEMENT_CAP,
            seed_system_defaults: true,
            refresh_secs: DEFAULT_REFRESH_SECS,
        }
    }
}

/// Path of the config file (~/.shortcut-scout/config.json).
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".shortcut-scout").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// Load the config file, falling back to defaults when absent or invalid.
pub fn load_config() -> Config {
    let path = config_path();
    match std::fs::read_to_string(&path) {
        Ok(json_str) => match serde_json::from_str::<Config>(json_str.trim()) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.menu_depth, DEFAULT_MENU_DEPTH);
        assert_eq!(config.menu_element_cap, DEFAULT_MENU_ELEMENT_CAP);
        assert!(config.seed_system_defaults);
        assert_eq!(config.refresh_secs, DEFAULT_REFRESH_SECS);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"menuDepth": 3}"#).unwrap();
        assert_eq!(config.menu_depth, 3);
        assert_eq!(config.menu_element_cap, DEFAULT_MENU_ELEMENT_CAP);
        assert!(config.seed_system_defaults);
    }

    #[test]
    fn full_roundtrip() {
        let config = Config {
            menu_depth: 2,
            menu_element_cap: 100,
            seed_system_defaults: false,
            refresh_secs: 10,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.menu_depth, 2);
        assert_eq!(back.menu_element_cap, 100);
        assert!(!back.seed_system_defaults);
        assert_eq!(back.refresh_secs, 10);
    }
}
