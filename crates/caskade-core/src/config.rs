//! Configuration for the Caskade engine
//!
//! An [`EngineConfig`] is attached to a graph when its root module is built
//! and is consulted by every operation started from that root.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Separator used to join attribute names into qualified parameter paths
    #[serde(default = "default_path_separator")]
    pub path_separator: String,

    /// Accept mapping payload keys that name no dynamic parameter
    #[serde(default)]
    pub allow_unknown_keys: bool,

    /// Emit a trace event for every parameter resolution
    #[serde(default)]
    pub trace_resolution: bool,
}

fn default_path_separator() -> String {
    ".".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path_separator: default_path_separator(),
            allow_unknown_keys: false,
            trace_resolution: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from `CASKADE_*` variables found through `lookup`
    ///
    /// Unparseable values are logged and leave the default in place.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(separator) = lookup("CASKADE_PATH_SEPARATOR") {
            if separator.is_empty() {
                warn!("Ignoring empty CASKADE_PATH_SEPARATOR");
            } else {
                config.path_separator = separator;
            }
        }

        if let Some(value) = lookup("CASKADE_ALLOW_UNKNOWN_KEYS") {
            match parse_flag(&value) {
                Some(flag) => config.allow_unknown_keys = flag,
                None => warn!("Invalid CASKADE_ALLOW_UNKNOWN_KEYS value: {}", value),
            }
        }

        if let Some(value) = lookup("CASKADE_TRACE_RESOLUTION") {
            match parse_flag(&value) {
                Some(flag) => config.trace_resolution = flag,
                None => warn!("Invalid CASKADE_TRACE_RESOLUTION value: {}", value),
            }
        }

        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.path_separator, ".");
        assert!(!config.allow_unknown_keys);
        assert!(!config.trace_resolution);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"allow_unknown_keys": true}"#).unwrap();
        assert_eq!(config.path_separator, ".");
        assert!(config.allow_unknown_keys);
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let vars: HashMap<&str, &str> = [
            ("CASKADE_PATH_SEPARATOR", "/"),
            ("CASKADE_ALLOW_UNKNOWN_KEYS", "yes"),
            ("CASKADE_TRACE_RESOLUTION", "sometimes"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.path_separator, "/");
        assert!(config.allow_unknown_keys);
        // unparseable flags keep their default
        assert!(!config.trace_resolution);
    }

    #[test]
    fn test_load_reads_the_process_environment() {
        let expected = EngineConfig::from_lookup(|key| env::var(key).ok());
        assert_eq!(EngineConfig::load(), expected);
    }

    #[test]
    fn test_from_lookup_ignores_empty_separator() {
        let config = EngineConfig::from_lookup(|key| {
            (key == "CASKADE_PATH_SEPARATOR").then(String::new)
        });
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_configured_separator_drives_paths() {
        use crate::domain::module::Module;
        use crate::domain::param::Param;
        use crate::types::Tensor;
        use std::sync::Arc;

        let config = EngineConfig::from_lookup(|key| {
            (key == "CASKADE_PATH_SEPARATOR").then(|| "/".to_string())
        });
        let root: Module<Tensor> = Module::with_config("root", Arc::new(config));
        let sub = root.add_module("sub", Module::new("sub")).unwrap();
        sub.add_param("x", Param::dynamic("x")).unwrap();
        assert_eq!(root.flattener().paths(), vec!["sub/x"]);
        assert!(root.find_param("sub/x").is_ok());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
