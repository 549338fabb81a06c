use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core_api::{CoreError, CoreErrorCode};

/// Knobs for locating the variable store and the archive entries.
///
/// Every field has a default matching what current Ren'Py releases write, so
/// a config file only needs the keys it wants to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditorConfig {
    /// Key of a nested store mapping in the roots mapping.
    pub store_key: String,
    /// Prefix of flattened store entries in the roots mapping.
    pub namespace_prefix: String,
    /// Names with a dotted segment starting with this are never editable.
    pub reserved_prefix: String,
    pub log_entry: String,
    pub signatures_entry: String,
    /// Explicit `security_keys.txt`; searched for when unset.
    pub keys_path: Option<PathBuf>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            store_key: "store".to_string(),
            namespace_prefix: "store.".to_string(),
            reserved_prefix: "_".to_string(),
            log_entry: "log".to_string(),
            signatures_entry: "signatures".to_string(),
            keys_path: None,
        }
    }
}

impl EditorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        toml::from_str(text).map_err(|e| {
            CoreError::new(CoreErrorCode::Config, format!("invalid config: {e}"))
        })
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = fs::read_to_string(path).map_err(|e| {
            CoreError::new(
                CoreErrorCode::Config,
                format!("failed to read config {}: {e}", path.display()),
            )
        })?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Whether any dotted segment of `name` is reserved.
    pub fn is_reserved(&self, name: &str) -> bool {
        !self.reserved_prefix.is_empty()
            && name
                .split('.')
                .any(|segment| segment.starts_with(self.reserved_prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EditorConfig::from_toml_str("namespace_prefix = \"vars.\"\n").unwrap();
        assert_eq!(config.namespace_prefix, "vars.");
        assert_eq!(config.store_key, "store");
        assert_eq!(config.log_entry, "log");
        assert!(config.keys_path.is_none());
    }

    #[test]
    fn unknown_keys_are_config_errors() {
        let err = EditorConfig::from_toml_str("stor_key = \"x\"\n").unwrap_err();
        assert_eq!(err.code, CoreErrorCode::Config);
    }

    #[test]
    fn reserved_names_match_any_segment() {
        let config = EditorConfig::default();
        assert!(config.is_reserved("_seen_intro"));
        assert!(config.is_reserved("persistent._flag"));
        assert!(!config.is_reserved("money"));
        assert!(!config.is_reserved("my_var"));
    }
}
