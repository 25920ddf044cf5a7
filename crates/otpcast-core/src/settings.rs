//! Persisted runtime settings (`runtime_config.json`).
//!
//! A flat string map, human-editable, rewritten as a whole document. Values
//! here take precedence over environment defaults so the operator is not
//! re-prompted on every start.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::Result;

pub const KEY_API_BASE_URL: &str = "API_BASE_URL";
pub const KEY_API_START_DATE: &str = "API_START_DATE";
pub const KEY_API_SESSION_TOKEN: &str = "API_SESSION_TOKEN";
pub const KEY_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const KEY_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const KEY_BOT_LIMIT: &str = "BOT_LIMIT";

#[derive(Clone, Debug, Default)]
pub struct Settings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Load the settings document; a missing or malformed file is an empty map.
    pub fn load(path: &Path) -> Self {
        let values = std::fs::read_to_string(path)
            .ok()
            .and_then(|txt| serde_json::from_str::<serde_json::Value>(&txt).ok())
            .and_then(|v| match v {
                serde_json::Value::Object(map) => Some(
                    map.into_iter()
                        .filter_map(|(k, v)| match v {
                            serde_json::Value::Null => None,
                            serde_json::Value::String(s) => Some((k, s.trim().to_string())),
                            other => Some((k, other.to_string())),
                        })
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            values,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn save(&self) -> Result<()> {
        let txt = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, txt)?;
        Ok(())
    }
}
