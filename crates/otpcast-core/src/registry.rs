//! Static registries backing the formatter and the polling loop: countries,
//! platforms, source-API accounts and Telegram groups.
//!
//! Every loader is tolerant: a missing or malformed file yields an empty
//! registry (logged), never an error. The editors below are used by the
//! management CLI and rewrite the whole document.

use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::Result;

/// Country registry row. Rows are matched against phone numbers by dial code.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Country {
    #[serde(default)]
    pub name_ar: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub iso2: String,
    #[serde(default)]
    pub dial_code: String,
}

/// Platform registry row, keyed by lowercase service name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name_ar: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub short: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub emoji_id: String,
}

/// Credentials for one campaign-API login.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// One Telegram delivery target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// All four static registries, loaded once at startup.
#[derive(Clone, Debug, Default)]
pub struct Registries {
    pub countries: Vec<Country>,
    pub platforms: Vec<Platform>,
    pub accounts: Vec<Account>,
    pub groups: Vec<Group>,
}

impl Registries {
    pub fn load(cfg: &crate::config::Config) -> Self {
        Self {
            countries: load_countries(&cfg.countries_file()),
            platforms: load_platforms(&cfg.platforms_file()),
            accounts: load_accounts(&cfg.accounts_file()),
            groups: load_groups(&cfg.groups_file()),
        }
    }
}

/// Load a JSON list, skipping rows that do not deserialize.
pub fn load_json_list<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(txt) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let rows: Vec<serde_json::Value> = match serde_json::from_str(&txt) {
        Ok(serde_json::Value::Array(rows)) => rows,
        // Other shapes are left to format-specific fallbacks (legacy account
        // files are objects or plain text).
        Ok(_) => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed registry file, ignoring");
            return Vec::new();
        }
    };
    rows.into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect()
}

fn save_json_list<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let txt = serde_json::to_string_pretty(rows)?;
    std::fs::write(path, txt)?;
    Ok(())
}

/// Countries with a dial code, sorted by descending dial-code length so that
/// prefix matching resolves to the most specific country first.
pub fn load_countries(path: &Path) -> Vec<Country> {
    let mut rows: Vec<Country> = load_json_list(path)
        .into_iter()
        .filter(|c: &Country| !c.dial_code.is_empty())
        .collect();
    rows.sort_by(|a, b| b.dial_code.len().cmp(&a.dial_code.len()));
    rows
}

pub fn load_platforms(path: &Path) -> Vec<Platform> {
    load_json_list(path)
}

/// Enabled accounts with usable credentials.
///
/// Backward compatible with two legacy layouts: a JSON object
/// `{"accounts": [...]}` and a plain-text `email password` line format
/// (`#` comments skipped, names synthesized as `account_{n}`).
pub fn load_accounts(path: &Path) -> Vec<Account> {
    let mut rows: Vec<Account> = load_json_list(path);

    if rows.is_empty() {
        if let Ok(raw) = std::fs::read_to_string(path) {
            rows = parse_legacy_accounts(&raw);
        }
    }

    rows.into_iter()
        .filter_map(|r| {
            let email = r.email.trim().to_string();
            let password = r.password.trim().to_string();
            if !r.enabled || email.is_empty() || password.is_empty() {
                return None;
            }
            let name = {
                let n = r.name.trim();
                if n.is_empty() {
                    email.clone()
                } else {
                    n.to_string()
                }
            };
            Some(Account {
                name,
                email,
                password,
                enabled: true,
            })
        })
        .collect()
}

fn parse_legacy_accounts(raw: &str) -> Vec<Account> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    if raw.starts_with('{') {
        let Ok(obj) = serde_json::from_str::<serde_json::Value>(raw) else {
            return Vec::new();
        };
        let Some(list) = obj.get("accounts").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        return list
            .iter()
            .filter_map(|row| serde_json::from_value(row.clone()).ok())
            .collect();
    }

    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let v = line.trim();
        if v.is_empty() || v.starts_with('#') {
            continue;
        }
        let mut parts = v.split_whitespace();
        let Some(email) = parts.next() else { continue };
        let password = parts.collect::<Vec<_>>().join(" ");
        if password.is_empty() {
            continue;
        }
        out.push(Account {
            name: format!("account_{}", idx + 1),
            email: email.to_string(),
            password,
            enabled: true,
        });
    }
    out
}

/// Enabled groups with a chat id; name defaults to the chat id.
pub fn load_groups(path: &Path) -> Vec<Group> {
    load_json_list(path)
        .into_iter()
        .filter_map(|r: Group| {
            let chat_id = r.chat_id.trim().to_string();
            if !r.enabled || chat_id.is_empty() {
                return None;
            }
            let name = {
                let n = r.name.trim();
                if n.is_empty() {
                    chat_id.clone()
                } else {
                    n.to_string()
                }
            };
            Some(Group {
                name,
                chat_id,
                enabled: true,
            })
        })
        .collect()
}

/// Add or replace (by email) an account row. Keeps the raw file shape.
pub fn upsert_account(path: &Path, account: Account) -> Result<()> {
    let mut rows: Vec<Account> = load_json_list(path);
    rows.retain(|r| r.email != account.email);
    rows.push(account);
    save_json_list(path, &rows)
}

/// Add or replace (by chat id) a group row.
pub fn upsert_group(path: &Path, group: Group) -> Result<()> {
    let mut rows: Vec<Group> = load_json_list(path);
    rows.retain(|r| r.chat_id != group.chat_id);
    rows.push(group);
    save_json_list(path, &rows)
}

/// Set the custom-emoji identifier for a platform, inserting a minimal row
/// when the key is not registered yet.
pub fn set_platform_emoji_id(path: &Path, key: &str, emoji_id: &str) -> Result<()> {
    let mut rows: Vec<Platform> = load_json_list(path);
    let needle = key.trim().to_lowercase();

    if let Some(row) = rows
        .iter_mut()
        .find(|r| r.key.trim().to_lowercase() == needle)
    {
        row.emoji_id = emoji_id.trim().to_string();
    } else {
        rows.push(Platform {
            key: needle,
            name_ar: key.to_string(),
            name_en: key.to_string(),
            short: key.chars().take(2).collect::<String>().to_uppercase(),
            emoji: String::new(),
            emoji_id: emoji_id.trim().to_string(),
        });
    }
    save_json_list(path, &rows)
}
