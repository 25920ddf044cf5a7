use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    errors::Error,
    settings::{self, Settings},
    Result,
};

const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
const DEFAULT_LIMIT: usize = 30;
pub const LIMIT_MIN: usize = 1;
pub const LIMIT_MAX: usize = 100;

/// Typed runtime configuration.
///
/// Resolution order per knob: persisted settings file, then environment
/// (including `.env`), then the built-in default. Interactive first-run
/// prompts in the bot binary fill in whatever is still missing before
/// `validate()` runs.
#[derive(Clone, Debug)]
pub struct Config {
    // Source API
    pub api_base: String,
    pub start_date: String,
    pub api_session_token: Option<String>,

    // Delivery
    pub telegram_bot_token: String,
    pub default_chat_id: Option<String>,

    // Polling behavior
    pub limit: usize,
    pub use_custom_emoji: bool,
    pub poll_interval: Duration,

    // Token lifecycle
    pub token_ttl: Duration,
    pub token_refresh_skew: Duration,

    // Network timeouts (short for login/delivery, long for bulk fetch)
    pub login_timeout: Duration,
    pub fetch_timeout: Duration,
    pub send_timeout: Duration,

    // Durable file layout
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let data_dir = env_path("OTPCAST_DATA_DIR").unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&data_dir)?;

        let persisted = Settings::load(&data_dir.join("runtime_config.json"));
        let pick = |key: &str| -> Option<String> {
            persisted
                .get(key)
                .map(str::to_string)
                .or_else(|| env_str(key).and_then(non_empty))
        };

        let api_base = pick(settings::KEY_API_BASE_URL)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let start_date = normalize_start_date(
            &pick(settings::KEY_API_START_DATE).unwrap_or_default(),
        );
        let api_session_token = pick(settings::KEY_API_SESSION_TOKEN);
        let telegram_bot_token = pick(settings::KEY_TELEGRAM_BOT_TOKEN).unwrap_or_default();
        let default_chat_id = pick(settings::KEY_TELEGRAM_CHAT_ID);
        let limit = clamp_limit(pick(settings::KEY_BOT_LIMIT).as_deref());

        let use_custom_emoji = env_bool("USE_CUSTOM_EMOJI").unwrap_or(false);
        let poll_interval = Duration::from_secs(env_u64("POLL_INTERVAL_SECONDS").unwrap_or(30));
        let token_ttl = Duration::from_secs(env_u64("TOKEN_TTL_SECONDS").unwrap_or(2 * 60 * 60));
        let token_refresh_skew =
            Duration::from_secs(env_u64("TOKEN_REFRESH_SKEW_SECONDS").unwrap_or(5 * 60));

        let login_timeout = Duration::from_secs(env_u64("LOGIN_TIMEOUT_SECONDS").unwrap_or(90));
        let fetch_timeout = Duration::from_secs(env_u64("FETCH_TIMEOUT_SECONDS").unwrap_or(600));
        let send_timeout = Duration::from_secs(env_u64("SEND_TIMEOUT_SECONDS").unwrap_or(30));

        Ok(Self {
            api_base,
            start_date,
            api_session_token,
            telegram_bot_token,
            default_chat_id,
            limit,
            use_custom_emoji,
            poll_interval,
            token_ttl,
            token_refresh_skew,
            login_timeout,
            fetch_timeout,
            send_timeout,
            data_dir,
        })
    }

    /// Fatal-at-startup checks: a delivery credential is required, and some
    /// source credential (shared token or at least one account) must exist.
    pub fn validate(&self, accounts_available: bool) -> Result<()> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN is required".to_string(),
            ));
        }
        if self.api_session_token.is_none() && !accounts_available {
            return Err(Error::Config(
                "no API session token and no enabled accounts configured".to_string(),
            ));
        }
        Ok(())
    }

    pub fn accounts_file(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }

    pub fn groups_file(&self) -> PathBuf {
        self.data_dir.join("groups.json")
    }

    pub fn platforms_file(&self) -> PathBuf {
        self.data_dir.join("platforms.json")
    }

    pub fn countries_file(&self) -> PathBuf {
        self.data_dir.join("country_codes.json")
    }

    pub fn token_cache_file(&self) -> PathBuf {
        self.data_dir.join("token_cache.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("runtime_config.json")
    }

    pub fn daily_dir(&self) -> PathBuf {
        self.data_dir.join("daily_messages")
    }
}

/// Accept `Y-M-D` with a 4-digit year, zero-padding month and day; anything
/// else falls back to today's date.
pub fn normalize_start_date(raw: &str) -> String {
    let v = raw.trim();
    let parts: Vec<&str> = v.split('-').collect();
    if parts.len() == 3
        && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        && parts[0].len() == 4
        && parts[1].len() <= 2
        && parts[2].len() <= 2
    {
        return format!("{}-{:0>2}-{:0>2}", parts[0], parts[1], parts[2]);
    }
    today_key()
}

pub fn clamp_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .map(|n| n.clamp(LIMIT_MIN, LIMIT_MAX))
        .unwrap_or(DEFAULT_LIMIT)
}

/// Calendar-day key for store rotation (process-local clock).
pub fn today_key() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from).filter(|p| !p.as_os_str().is_empty())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn normalizes_valid_dates() {
        assert_eq!(normalize_start_date("2025-1-5"), "2025-01-05");
        assert_eq!(normalize_start_date(" 2025-01-05 "), "2025-01-05");
    }

    #[test]
    fn invalid_dates_fall_back_to_today() {
        let today = today_key();
        assert_eq!(normalize_start_date("yesterday"), today);
        assert_eq!(normalize_start_date("25-01-05"), today);
        assert_eq!(normalize_start_date("2025/01/05"), today);
        assert_eq!(normalize_start_date(""), today);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(Some("50")), 50);
        assert_eq!(clamp_limit(Some("0")), LIMIT_MIN);
        assert_eq!(clamp_limit(Some("9999")), LIMIT_MAX);
        assert_eq!(clamp_limit(Some("abc")), 30);
        assert_eq!(clamp_limit(None), 30);
    }

    #[test]
    fn validate_requires_delivery_credential() {
        let cfg = test_config();
        let mut no_token = cfg.clone();
        no_token.telegram_bot_token = String::new();
        assert!(matches!(
            no_token.validate(true),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn validate_requires_some_source_credential() {
        let mut cfg = test_config();
        cfg.api_session_token = None;
        assert!(cfg.validate(false).is_err());
        assert!(cfg.validate(true).is_ok());
        cfg.api_session_token = Some("tok".to_string());
        assert!(cfg.validate(false).is_ok());
    }

    pub(crate) fn test_config() -> Config {
        Config {
            api_base: "http://127.0.0.1:8000".to_string(),
            start_date: "2025-01-01".to_string(),
            api_session_token: Some("shared".to_string()),
            telegram_bot_token: "bot-token".to_string(),
            default_chat_id: None,
            limit: 30,
            use_custom_emoji: false,
            poll_interval: Duration::from_secs(30),
            token_ttl: Duration::from_secs(2 * 60 * 60),
            token_refresh_skew: Duration::from_secs(5 * 60),
            login_timeout: Duration::from_secs(90),
            fetch_timeout: Duration::from_secs(600),
            send_timeout: Duration::from_secs(30),
            data_dir: std::env::temp_dir(),
        }
    }
}
