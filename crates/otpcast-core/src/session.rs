//! Per-account session tokens: in-memory map plus a durable cross-run cache.
//!
//! A token is usable only while `expires_at - now > refresh_skew`. The cache
//! is persisted immediately after every successful login so a crash does not
//! lose a freshly obtained token; a restart adopts still-fresh tokens without
//! logging in again.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{ports::SourceApi, registry::Account};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub obtained_at: i64,
    pub expires_at: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct TokenCacheDoc {
    accounts: HashMap<String, CachedToken>,
}

pub struct TokenManager {
    cache_path: PathBuf,
    ttl: Duration,
    refresh_skew: Duration,
    tokens: HashMap<String, String>,
    cache: TokenCacheDoc,
}

impl TokenManager {
    /// Load the durable cache; a missing or malformed file starts empty.
    pub fn load(cache_path: &Path, ttl: Duration, refresh_skew: Duration) -> Self {
        let cache = std::fs::read_to_string(cache_path)
            .ok()
            .and_then(|txt| serde_json::from_str::<TokenCacheDoc>(&txt).ok())
            .unwrap_or_default();
        Self {
            cache_path: cache_path.to_path_buf(),
            ttl,
            refresh_skew,
            tokens: HashMap::new(),
            cache,
        }
    }

    /// A valid token for the account, adopting the durable cache or logging
    /// in as needed. `None` means the account is unavailable this cycle,
    /// never fatal for the process.
    pub async fn get_valid_token(
        &mut self,
        source: &dyn SourceApi,
        account: &Account,
    ) -> Option<String> {
        let now = now_unix();

        if self.cached_valid(&account.name, now).is_some() {
            if let Some(tok) = self.tokens.get(&account.name) {
                return Some(tok.clone());
            }
        }

        if let Some(cached) = self.cached_valid(&account.name, now) {
            let tok = cached.to_string();
            self.tokens.insert(account.name.clone(), tok.clone());
            return Some(tok);
        }

        self.login(source, account).await
    }

    /// Reactive refresh: the cached token was rejected mid-fetch, so discard
    /// it and log in once within the same cycle.
    pub async fn force_relogin(
        &mut self,
        source: &dyn SourceApi,
        account: &Account,
    ) -> Option<String> {
        self.tokens.remove(&account.name);
        self.cache.accounts.remove(&account.name);
        self.login(source, account).await
    }

    async fn login(&mut self, source: &dyn SourceApi, account: &Account) -> Option<String> {
        match source.login(&account.email, &account.password).await {
            Ok(token) => {
                let now = now_unix();
                self.tokens.insert(account.name.clone(), token.clone());
                self.cache.accounts.insert(
                    account.name.clone(),
                    CachedToken {
                        token: token.clone(),
                        obtained_at: now,
                        expires_at: now + self.ttl.as_secs() as i64,
                    },
                );
                self.persist();
                info!(account = %account.name, "logged in");
                Some(token)
            }
            Err(e) => {
                warn!(account = %account.name, error = %e, "login failed");
                None
            }
        }
    }

    fn cached_valid(&self, account_name: &str, now: i64) -> Option<&str> {
        let row = self.cache.accounts.get(account_name)?;
        if row.token.is_empty() {
            return None;
        }
        if row.expires_at <= now + self.refresh_skew.as_secs() as i64 {
            return None;
        }
        Some(&row.token)
    }

    fn persist(&self) {
        let txt = match serde_json::to_string_pretty(&self.cache) {
            Ok(txt) => txt,
            Err(e) => {
                warn!(error = %e, "token cache serialization failed");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.cache_path, txt) {
            warn!(path = %self.cache_path.display(), error = %e, "token cache write failed");
        }
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
