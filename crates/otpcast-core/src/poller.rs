//! Polling orchestrator: fetch → merge → dedup → render → deliver → persist.
//!
//! One logical thread of control; every per-account, per-fetch and
//! per-destination failure is isolated and logged, and nothing inside the
//! loop terminates the process. Only an external stop signal (the
//! cancellation token) ends the run.

use std::{collections::HashMap, sync::Arc};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::{today_key, Config},
    domain::{DeliveryRecord, MessageKey, RawMessage, SentDestination},
    formatting::{extract_code, render},
    ports::{DeliveryPort, SourceApi},
    registry::Registries,
    session::TokenManager,
    store::DedupStore,
    Result,
};

/// Driver mode: run forever with an interruptible wait, or exactly one cycle
/// (deterministic for tests and `--once`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Forever,
    Once,
}

/// What one cycle did, for logging and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub fresh: usize,
    pub delivered: usize,
}

pub struct Poller {
    cfg: Arc<Config>,
    source: Arc<dyn SourceApi>,
    delivery: Arc<dyn DeliveryPort>,
    registries: Registries,
    tokens: TokenManager,
    store: DedupStore,
}

impl Poller {
    pub fn new(
        cfg: Arc<Config>,
        source: Arc<dyn SourceApi>,
        delivery: Arc<dyn DeliveryPort>,
        registries: Registries,
    ) -> Self {
        let tokens = TokenManager::load(
            &cfg.token_cache_file(),
            cfg.token_ttl,
            cfg.token_refresh_skew,
        );
        let store = DedupStore::open(&cfg.daily_dir(), &today_key());
        Self {
            cfg,
            source,
            delivery,
            registries,
            tokens,
            store,
        }
    }

    /// STARTUP: obtain a token for every configured account so the first
    /// cycle starts warm. Failures are per-account and non-fatal.
    pub async fn prime_accounts(&mut self) {
        let accounts = self.registries.accounts.clone();
        for acc in &accounts {
            if self
                .tokens
                .get_valid_token(self.source.as_ref(), acc)
                .await
                .is_some()
            {
                info!(account = %acc.name, "account ready");
            } else {
                warn!(account = %acc.name, "account login failed");
            }
        }
    }

    pub async fn run(&mut self, mode: RunMode, cancel: CancellationToken) -> Result<()> {
        info!(
            interval_secs = self.cfg.poll_interval.as_secs(),
            start_date = %self.cfg.start_date,
            limit = self.cfg.limit,
            groups = self.registries.groups.len(),
            "polling started"
        );

        loop {
            if cancel.is_cancelled() {
                info!("stop requested");
                return Ok(());
            }

            self.run_cycle().await;

            if mode == RunMode::Once {
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stop requested");
                    return Ok(());
                }
                _ = sleep(self.cfg.poll_interval) => {}
            }
        }
    }

    /// One full cycle. All failures are logged and contained.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let today = today_key();
        if today != self.store.day() {
            self.store.rotate(&today);
            info!(day = %today, "rotated daily message store");
        }

        let rows = self.fetch_all().await;
        let merged = merge_by_key(rows, self.cfg.limit);
        let fetched = merged.len();

        let fresh: Vec<RawMessage> = merged
            .into_iter()
            .filter(|m| self.store.is_new(&m.key()))
            .collect();

        if fresh.is_empty() {
            info!(fetched, "no new messages");
            return CycleReport {
                fetched,
                ..Default::default()
            };
        }

        info!(count = fresh.len(), "new messages");
        let mut delivered = 0usize;
        for item in &fresh {
            if self.deliver_one(item).await {
                delivered += 1;
            }
        }

        CycleReport {
            fetched,
            fresh: fresh.len(),
            delivered,
        }
    }

    /// Fetch once via the shared API token (if configured) and once per
    /// enabled account. An account fetch error is treated as a stale token:
    /// discard it, log in once and retry once within the same cycle.
    async fn fetch_all(&mut self) -> Vec<RawMessage> {
        let mut rows = Vec::new();

        if let Some(token) = self.cfg.api_session_token.clone() {
            match self
                .source
                .fetch_messages(&token, &self.cfg.start_date)
                .await
            {
                Ok(batch) => rows.extend(batch),
                Err(e) => warn!(error = %e, "shared-token fetch failed"),
            }
        }

        let accounts = self.registries.accounts.clone();
        for acc in &accounts {
            let Some(token) = self.tokens.get_valid_token(self.source.as_ref(), acc).await
            else {
                continue;
            };

            match self
                .source
                .fetch_messages(&token, &self.cfg.start_date)
                .await
            {
                Ok(batch) => rows.extend(batch),
                Err(e) => {
                    warn!(account = %acc.name, error = %e, "fetch failed, refreshing login");
                    let Some(token) = self.tokens.force_relogin(self.source.as_ref(), acc).await
                    else {
                        continue;
                    };
                    match self
                        .source
                        .fetch_messages(&token, &self.cfg.start_date)
                        .await
                    {
                        Ok(batch) => rows.extend(batch),
                        Err(e) => {
                            warn!(account = %acc.name, error = %e, "fetch failed after relogin")
                        }
                    }
                }
            }
        }

        rows
    }

    /// Render and deliver one message to every enabled group; commit to the
    /// dedup store only when at least one destination confirmed. Returns
    /// whether the message was committed.
    async fn deliver_one(&mut self, item: &RawMessage) -> bool {
        let code = extract_code(&item.message).unwrap_or_else(|| item.number.clone());
        let text = render(
            item,
            &self.registries.countries,
            &self.registries.platforms,
            self.cfg.use_custom_emoji,
        );

        let mut sent_to: Vec<SentDestination> = Vec::new();
        for group in &self.registries.groups {
            match self.delivery.deliver(&group.chat_id, &text, &code).await {
                Ok(receipt) => {
                    info!(
                        group = %group.name,
                        message_id = ?receipt.message_id,
                        code = %code,
                        "delivered"
                    );
                    sent_to.push(SentDestination {
                        group: group.name.clone(),
                        chat_id: group.chat_id.clone(),
                        message_id: receipt.message_id,
                    });
                }
                Err(e) => warn!(group = %group.name, error = %e, "delivery failed"),
            }
        }

        if sent_to.is_empty() {
            // Stays eligible for retry next cycle.
            warn!(number = %item.number, "message reached no destination, not marking");
            return false;
        }

        let record = DeliveryRecord::from_message(
            item,
            code,
            sent_to,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        if let Err(e) = self.store.mark_sent(item.key(), record) {
            warn!(error = %e, "daily store write failed");
        }
        true
    }
}

/// Merge fetched batches by message key, preserving first-seen order with
/// last-seen field values, truncated to the page limit.
fn merge_by_key(rows: Vec<RawMessage>, limit: usize) -> Vec<RawMessage> {
    let mut order: Vec<MessageKey> = Vec::new();
    let mut by_key: HashMap<MessageKey, RawMessage> = HashMap::new();
    for row in rows {
        let key = row.key();
        if by_key.insert(key.clone(), row).is_none() {
            order.push(key);
        }
    }
    order
        .into_iter()
        .take(limit)
        .filter_map(|k| by_key.remove(&k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use crate::{
        domain::DeliveryReceipt,
        errors::Error,
        registry::{Account, Country, Group, Platform},
        Result,
    };

    fn message(number: &str, body: &str) -> RawMessage {
        RawMessage {
            number: number.to_string(),
            service_name: "Acme".to_string(),
            message: body.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn merge_keeps_first_seen_order_last_seen_value() {
        let mut a = message("1", "code 1111");
        a.revenue = Some(serde_json::json!(0.1));
        let b = message("2", "code 2222");
        let mut a2 = a.clone();
        a2.revenue = Some(serde_json::json!(0.9));

        let merged = merge_by_key(vec![a, b, a2], 10);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].number, "1");
        assert_eq!(merged[0].revenue, Some(serde_json::json!(0.9)));
        assert_eq!(merged[1].number, "2");
    }

    #[test]
    fn merge_truncates_to_limit() {
        let rows = (0..5).map(|i| message(&i.to_string(), "code 1234")).collect();
        assert_eq!(merge_by_key(rows, 3).len(), 3);
    }

    struct FakeSource {
        batches: Mutex<Vec<Result<Vec<RawMessage>>>>,
        logins: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(batches: Vec<Result<Vec<RawMessage>>>) -> Self {
            Self {
                batches: Mutex::new(batches),
                logins: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceApi for FakeSource {
        async fn login(&self, _email: &str, _password: &str) -> Result<String> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("tok-{n}"))
        }

        async fn fetch_messages(&self, _token: &str, _start: &str) -> Result<Vec<RawMessage>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                return Ok(Vec::new());
            }
            batches.remove(0)
        }
    }

    #[derive(Default)]
    struct FakeDelivery {
        sends: Mutex<Vec<(String, String, String)>>,
        fail_all: bool,
    }

    #[async_trait]
    impl DeliveryPort for FakeDelivery {
        async fn deliver(
            &self,
            chat_id: &str,
            text: &str,
            copy_value: &str,
        ) -> Result<DeliveryReceipt> {
            if self.fail_all {
                return Err(Error::Delivery {
                    destination: chat_id.to_string(),
                    reason: "down".to_string(),
                });
            }
            let mut sends = self.sends.lock().unwrap();
            sends.push((
                chat_id.to_string(),
                text.to_string(),
                copy_value.to_string(),
            ));
            Ok(DeliveryReceipt {
                message_id: Some(sends.len() as i64),
            })
        }
    }

    fn tmp_data_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{ts}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_countries() -> Vec<Country> {
        vec![
            Country {
                name_en: "Bahamas".to_string(),
                iso2: "BS".to_string(),
                dial_code: "1242".to_string(),
                ..Default::default()
            },
            Country {
                name_en: "NANP".to_string(),
                iso2: "US".to_string(),
                dial_code: "1".to_string(),
                ..Default::default()
            },
        ]
    }

    fn poller(
        data_dir: PathBuf,
        source: Arc<FakeSource>,
        delivery: Arc<FakeDelivery>,
        with_account: bool,
    ) -> Poller {
        let mut cfg = crate::config::tests::test_config();
        cfg.data_dir = data_dir;
        cfg.api_session_token = if with_account {
            None
        } else {
            Some("shared".to_string())
        };

        let accounts = if with_account {
            vec![Account {
                name: "a".to_string(),
                email: "a@x.io".to_string(),
                password: "pw".to_string(),
                enabled: true,
            }]
        } else {
            Vec::new()
        };

        let groups = vec![
            Group {
                name: "main".to_string(),
                chat_id: "-100".to_string(),
                enabled: true,
            },
            Group {
                name: "backup".to_string(),
                chat_id: "-200".to_string(),
                enabled: true,
            },
        ];

        let registries = Registries {
            countries: test_countries(),
            platforms: vec![Platform::default()],
            accounts,
            groups,
        };
        Poller::new(Arc::new(cfg), source, delivery, registries)
    }

    #[tokio::test]
    async fn cycle_delivers_new_message_to_every_group_once() {
        let dir = tmp_data_dir("otpcast-poller");
        let source = Arc::new(FakeSource::new(vec![Ok(vec![message(
            "12425551234",
            "code 4321",
        )])]));
        let delivery = Arc::new(FakeDelivery::default());
        let mut p = poller(dir.clone(), source.clone(), delivery.clone(), false);

        let report = p.run_cycle().await;
        assert_eq!(report.fetched, 1);
        assert_eq!(report.fresh, 1);
        assert_eq!(report.delivered, 1);

        let sends = delivery.sends.lock().unwrap().clone();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].0, "-100");
        assert_eq!(sends[1].0, "-200");
        assert!(sends[0].1.contains("BS"), "header carries the 1242 country");
        assert_eq!(sends[0].2, "4321");
        assert_eq!(p.store.seen_count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn delivered_message_is_not_sent_again_same_day() {
        let dir = tmp_data_dir("otpcast-poller-dedup");
        let m = message("12425551234", "code 4321");
        let source = Arc::new(FakeSource::new(vec![
            Ok(vec![m.clone()]),
            Ok(vec![m.clone()]),
        ]));
        let delivery = Arc::new(FakeDelivery::default());
        let mut p = poller(dir.clone(), source, delivery.clone(), false);

        let first = p.run_cycle().await;
        let second = p.run_cycle().await;
        assert_eq!(first.delivered, 1);
        assert_eq!(second.fresh, 0);
        assert_eq!(second.delivered, 0);
        assert_eq!(delivery.sends.lock().unwrap().len(), 2); // 2 groups, once

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn failed_everywhere_message_stays_eligible() {
        let dir = tmp_data_dir("otpcast-poller-fail");
        let m = message("12425551234", "code 4321");
        let source = Arc::new(FakeSource::new(vec![Ok(vec![m.clone()])]));
        let delivery = Arc::new(FakeDelivery {
            fail_all: true,
            ..Default::default()
        });
        let mut p = poller(dir.clone(), source, delivery, false);

        let report = p.run_cycle().await;
        assert_eq!(report.fresh, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(p.store.seen_count(), 0);
        assert!(p.store.is_new(&m.key()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn account_fetch_error_relogs_in_and_retries_once() {
        let dir = tmp_data_dir("otpcast-poller-relogin");
        let source = Arc::new(FakeSource::new(vec![
            Err(Error::Fetch("401".to_string())),
            Ok(vec![message("12425551234", "code 4321")]),
        ]));
        let delivery = Arc::new(FakeDelivery::default());
        let mut p = poller(dir.clone(), source.clone(), delivery, true);

        let report = p.run_cycle().await;
        assert_eq!(report.delivered, 1);
        // First login via get_valid_token, second via force_relogin.
        assert_eq!(source.logins.load(Ordering::SeqCst), 2);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn fetch_error_contributes_empty_cycle() {
        let dir = tmp_data_dir("otpcast-poller-empty");
        let source = Arc::new(FakeSource::new(vec![Err(Error::Fetch(
            "boom".to_string(),
        ))]));
        let delivery = Arc::new(FakeDelivery::default());
        let mut p = poller(dir.clone(), source, delivery.clone(), false);

        let report = p.run_cycle().await;
        assert_eq!(report.fetched, 0);
        assert!(delivery.sends.lock().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn run_once_returns_after_single_cycle() {
        let dir = tmp_data_dir("otpcast-poller-once");
        let source = Arc::new(FakeSource::new(vec![]));
        let delivery = Arc::new(FakeDelivery::default());
        let mut p = poller(dir.clone(), source.clone(), delivery, false);

        p.run(RunMode::Once, CancellationToken::new()).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_polling() {
        let dir = tmp_data_dir("otpcast-poller-cancel");
        let source = Arc::new(FakeSource::new(vec![]));
        let delivery = Arc::new(FakeDelivery::default());
        let mut p = poller(dir.clone(), source.clone(), delivery, false);

        let cancel = CancellationToken::new();
        cancel.cancel();
        p.run(RunMode::Forever, cancel).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
