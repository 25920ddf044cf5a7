//! Day-scoped dedup store.
//!
//! One JSON document per calendar day under `daily_messages/`; at most one
//! day's file is retained on disk. `mark_sent` is the only mutator and
//! commits the key and the audit record in a single whole-document write.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    domain::{DeliveryRecord, MessageKey},
    errors::Error,
    Result,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DailyDoc {
    day: String,
    seen_keys: Vec<MessageKey>,
    sent: Vec<DeliveryRecord>,
}

impl DailyDoc {
    fn empty(day: &str) -> Self {
        Self {
            day: day.to_string(),
            seen_keys: Vec::new(),
            sent: Vec::new(),
        }
    }
}

pub struct DedupStore {
    dir: PathBuf,
    day: String,
    seen: HashSet<MessageKey>,
    doc: DailyDoc,
}

impl DedupStore {
    /// Open the store for `day`, deleting every other day's file.
    pub fn open(dir: &Path, day: &str) -> Self {
        let mut store = Self {
            dir: dir.to_path_buf(),
            day: String::new(),
            seen: HashSet::new(),
            doc: DailyDoc::empty(day),
        };
        store.rotate(day);
        store
    }

    pub fn day(&self) -> &str {
        &self.day
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Load (or create empty) the structure for `day`, replace the in-memory
    /// key set, and delete all other persisted days.
    pub fn rotate(&mut self, day: &str) {
        self.day = day.to_string();
        self.doc = load_daily_doc(&self.dir, day);
        self.seen = self.doc.seen_keys.iter().cloned().collect();
        cleanup_other_days(&self.dir, day);
    }

    pub fn is_new(&self, key: &MessageKey) -> bool {
        !self.seen.contains(key)
    }

    /// Commit a delivered message: the key joins `seen_keys` and the audit
    /// record is appended, persisted as one write. Only call after at least
    /// one destination confirmed delivery.
    pub fn mark_sent(&mut self, key: MessageKey, record: DeliveryRecord) -> Result<()> {
        if self.seen.insert(key.clone()) {
            self.doc.seen_keys.push(key);
        }
        self.doc.sent.push(record);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = day_file(&self.dir, &self.day);
        let txt = serde_json::to_string_pretty(&self.doc)?;
        std::fs::write(&path, txt).map_err(|e| Error::Persistence {
            path,
            reason: e.to_string(),
        })
    }
}

/// Remove one day's persisted store, or every day's when `day` is `None`.
pub fn clear(dir: &Path, day: Option<&str>) -> Result<bool> {
    if let Some(day) = day {
        let path = day_file(dir, day);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        return Ok(true);
    }

    let mut removed = false;
    for path in day_files(dir) {
        std::fs::remove_file(path)?;
        removed = true;
    }
    Ok(removed)
}

fn day_file(dir: &Path, day: &str) -> PathBuf {
    dir.join(format!("messages_{day}.json"))
}

fn day_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("messages_") && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect()
}

fn load_daily_doc(dir: &Path, day: &str) -> DailyDoc {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "cannot create daily store dir");
        return DailyDoc::empty(day);
    }
    let path = day_file(dir, day);
    let Ok(txt) = std::fs::read_to_string(&path) else {
        return DailyDoc::empty(day);
    };
    match serde_json::from_str::<DailyDoc>(&txt) {
        Ok(mut doc) => {
            doc.day = day.to_string();
            doc
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed daily store, starting empty");
            DailyDoc::empty(day)
        }
    }
}

fn cleanup_other_days(dir: &Path, keep_day: &str) {
    let keep = day_file(dir, keep_day);
    for path in day_files(dir) {
        if path == keep {
            continue;
        }
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "could not remove stale daily store");
        }
    }
}
