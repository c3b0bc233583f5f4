//! Suggestion store
//!
//! JSON-file-backed collection of tracked suggestions plus an append-only
//! CSV log of realized trades. Every write replaces the whole collection
//! atomically (temp file + rename) so a concurrent reader never observes a
//! half-written store. The store is a non-authoritative cache: an unreadable
//! or corrupt file degrades to the empty collection and is rebuilt from
//! broker truth on the next reconciliation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::types::{BrokerFill, SuggestionStatus, TrackedSuggestion};

/// Partial update applied to one suggestion. Only `Some` fields change;
/// `broker` merges additively into the existing overlay.
#[derive(Debug, Clone, Default)]
pub struct SuggestionPatch {
    pub status: Option<SuggestionStatus>,
    pub setup: Option<String>,
    pub regime: Option<String>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub confidence: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_price: Option<f64>,
    pub broker: Option<BrokerFill>,
}

impl SuggestionPatch {
    fn apply(&self, s: &mut TrackedSuggestion) {
        if let Some(status) = self.status {
            s.status = status;
        }
        if let Some(setup) = &self.setup {
            s.setup = Some(setup.clone());
        }
        if let Some(regime) = &self.regime {
            s.regime = Some(regime.clone());
        }
        if let Some(target) = self.target_price {
            s.target_price = Some(target);
        }
        if let Some(stop) = self.stop_loss {
            s.stop_loss = Some(stop);
        }
        if let Some(confidence) = self.confidence {
            s.confidence = confidence;
        }
        if let Some(closed_at) = self.closed_at {
            s.closed_at = Some(closed_at);
        }
        if let Some(closed_price) = self.closed_price {
            s.closed_price = Some(closed_price);
        }
        if let Some(overlay) = &self.broker {
            match &mut s.broker {
                Some(existing) => existing.merge(overlay),
                None => s.broker = Some(overlay.clone()),
            }
        }
        s.updated_at = Utc::now();
    }
}

/// File-backed suggestion collection, most-recent-first by convention
pub struct SuggestionStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl SuggestionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full collection. A missing or corrupt backing file yields the empty
    /// collection, never an error.
    pub fn load(&self) -> Vec<TrackedSuggestion> {
        let _guard = self.lock.read().unwrap();
        self.read_unlocked()
    }

    /// Whole-collection atomic replace
    pub fn save(&self, items: &[TrackedSuggestion]) -> Result<()> {
        let _guard = self.lock.write().unwrap();
        self.write_unlocked(items)
    }

    /// Replace by id, or prepend when the id is new
    pub fn upsert(&self, suggestion: TrackedSuggestion) -> Result<()> {
        let _guard = self.lock.write().unwrap();
        let mut items = self.read_unlocked();
        match items.iter_mut().find(|s| s.id == suggestion.id) {
            Some(slot) => *slot = suggestion,
            None => items.insert(0, suggestion),
        }
        self.write_unlocked(&items)
    }

    /// Merge `patch` into the suggestion with `id`, bumping `updated_at`.
    /// `Ok(None)` means the id is unknown, not an error.
    pub fn update(&self, id: &str, patch: &SuggestionPatch) -> Result<Option<TrackedSuggestion>> {
        let _guard = self.lock.write().unwrap();
        let mut items = self.read_unlocked();
        let Some(slot) = items.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        patch.apply(slot);
        let updated = slot.clone();
        self.write_unlocked(&items)?;
        Ok(Some(updated))
    }

    /// Remove by id; `false` when the id was not present
    pub fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.write().unwrap();
        let mut items = self.read_unlocked();
        let before = items.len();
        items.retain(|s| s.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.write_unlocked(&items)?;
        Ok(true)
    }

    fn read_unlocked(&self) -> Vec<TrackedSuggestion> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => {
                info!(path = %self.path.display(), "💾 No suggestion file found, starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Suggestion file unreadable, starting empty");
                Vec::new()
            }
        }
    }

    fn write_unlocked(&self, items: &[TrackedSuggestion]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(items)?;
        let tmp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Closed-trade CSV log
// ─────────────────────────────────────────────────────────────────

/// One realized trade, appended when reconciliation closes a suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogRecord {
    pub timestamp: i64,
    pub suggestion_id: String,
    pub ticker: String,
    pub strategy: String,
    pub entry_price: f64,
    pub closed_price: f64,
    pub quantity: f64,
    pub pnl_usd: f64,
    pub status: String,
}

/// Append-only realized-trade log. Writes on this path are non-critical:
/// failures are logged and swallowed unless `strict` is set.
pub struct TradeLog {
    path: PathBuf,
    strict: bool,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>, strict: bool) -> Self {
        Self {
            path: path.into(),
            strict,
        }
    }

    pub fn append(&self, record: &TradeLogRecord) -> Result<()> {
        match self.append_inner(record) {
            Ok(()) => Ok(()),
            Err(e) if self.strict => Err(e),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Trade log write failed, continuing");
                Ok(())
            }
        }
    }

    fn append_inner(&self, record: &TradeLogRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let needs_headers = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(needs_headers).from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_store(test_name: &str) -> (PathBuf, SuggestionStore) {
        let dir = std::env::temp_dir().join(format!(
            "schwabot_store_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ));
        let path = dir.join("suggestions.json");
        (dir, SuggestionStore::new(path))
    }

    #[test]
    fn missing_file_loads_empty() {
        let (dir, store) = temp_store("missing");
        assert!(store.load().is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let (dir, store) = temp_store("corrupt");
        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn upsert_prepends_new_and_replaces_existing() {
        let (dir, store) = temp_store("upsert");
        let first = TrackedSuggestion::new("AAPL", "momentum_scalper", 190.0, 70.0);
        let second = TrackedSuggestion::new("MSFT", "trend_follower", 410.0, 80.0);

        store.upsert(first.clone()).unwrap();
        store.upsert(second.clone()).unwrap();
        let items = store.load();
        assert_eq!(items.len(), 2);
        // most recent first
        assert_eq!(items[0].id, second.id);

        let mut replacement = first.clone();
        replacement.confidence = 95.0;
        store.upsert(replacement).unwrap();
        let items = store.load();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].confidence, 95.0);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn update_merges_and_bumps_updated_at() {
        let (dir, store) = temp_store("update");
        let s = TrackedSuggestion::new("SPY", "volatility_breakout", 500.0, 60.0);
        let id = s.id.clone();
        let created_updated_at = s.updated_at;
        store.upsert(s).unwrap();

        let patch = SuggestionPatch {
            status: Some(SuggestionStatus::Closed),
            closed_price: Some(510.0),
            closed_at: Some(Utc::now()),
            ..Default::default()
        };
        let updated = store.update(&id, &patch).unwrap().unwrap();
        assert_eq!(updated.status, SuggestionStatus::Closed);
        assert_eq!(updated.closed_price, Some(510.0));
        assert!(updated.updated_at >= created_updated_at);
        // untouched fields survive the merge
        assert_eq!(updated.entry_price, 500.0);

        assert!(store.update("no-such-id", &patch).unwrap().is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn patch_merges_broker_overlay_additively() {
        let (dir, store) = temp_store("broker_merge");
        let mut s = TrackedSuggestion::new("NVDA", "momentum_scalper", 900.0, 75.0);
        s.broker = Some(BrokerFill {
            order_id: Some("42".into()),
            status: Some("WORKING".into()),
            ..Default::default()
        });
        let id = s.id.clone();
        store.upsert(s).unwrap();

        let patch = SuggestionPatch {
            broker: Some(BrokerFill {
                status: Some("FILLED".into()),
                filled_quantity: Some(100.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let updated = store.update(&id, &patch).unwrap().unwrap();
        let broker = updated.broker.unwrap();
        assert_eq!(broker.order_id.as_deref(), Some("42"));
        assert_eq!(broker.status.as_deref(), Some("FILLED"));
        assert_eq!(broker.filled_quantity, Some(100.0));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn delete_reports_presence() {
        let (dir, store) = temp_store("delete");
        let s = TrackedSuggestion::new("TSLA", "trend_follower", 250.0, 65.0);
        let id = s.id.clone();
        store.upsert(s).unwrap();

        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(store.load().is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn trade_log_swallows_write_failures_unless_strict() {
        // a directory path cannot be opened as a file, forcing a write error
        let dir = std::env::temp_dir().join(format!("schwabot_tradelog_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let record = TradeLogRecord {
            timestamp: 0,
            suggestion_id: "x".into(),
            ticker: "AAPL".into(),
            strategy: "momentum_scalper".into(),
            entry_price: 100.0,
            closed_price: 110.0,
            quantity: 100.0,
            pnl_usd: 1000.0,
            status: "CLOSED".into(),
        };

        let lenient = TradeLog::new(&dir, false);
        assert!(lenient.append(&record).is_ok());

        let strict = TradeLog::new(&dir, true);
        assert!(strict.append(&record).is_err());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn trade_log_appends_with_headers_once() {
        let dir = std::env::temp_dir().join(format!("schwabot_tradelog_ok_{}", uuid::Uuid::new_v4()));
        let path = dir.join("trades.csv");
        let log = TradeLog::new(&path, true);

        let record = TradeLogRecord {
            timestamp: 1,
            suggestion_id: "a".into(),
            ticker: "SPY".into(),
            strategy: "trend_follower".into(),
            entry_price: 2.0,
            closed_price: 3.0,
            quantity: 500.0,
            pnl_usd: 500.0,
            status: "CLOSED".into(),
        };
        log.append(&record).unwrap();
        log.append(&record).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let header_lines = contents
            .lines()
            .filter(|l| l.starts_with("timestamp"))
            .count();
        assert_eq!(header_lines, 1);
        assert_eq!(contents.lines().count(), 3);
        let _ = fs::remove_dir_all(dir);
    }
}
