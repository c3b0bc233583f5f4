//! Signal dedup suppressor
//!
//! Process-wide guard against alert storms: a repeat signal for the same
//! (strategy, symbol, direction) inside the window is suppressed unless its
//! confidence improved enough to justify re-alerting. State is in-memory and
//! best-effort; a restart forgets suppression history.
//!
//! Owned and passed explicitly by the alerting component: construct one per
//! process (or per test), there is no hidden global.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::types::TradeAction;

pub const DEFAULT_DEDUP_CAPACITY: usize = 2000;

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    last_fired_at_ms: i64,
    last_confidence: f64,
}

/// Verdict for one candidate emission
#[derive(Debug, Clone)]
pub struct DedupVerdict {
    pub suppress: bool,
    pub reason: Option<String>,
}

impl DedupVerdict {
    fn fire() -> Self {
        Self {
            suppress: false,
            reason: None,
        }
    }
}

pub struct SignalDedup {
    capacity: usize,
    entries: RwLock<HashMap<String, DedupEntry>>,
}

impl SignalDedup {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Key = strategy id, uppercased symbol, direction. The symbol is
    /// uppercased here, exactly once; strategy id case is never touched.
    fn key(strategy_id: &str, symbol: &str, direction: TradeAction) -> String {
        format!("{}|{}|{}", strategy_id, symbol.to_uppercase(), direction)
    }

    /// Should this emission be suppressed?
    ///
    /// Never suppresses when the window is disabled, the key has no prior
    /// fire, or the prior fire sits outside `[0, window)`. A future-dated
    /// prior fire (negative elapsed) is treated as clock skew and does not
    /// suppress. Inside the window, a confidence of at least
    /// `last + min_confidence_delta` overrides the suppression.
    pub fn should_suppress(
        &self,
        strategy_id: &str,
        symbol: &str,
        direction: TradeAction,
        now_ms: i64,
        window_minutes: i64,
        min_confidence_delta: f64,
        confidence: f64,
    ) -> DedupVerdict {
        if window_minutes <= 0 {
            return DedupVerdict::fire();
        }

        let key = Self::key(strategy_id, symbol, direction);
        let entry = {
            let entries = self.entries.read().unwrap();
            entries.get(&key).copied()
        };
        let Some(entry) = entry else {
            return DedupVerdict::fire();
        };

        let window_ms = window_minutes * 60_000;
        let elapsed_ms = now_ms - entry.last_fired_at_ms;
        if elapsed_ms < 0 || elapsed_ms >= window_ms {
            return DedupVerdict::fire();
        }

        if confidence >= entry.last_confidence + min_confidence_delta {
            debug!(
                key = %key,
                confidence,
                last_confidence = entry.last_confidence,
                "dedup override: confidence improved enough to re-alert"
            );
            return DedupVerdict::fire();
        }

        DedupVerdict {
            suppress: true,
            reason: Some(format!(
                "repeat within {}m window (confidence {:.1} < {:.1})",
                window_minutes,
                confidence,
                entry.last_confidence + min_confidence_delta
            )),
        }
    }

    /// Record a non-suppressed fire. The emitter must call this after every
    /// emission it actually sends.
    pub fn record_fire(
        &self,
        strategy_id: &str,
        symbol: &str,
        direction: TradeAction,
        now_ms: i64,
        confidence: f64,
    ) {
        let key = Self::key(strategy_id, symbol, direction);
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key,
            DedupEntry {
                last_fired_at_ms: now_ms,
                last_confidence: confidence,
            },
        );

        // Memory hygiene only: evict strictly oldest fires down to the cap.
        if entries.len() > self.capacity {
            let mut by_age: Vec<(String, i64)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.last_fired_at_ms))
                .collect();
            by_age.sort_by_key(|(_, fired_at)| *fired_at);
            let excess = entries.len() - self.capacity;
            for (key, _) in by_age.into_iter().take(excess) {
                entries.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SignalDedup {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
