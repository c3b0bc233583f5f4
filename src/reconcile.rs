//! Order reconciler
//!
//! Makes each tracked suggestion's broker overlay (and terminal status)
//! agree with the brokerage's own order records. Broker state is the truth:
//! the reconciler only ever merges broker fields in, and the only lifecycle
//! transition it drives is ACTIVE → CLOSED on an observed filled exit.
//!
//! Re-running against unchanged broker state is a no-op: every merged
//! overlay is compared against the stored record before any write, so store
//! churn stays proportional to real broker-state changes.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{is_filled_status, parse_broker_time, BrokerApi, BrokerOrder, BROKER_PROVIDER};
use crate::pnl::{compute_realized_pnl_usd, position_quantity};
use crate::store::{SuggestionPatch, SuggestionStore, TradeLog, TradeLogRecord};
use crate::types::{BrokerFill, SuggestionStatus, TrackedSuggestion};

pub const MIN_LOOKBACK_DAYS: i64 = 1;
pub const MAX_LOOKBACK_DAYS: i64 = 30;
pub const MIN_MAX_RESULTS: u32 = 25;
pub const MAX_MAX_RESULTS: u32 = 2000;

/// Outcome of one reconciliation tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub ok: bool,
    /// Candidates holding at least one resolvable order id
    pub scanned: usize,
    /// Candidates whose entry or exit order was found in the broker feed
    pub matched: usize,
    /// Candidates actually persisted (broker record or status changed)
    pub updated: usize,
    /// Top-level failures only; per-suggestion problems are skipped, not
    /// collected
    pub errors: Vec<String>,
}

pub struct OrderReconciler {
    broker: Arc<dyn BrokerApi>,
    store: Arc<SuggestionStore>,
    account_hash: Option<String>,
    trade_log: Option<TradeLog>,
}

impl OrderReconciler {
    pub fn new(broker: Arc<dyn BrokerApi>, store: Arc<SuggestionStore>) -> Self {
        Self {
            broker,
            store,
            account_hash: None,
            trade_log: None,
        }
    }

    /// Stamp new broker overlays with this account hash
    pub fn with_account_hash(mut self, account_hash: &str) -> Self {
        self.account_hash = Some(account_hash.to_string());
        self
    }

    /// Append a realized-trade record whenever a suggestion closes
    pub fn with_trade_log(mut self, trade_log: TradeLog) -> Self {
        self.trade_log = Some(trade_log);
        self
    }

    /// One reconciliation tick over the broker's recent orders.
    pub async fn reconcile(&self, lookback_days: i64, max_results: u32) -> ReconcileReport {
        let lookback_days = lookback_days.clamp(MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS);
        let max_results = max_results.clamp(MIN_MAX_RESULTS, MAX_MAX_RESULTS);

        let suggestions = self.store.load();
        let candidates: Vec<&TrackedSuggestion> = suggestions
            .iter()
            .filter(|s| s.entry_order_id().is_some() || s.exit_order_id().is_some())
            .collect();

        let mut report = ReconcileReport {
            ok: true,
            scanned: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return report;
        }

        let from_time = Utc::now() - Duration::days(lookback_days);
        let orders = match self.broker.list_orders(from_time, max_results).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "Broker order fetch failed, aborting reconcile tick");
                report.ok = false;
                report.errors.push(format!("order fetch failed: {e}"));
                return report;
            }
        };

        // The order collection reports the instrument symbol itself; the
        // lookup key must be whatever it says, uppercased.
        let mut by_symbol_and_id: HashMap<(String, String), &BrokerOrder> = HashMap::new();
        for order in &orders {
            by_symbol_and_id.insert((order.symbol.to_uppercase(), order.order_id.clone()), order);
        }

        let now = Utc::now();
        for suggestion in candidates {
            let symbol = suggestion.instrument_symbol();
            let entry_order = suggestion
                .entry_order_id()
                .and_then(|id| by_symbol_and_id.get(&(symbol.clone(), id.to_string())))
                .copied();
            let exit_order = suggestion
                .exit_order_id()
                .and_then(|id| by_symbol_and_id.get(&(symbol.clone(), id.to_string())))
                .copied();

            // Orders may simply not have posted yet; nothing to do.
            if entry_order.is_none() && exit_order.is_none() {
                continue;
            }
            report.matched += 1;

            let merged = self.merge_broker_truth(suggestion, entry_order, exit_order);

            let mut patch = SuggestionPatch::default();
            let mut closing = false;
            if let Some(exit) = exit_order {
                let exit_filled = exit
                    .status
                    .as_deref()
                    .map(is_filled_status)
                    .unwrap_or(false);
                if exit_filled && suggestion.status == SuggestionStatus::Active {
                    closing = true;
                    patch.status = Some(SuggestionStatus::Closed);
                    patch.closed_at = Some(
                        exit.close_time
                            .as_deref()
                            .and_then(parse_broker_time)
                            .unwrap_or(now),
                    );
                    // never write a non-finite price
                    patch.closed_price = exit.average_fill_price.filter(|px| px.is_finite());
                }
            }

            let broker_changed = Some(&merged) != suggestion.broker.as_ref();
            if !broker_changed && patch.status.is_none() {
                continue;
            }

            let mut merged = merged;
            merged.last_update = Some(now);
            patch.broker = Some(merged);

            match self.store.update(&suggestion.id, &patch) {
                Ok(Some(updated)) => {
                    report.updated += 1;
                    if closing {
                        info!(
                            id = %updated.id,
                            ticker = %updated.ticker,
                            closed_price = ?updated.closed_price,
                            "Suggestion closed from broker exit fill"
                        );
                        self.log_closed_trade(&updated);
                    }
                }
                Ok(None) => {
                    warn!(id = %suggestion.id, "Suggestion vanished mid-reconcile, skipping");
                }
                Err(e) => {
                    warn!(id = %suggestion.id, error = %e, "Failed to persist reconciled suggestion, skipping");
                }
            }
        }

        info!(
            scanned = report.scanned,
            matched = report.matched,
            updated = report.updated,
            "Reconcile tick complete"
        );
        report
    }

    /// Merge entry/exit order fields onto the suggestion's broker overlay.
    /// Purely additive; `last_update` stays untouched so an unchanged merge
    /// compares equal to the stored record.
    fn merge_broker_truth(
        &self,
        suggestion: &TrackedSuggestion,
        entry_order: Option<&BrokerOrder>,
        exit_order: Option<&BrokerOrder>,
    ) -> BrokerFill {
        let mut merged = suggestion.broker.clone().unwrap_or_default();
        if merged.provider.is_none() {
            merged.provider = Some(BROKER_PROVIDER.to_string());
        }
        if merged.account_hash.is_none() {
            merged.account_hash = self.account_hash.clone();
        }

        if let Some(entry) = entry_order {
            merged.merge(&BrokerFill {
                order_id: Some(entry.order_id.clone()),
                status: entry.status.clone(),
                entered_time: entry.entered_time.clone(),
                close_time: entry.close_time.clone(),
                filled_quantity: entry.filled_quantity,
                remaining_quantity: entry.remaining_quantity,
                average_fill_price: entry.average_fill_price,
                ..Default::default()
            });
        }
        if let Some(exit) = exit_order {
            merged.merge(&BrokerFill {
                exit_order_id: Some(exit.order_id.clone()),
                exit_status: exit.status.clone(),
                exit_close_time: exit.close_time.clone(),
                exit_filled_quantity: exit.filled_quantity,
                exit_remaining_quantity: exit.remaining_quantity,
                exit_average_fill_price: exit.average_fill_price,
                ..Default::default()
            });
        }
        merged
    }

    fn log_closed_trade(&self, s: &TrackedSuggestion) {
        let Some(trade_log) = &self.trade_log else {
            return;
        };
        let record = TradeLogRecord {
            timestamp: Utc::now().timestamp_millis(),
            suggestion_id: s.id.clone(),
            ticker: s.ticker.clone(),
            strategy: s.strategy.clone(),
            entry_price: s.entry_price,
            closed_price: s.closed_price.unwrap_or(0.0),
            quantity: position_quantity(s),
            pnl_usd: compute_realized_pnl_usd(s),
            status: s.status.to_string(),
        };
        // non-critical path: TradeLog swallows failures unless strict
        let _ = trade_log.append(&record);
    }
}
