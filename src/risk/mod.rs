//! Risk / unrealized summaries
//!
//! Two mark-to-market views. The suggestion-based view marks open tracked
//! suggestions (paper-oriented); the broker-truth view marks the brokerage's
//! own position list (live-oriented). Both return a structured result with
//! an explicit `ok`: a failed precondition fetch yields `ok:false` with a
//! reason tag and zeroed numbers, never partially misleading totals. A
//! missing quote for one symbol only degrades that symbol's mark.

use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::broker::quotes::QuoteCache;
use crate::broker::{AccountBalances, BrokerApi};
use crate::pnl::{is_closed_status, pnl_usd, position_quantity, today_trading_day, trading_day};
use crate::store::SuggestionStore;
use crate::types::{Side, TradeAction, TrackedSuggestion};

/// Infer position direction for a suggestion.
///
/// Heuristic chain, in priority order: the originating signal action, lexical
/// hints in the strategy name, then stop-above-entry. Defaults LONG. Isolated
/// here so an explicit side field can replace the whole chain.
pub fn infer_side(s: &TrackedSuggestion) -> Side {
    if let Some(action) = s.signal_action() {
        return match action {
            TradeAction::Sell => Side::Short,
            TradeAction::Buy => Side::Long,
        };
    }

    let strategy = s.strategy.to_lowercase();
    if ["short", "put", "bear", "fade"]
        .iter()
        .any(|hint| strategy.contains(hint))
    {
        return Side::Short;
    }
    if ["long", "call", "bull"]
        .iter()
        .any(|hint| strategy.contains(hint))
    {
        return Side::Long;
    }

    // a stop parked above entry only makes sense protecting a short
    if let Some(stop) = s.stop_loss {
        if stop > s.entry_price {
            return Side::Short;
        }
    }
    Side::Long
}

/// One open suggestion marked to market
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummaryRow {
    pub symbol: String,
    pub strategy: String,
    pub side: Side,
    pub quantity: f64,
    pub entry: f64,
    pub mark: f64,
    pub notional_usd: f64,
    pub unrealized_pnl_usd: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskSummary {
    pub ok: bool,
    pub reason: Option<String>,
    pub rows: Vec<RiskSummaryRow>,
    pub total_notional_usd: f64,
    pub total_unrealized_usd: f64,
    /// Realized dollars from suggestions closed today (reporting timezone)
    pub realized_today_usd: f64,
}

impl RiskSummary {
    fn failed(reason: &str) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

/// One broker position marked to market
#[derive(Debug, Clone, Serialize)]
pub struct BrokerPositionRow {
    pub symbol: String,
    pub asset_type: String,
    pub quantity: f64,
    pub average_price: f64,
    pub market_value: f64,
    pub cost_basis: f64,
    pub unrealized_usd: f64,
    pub unrealized_pct: f64,
    pub current_price: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BrokerPositionsSummary {
    pub ok: bool,
    pub reason: Option<String>,
    pub rows: Vec<BrokerPositionRow>,
    pub total_market_value_usd: f64,
    pub total_unrealized_usd: f64,
    pub balances: AccountBalances,
}

impl BrokerPositionsSummary {
    fn failed(reason: &str) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

pub struct RiskEngine {
    broker: Arc<dyn BrokerApi>,
    store: Arc<SuggestionStore>,
    quotes: QuoteCache,
}

impl RiskEngine {
    pub fn new(broker: Arc<dyn BrokerApi>, store: Arc<SuggestionStore>, quotes: QuoteCache) -> Self {
        Self {
            broker,
            store,
            quotes,
        }
    }

    /// Mark every ACTIVE suggestion to market and fold in today's realized
    /// figure. Rows come back sorted by notional, largest first.
    pub async fn suggestion_summary(&self) -> RiskSummary {
        let suggestions = self.store.load();
        let open: Vec<&TrackedSuggestion> =
            suggestions.iter().filter(|s| s.is_active()).collect();

        let today = today_trading_day();
        let realized_today_usd: f64 = suggestions
            .iter()
            .filter(|s| is_closed_status(s.status))
            .filter_map(|s| {
                let closed_at = s.closed_at?;
                let closed_price = s.closed_price?;
                if trading_day(closed_at) != today {
                    return None;
                }
                Some(pnl_usd(
                    infer_side(s),
                    s.entry_price,
                    closed_price,
                    position_quantity(s),
                ))
            })
            .sum();

        let mut symbols: Vec<String> = open.iter().map(|s| s.ticker.to_uppercase()).collect();
        symbols.sort();
        symbols.dedup();

        let quote_map = match self.quotes.get_many(self.broker.as_ref(), &symbols).await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Quote fetch failed, risk summary unavailable");
                return RiskSummary::failed("quotes_unavailable");
            }
        };

        let mut rows: Vec<RiskSummaryRow> = open
            .iter()
            .map(|s| {
                let side = infer_side(s);
                let quantity = position_quantity(s);
                // an unknown symbol degrades to a zero mark, never an abort
                let mark = quote_map
                    .get(&s.ticker.to_uppercase())
                    .map(|q| q.best_mark())
                    .unwrap_or(0.0);
                let (notional_usd, unrealized_pnl_usd) = if mark > 0.0 {
                    (
                        (mark * quantity).abs(),
                        pnl_usd(side, s.entry_price, mark, quantity),
                    )
                } else {
                    (0.0, 0.0)
                };
                RiskSummaryRow {
                    symbol: s.ticker.to_uppercase(),
                    strategy: s.strategy.clone(),
                    side,
                    quantity,
                    entry: s.entry_price,
                    mark,
                    notional_usd,
                    unrealized_pnl_usd,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.notional_usd
                .partial_cmp(&a.notional_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        RiskSummary {
            ok: true,
            reason: None,
            total_notional_usd: rows.iter().map(|r| r.notional_usd).sum(),
            total_unrealized_usd: rows.iter().map(|r| r.unrealized_pnl_usd).sum(),
            realized_today_usd,
            rows,
        }
    }

    /// Mark the broker's own open positions to market. The account snapshot
    /// is the precondition; a quote outage only loses the quote fallback
    /// because broker-reported market values already carry most rows.
    pub async fn broker_positions_summary(&self) -> BrokerPositionsSummary {
        let account = match self.broker.get_account_details().await {
            Ok(account) => account,
            Err(e) => {
                warn!(error = %e, "Account fetch failed, positions summary unavailable");
                return BrokerPositionsSummary::failed("account_unavailable");
            }
        };

        let mut symbols: Vec<String> = account
            .positions
            .iter()
            .map(|p| p.symbol.to_uppercase())
            .collect();
        symbols.sort();
        symbols.dedup();

        let quote_map = match self.quotes.get_many(self.broker.as_ref(), &symbols).await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Quote fetch failed, using broker-reported values only");
                Default::default()
            }
        };

        let mut rows: Vec<BrokerPositionRow> = account
            .positions
            .iter()
            .map(|p| {
                let multiplier = if p.asset_type.eq_ignore_ascii_case("OPTION") {
                    100.0
                } else {
                    1.0
                };
                let quantity = p.net_quantity();
                let last = quote_map
                    .get(&p.symbol.to_uppercase())
                    .map(|q| q.best_mark())
                    .unwrap_or(0.0);
                let market_value = if p.market_value != 0.0 {
                    p.market_value
                } else {
                    last * quantity * multiplier
                };
                let cost_basis = p.average_price * quantity * multiplier;
                let unrealized_usd = market_value - cost_basis;
                let unrealized_pct = if cost_basis != 0.0 {
                    unrealized_usd / cost_basis * 100.0
                } else {
                    0.0
                };
                let current_price = if quantity != 0.0 {
                    market_value / (quantity * multiplier)
                } else {
                    last
                };
                BrokerPositionRow {
                    symbol: p.symbol.clone(),
                    asset_type: p.asset_type.clone(),
                    quantity,
                    average_price: p.average_price,
                    market_value,
                    cost_basis,
                    unrealized_usd,
                    unrealized_pct,
                    current_price,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.market_value
                .abs()
                .partial_cmp(&a.market_value.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        BrokerPositionsSummary {
            ok: true,
            reason: None,
            total_market_value_usd: rows.iter().map(|r| r.market_value).sum(),
            total_unrealized_usd: rows.iter().map(|r| r.unrealized_usd).sum(),
            balances: account.balances,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EvidencePacket, TrackedSuggestion};

    #[test]
    fn side_inference_priority_chain() {
        // 1. explicit signal action wins over everything
        let mut s = TrackedSuggestion::new("AAPL", "bull_call_spread", 100.0, 70.0);
        s.evidence = Some(EvidencePacket {
            action: Some(TradeAction::Sell),
            ..Default::default()
        });
        s.stop_loss = Some(90.0);
        assert_eq!(infer_side(&s), Side::Short);

        // 2. lexical hint in the strategy name
        let s = TrackedSuggestion::new("SPY", "put_debit_spread", 100.0, 70.0);
        assert_eq!(infer_side(&s), Side::Short);
        let s = TrackedSuggestion::new("SPY", "bull_momentum", 100.0, 70.0);
        assert_eq!(infer_side(&s), Side::Long);

        // 3. stop above entry reads as a short
        let mut s = TrackedSuggestion::new("QQQ", "mean_reversion", 100.0, 70.0);
        s.stop_loss = Some(110.0);
        assert_eq!(infer_side(&s), Side::Short);

        // 4. default long
        let s = TrackedSuggestion::new("QQQ", "mean_reversion", 100.0, 70.0);
        assert_eq!(infer_side(&s), Side::Long);
    }
}
