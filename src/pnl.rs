//! Realized P&L
//!
//! Two sources of realized truth live side by side: local closed suggestions
//! (folded into per-day buckets, scoped live/paper/all) and the broker's own
//! transaction history (folded into today / week-to-date / month-to-date).
//! All day bucketing happens in the fixed reporting timezone, never the
//! host-local date, which drifts across the midnight boundary whenever the
//! deployment host sits in another zone.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::broker::{parse_broker_time, BrokerApi, BrokerTransaction};
use crate::store::SuggestionStore;
use crate::types::{Side, SuggestionStatus, TrackedSuggestion};

pub const DEFAULT_POSITION_SHARES: f64 = 100.0;
pub const DEFAULT_POSITION_CONTRACTS: f64 = 5.0;
pub const DEFAULT_CONTRACT_MULTIPLIER: f64 = 100.0;

// ── Trading-day helpers ─────────────────────────────────────

/// Calendar day (`YYYY-MM-DD`) an instant falls on in the reporting timezone
pub fn trading_day(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&New_York).format("%Y-%m-%d").to_string()
}

/// Today's trading day in the reporting timezone
pub fn today_trading_day() -> String {
    trading_day(Utc::now())
}

/// Monday of the week `day` falls in
pub fn week_start(day: &str) -> Option<String> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    Some(monday.format("%Y-%m-%d").to_string())
}

/// First of the month `day` falls in
pub fn month_start(day: &str) -> Option<String> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    Some(date.with_day(1)?.format("%Y-%m-%d").to_string())
}

// ── Per-suggestion realized math ────────────────────────────

/// Statuses that count as closed for realized P&L
pub fn is_closed_status(status: SuggestionStatus) -> bool {
    matches!(
        status,
        SuggestionStatus::Closed
            | SuggestionStatus::HitTarget
            | SuggestionStatus::StoppedOut
            | SuggestionStatus::Expired
            | SuggestionStatus::Canceled
    )
}

/// Share-equivalent quantity. Option suggestions use the contract branch
/// whenever `option_contract` is present; equity suggestions use shares.
pub fn position_quantity(s: &TrackedSuggestion) -> f64 {
    if s.option_contract.is_some() {
        let contracts = s.position_contracts.unwrap_or(DEFAULT_POSITION_CONTRACTS);
        let multiplier = s.contract_multiplier.unwrap_or(DEFAULT_CONTRACT_MULTIPLIER);
        contracts * multiplier
    } else {
        s.position_shares.unwrap_or(DEFAULT_POSITION_SHARES)
    }
}

/// Realized dollars for one closed suggestion. Zero entry or exit price
/// yields zero: a guard against derived garbage, not a trading statement.
pub fn compute_realized_pnl_usd(s: &TrackedSuggestion) -> f64 {
    let Some(closed_price) = s.closed_price else {
        return 0.0;
    };
    if s.entry_price == 0.0 || closed_price == 0.0 {
        return 0.0;
    }
    if !s.entry_price.is_finite() || !closed_price.is_finite() {
        return 0.0;
    }
    (closed_price - s.entry_price) * position_quantity(s)
}

/// Side-aware realized dollars, used where direction is known
pub fn pnl_usd(side: Side, entry: f64, exit: f64, quantity: f64) -> f64 {
    match side {
        Side::Long => (exit - entry) * quantity,
        Side::Short => (entry - exit) * quantity,
    }
}

// ── Scope filter ────────────────────────────────────────────

/// Which suggestions a rollup covers: broker-confirmed, paper, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Live,
    Paper,
    All,
}

impl Scope {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "live" => Some(Scope::Live),
            "paper" => Some(Scope::Paper),
            "all" => Some(Scope::All),
            _ => None,
        }
    }

    /// Broker-confirmed means an entry order id exists on the overlay
    pub fn includes(&self, s: &TrackedSuggestion) -> bool {
        let live = s
            .broker
            .as_ref()
            .and_then(|b| b.order_id.as_ref())
            .is_some();
        match self {
            Scope::Live => live,
            Scope::Paper => !live,
            Scope::All => true,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Live => write!(f, "live"),
            Scope::Paper => write!(f, "paper"),
            Scope::All => write!(f, "all"),
        }
    }
}

// ── Calendar rollups ────────────────────────────────────────

/// One trading day's realized bucket
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DailyPnl {
    pub pnl_usd: f64,
    pub trades: u32,
}

/// Fold closed suggestions into per-day buckets, optionally restricted to
/// one `YYYY-MM` month, honoring the live/paper/all scope.
pub fn realized_by_day(
    suggestions: &[TrackedSuggestion],
    scope: Scope,
    month: Option<&str>,
) -> BTreeMap<String, DailyPnl> {
    let mut buckets: BTreeMap<String, DailyPnl> = BTreeMap::new();
    for s in suggestions {
        if !is_closed_status(s.status) || !scope.includes(s) {
            continue;
        }
        let Some(closed_at) = s.closed_at else {
            continue;
        };
        let day = trading_day(closed_at);
        if let Some(month) = month {
            if !day.starts_with(month) {
                continue;
            }
        }
        let bucket = buckets.entry(day).or_default();
        bucket.pnl_usd += compute_realized_pnl_usd(s);
        bucket.trades += 1;
    }
    buckets
}

/// Broker-truth realized rollup: today / week-to-date / month-to-date
#[derive(Debug, Clone, Default, Serialize)]
pub struct RealizedRollup {
    pub today_usd: f64,
    pub wtd_usd: f64,
    pub mtd_usd: f64,
    pub by_day: BTreeMap<String, DailyPnl>,
}

/// Fold broker transactions into daily buckets and the standard windows.
/// `today` is the reporting-timezone day string the windows anchor on.
pub fn rollup_transactions(transactions: &[BrokerTransaction], today: &str) -> RealizedRollup {
    let mut by_day: BTreeMap<String, DailyPnl> = BTreeMap::new();
    for txn in transactions {
        let Some(ts) = parse_broker_time(&txn.time) else {
            warn!(time = %txn.time, "Skipping transaction with unparseable timestamp");
            continue;
        };
        if !txn.net_amount.is_finite() {
            continue;
        }
        let bucket = by_day.entry(trading_day(ts)).or_default();
        bucket.pnl_usd += txn.net_amount;
        bucket.trades += 1;
    }

    let week_floor = week_start(today);
    let month_floor = month_start(today);

    let mut rollup = RealizedRollup {
        by_day,
        ..Default::default()
    };
    for (day, bucket) in &rollup.by_day {
        if day.as_str() > today {
            continue;
        }
        if day == today {
            rollup.today_usd += bucket.pnl_usd;
        }
        if let Some(floor) = &week_floor {
            if day.as_str() >= floor.as_str() {
                rollup.wtd_usd += bucket.pnl_usd;
            }
        }
        if let Some(floor) = &month_floor {
            if day.as_str() >= floor.as_str() {
                rollup.mtd_usd += bucket.pnl_usd;
            }
        }
    }
    rollup
}

// ── Engine over the store and the broker feed ───────────────

/// Scoped calendar summary built from local suggestions
#[derive(Debug, Clone, Serialize)]
pub struct PnlSummary {
    pub scope: Scope,
    pub month: Option<String>,
    pub by_day: BTreeMap<String, DailyPnl>,
    pub total_usd: f64,
    pub trades: u32,
}

/// Broker-truth realized result; `ok:false` carries zeroed windows
#[derive(Debug, Clone, Default, Serialize)]
pub struct BrokerRealizedSummary {
    pub ok: bool,
    pub reason: Option<String>,
    pub today_usd: f64,
    pub wtd_usd: f64,
    pub mtd_usd: f64,
    pub by_day: BTreeMap<String, DailyPnl>,
}

pub struct PnlEngine {
    broker: Arc<dyn BrokerApi>,
    store: Arc<SuggestionStore>,
}

impl PnlEngine {
    pub fn new(broker: Arc<dyn BrokerApi>, store: Arc<SuggestionStore>) -> Self {
        Self { broker, store }
    }

    /// Realized P&L from the local suggestion store
    pub fn summary(&self, scope: Scope, month: Option<&str>) -> PnlSummary {
        let suggestions = self.store.load();
        let by_day = realized_by_day(&suggestions, scope, month);
        PnlSummary {
            scope,
            month: month.map(str::to_string),
            total_usd: by_day.values().map(|d| d.pnl_usd).sum(),
            trades: by_day.values().map(|d| d.trades).sum(),
            by_day,
        }
    }

    /// Realized P&L from the broker's transaction history. Fetches back to
    /// the earlier of this week's Monday and the 1st of the month so both
    /// windows are fully covered (the Monday can precede the 1st).
    pub async fn broker_realized(&self) -> BrokerRealizedSummary {
        let today = today_trading_day();
        let floor = match (week_start(&today), month_start(&today)) {
            (Some(week), Some(month)) => week.min(month),
            _ => {
                return BrokerRealizedSummary {
                    reason: Some("bad_reporting_date".to_string()),
                    ..Default::default()
                }
            }
        };
        let Ok(floor_date) = NaiveDate::parse_from_str(&floor, "%Y-%m-%d") else {
            return BrokerRealizedSummary {
                reason: Some("bad_reporting_date".to_string()),
                ..Default::default()
            };
        };
        let Some(floor_midnight) = floor_date.and_hms_opt(0, 0, 0) else {
            return BrokerRealizedSummary {
                reason: Some("bad_reporting_date".to_string()),
                ..Default::default()
            };
        };
        // widen by a day so the reporting-timezone boundary never clips a txn
        let start = floor_midnight.and_utc() - Duration::days(1);

        let transactions = match self.broker.list_transactions(start, Utc::now()).await {
            Ok(transactions) => transactions,
            Err(e) => {
                warn!(error = %e, "Transaction fetch failed, realized rollup unavailable");
                return BrokerRealizedSummary {
                    reason: Some("transactions_unavailable".to_string()),
                    ..Default::default()
                };
            }
        };

        let rollup = rollup_transactions(&transactions, &today);
        BrokerRealizedSummary {
            ok: true,
            reason: None,
            today_usd: rollup.today_usd,
            wtd_usd: rollup.wtd_usd,
            mtd_usd: rollup.mtd_usd,
            by_day: rollup.by_day,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BrokerFill, OptionContract};

    fn equity(entry: f64, closed: f64, shares: Option<f64>) -> TrackedSuggestion {
        let mut s = TrackedSuggestion::new("AAPL", "momentum_scalper", entry, 70.0);
        s.position_shares = shares;
        s.status = SuggestionStatus::Closed;
        s.closed_at = Some(Utc::now());
        s.closed_price = Some(closed);
        s
    }

    fn option(entry: f64, closed: f64) -> TrackedSuggestion {
        let mut s = equity(entry, closed, None);
        s.option_contract = Some(OptionContract {
            symbol: Some("AAPL  240119C00190000".into()),
            strike: 190.0,
            expiration: "2024-01-19".into(),
            dte: Some(30),
            delta: Some(0.45),
            option_type: "CALL".into(),
        });
        s
    }

    #[test]
    fn equity_pnl_round_trip() {
        let s = equity(100.0, 110.0, Some(100.0));
        assert_eq!(compute_realized_pnl_usd(&s), 1000.0);
    }

    #[test]
    fn option_pnl_uses_contracts_times_multiplier() {
        let mut s = option(2.0, 3.0);
        s.position_contracts = Some(5.0);
        s.contract_multiplier = Some(100.0);
        assert_eq!(compute_realized_pnl_usd(&s), 500.0);

        // defaults apply when sizing is absent
        let s = option(2.0, 3.0);
        assert_eq!(compute_realized_pnl_usd(&s), 500.0);
    }

    #[test]
    fn zero_prices_yield_zero_pnl() {
        assert_eq!(compute_realized_pnl_usd(&equity(0.0, 110.0, Some(100.0))), 0.0);
        assert_eq!(compute_realized_pnl_usd(&equity(100.0, 0.0, Some(100.0))), 0.0);
        let mut open = equity(100.0, 110.0, Some(100.0));
        open.closed_price = None;
        assert_eq!(compute_realized_pnl_usd(&open), 0.0);
    }

    #[test]
    fn closed_statuses_include_all_terminals() {
        for status in [
            SuggestionStatus::Closed,
            SuggestionStatus::HitTarget,
            SuggestionStatus::StoppedOut,
            SuggestionStatus::Expired,
            SuggestionStatus::Canceled,
        ] {
            assert!(is_closed_status(status), "{status} should classify closed");
        }
        assert!(!is_closed_status(SuggestionStatus::Active));
    }

    #[test]
    fn late_evening_eastern_close_stays_on_its_calendar_day() {
        // 23:30 Eastern is 04:30 UTC the next day; the bucket must not roll over
        let ts = DateTime::parse_from_rfc3339("2024-01-15T23:30:00-05:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(ts.to_rfc3339(), "2024-01-16T04:30:00+00:00");
        assert_eq!(trading_day(ts), "2024-01-15");
    }

    #[test]
    fn week_and_month_floors() {
        // Wednesday 2024-03-13
        assert_eq!(week_start("2024-03-13").unwrap(), "2024-03-11");
        assert_eq!(month_start("2024-03-13").unwrap(), "2024-03-01");
        // Sunday belongs to the week of the previous Monday
        assert_eq!(week_start("2024-03-17").unwrap(), "2024-03-11");
        // Monday is its own week start
        assert_eq!(week_start("2024-03-11").unwrap(), "2024-03-11");
    }

    #[test]
    fn scope_filters_on_broker_order_id() {
        let mut live = equity(100.0, 110.0, Some(100.0));
        live.broker = Some(BrokerFill {
            order_id: Some("1001".into()),
            ..Default::default()
        });
        let paper = equity(100.0, 105.0, Some(100.0));

        assert!(Scope::Live.includes(&live));
        assert!(Scope::All.includes(&live));
        assert!(!Scope::Paper.includes(&live));

        assert!(!Scope::Live.includes(&paper));
        assert!(Scope::Paper.includes(&paper));
        assert!(Scope::All.includes(&paper));
    }

    #[test]
    fn realized_by_day_buckets_and_month_filter() {
        let mut jan = equity(100.0, 110.0, Some(100.0));
        jan.closed_at = Some(
            DateTime::parse_from_rfc3339("2024-01-15T12:00:00-05:00")
                .unwrap()
                .with_timezone(&Utc),
        );
        let mut feb = equity(50.0, 45.0, Some(100.0));
        feb.closed_at = Some(
            DateTime::parse_from_rfc3339("2024-02-02T12:00:00-05:00")
                .unwrap()
                .with_timezone(&Utc),
        );
        let mut jan_again = equity(10.0, 12.0, Some(100.0));
        jan_again.closed_at = jan.closed_at;

        let all = vec![jan, feb, jan_again];
        let buckets = realized_by_day(&all, Scope::All, None);
        assert_eq!(buckets.len(), 2);
        let day = &buckets["2024-01-15"];
        assert_eq!(day.trades, 2);
        assert_eq!(day.pnl_usd, 1000.0 + 200.0);

        let january = realized_by_day(&all, Scope::All, Some("2024-01"));
        assert_eq!(january.len(), 1);
        assert!(january.contains_key("2024-01-15"));
    }

    #[test]
    fn transaction_rollup_today_wtd_mtd() {
        // reporting "today" = Wednesday 2024-03-13
        let txn = |time: &str, amount: f64| BrokerTransaction {
            transaction_id: None,
            time: time.to_string(),
            net_amount: amount,
            description: None,
        };
        let txns = vec![
            txn("2024-03-13T14:00:00+0000", 250.0),  // today
            txn("2024-03-12T14:00:00+0000", 100.0),  // this week
            txn("2024-03-11T14:00:00+0000", -50.0),  // Monday, this week
            txn("2024-03-08T14:00:00+0000", 500.0),  // last week, this month
            txn("2024-02-28T14:00:00+0000", 999.0),  // last month
            txn("not-a-time", 123.0),                // skipped
        ];
        let rollup = rollup_transactions(&txns, "2024-03-13");
        assert_eq!(rollup.today_usd, 250.0);
        assert_eq!(rollup.wtd_usd, 250.0 + 100.0 - 50.0);
        assert_eq!(rollup.mtd_usd, 250.0 + 100.0 - 50.0 + 500.0);
        assert_eq!(rollup.by_day.len(), 5);
    }

    #[test]
    fn side_aware_pnl() {
        assert_eq!(pnl_usd(Side::Long, 100.0, 110.0, 100.0), 1000.0);
        assert_eq!(pnl_usd(Side::Short, 100.0, 110.0, 100.0), -1000.0);
        assert_eq!(pnl_usd(Side::Short, 100.0, 90.0, 100.0), 1000.0);
    }
}
