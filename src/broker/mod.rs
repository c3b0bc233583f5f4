//! Broker collaborator boundary
//!
//! Abstract contracts for everything the brokerage answers: recent orders,
//! account positions/balances, transaction history and live quotes. The core
//! only ever talks to [`BrokerApi`]; the HTTP client lives in [`schwab`].

pub mod quotes;
pub mod schwab;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Broker identifier stamped on new broker overlays
pub const BROKER_PROVIDER: &str = "SCHWAB";

/// Upstream fetch failures. Data absence (no matching order, no quote for a
/// symbol) is not an error and never surfaces through this type.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("broker returned status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("failed to decode broker response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One order as the broker's order collection reports it
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerOrder {
    pub order_id: String,
    /// Instrument symbol the order collection itself reports (OCC contract
    /// symbol for options, plain ticker for equities)
    pub symbol: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub entered_time: Option<String>,
    #[serde(default)]
    pub close_time: Option<String>,
    #[serde(default)]
    pub filled_quantity: Option<f64>,
    #[serde(default)]
    pub remaining_quantity: Option<f64>,
    #[serde(default)]
    pub average_fill_price: Option<f64>,
}

/// One position from the account snapshot
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerPosition {
    pub symbol: String,
    /// "EQUITY", "OPTION", ...
    pub asset_type: String,
    #[serde(default)]
    pub long_quantity: f64,
    #[serde(default)]
    pub short_quantity: f64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub market_value: f64,
}

impl BrokerPosition {
    /// Net signed quantity (short positions come back negative)
    pub fn net_quantity(&self) -> f64 {
        self.long_quantity - self.short_quantity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountBalances {
    #[serde(default)]
    pub cash_balance: f64,
    #[serde(default)]
    pub buying_power: f64,
    #[serde(default)]
    pub equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountDetails {
    pub positions: Vec<BrokerPosition>,
    pub balances: AccountBalances,
}

/// A realized-P&L-contributing transaction record
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerTransaction {
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Broker timestamp string, parsed with [`parse_broker_time`]
    pub time: String,
    /// Signed cash impact in USD
    pub net_amount: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Live quote for one symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Quote {
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub mark: Option<f64>,
    #[serde(default)]
    pub close_price: Option<f64>,
}

impl Quote {
    /// Best usable mark: last trade, then mark, then prior close; 0.0 when
    /// nothing finite is available.
    pub fn best_mark(&self) -> f64 {
        for candidate in [self.last_price, self.mark, self.close_price] {
            if let Some(px) = candidate {
                if px.is_finite() && px > 0.0 {
                    return px;
                }
            }
        }
        0.0
    }
}

/// Everything the core asks the brokerage. Implementations are bound to one
/// account; per-call account routing is the caller's concern, not the core's.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Orders entered within `[from_time, now]`, capped at `max_results`
    async fn list_orders(
        &self,
        from_time: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// Account snapshot with positions and balances
    async fn get_account_details(&self) -> Result<AccountDetails, BrokerError>;

    /// Transactions within `[start, end]`
    async fn list_transactions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BrokerTransaction>, BrokerError>;

    /// Live quotes keyed by uppercased symbol; symbols the feed does not
    /// know are simply absent from the map
    async fn get_quotes(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, BrokerError>;
}

/// Broker statuses that mean an order has executed, compared
/// case-insensitively.
pub fn is_filled_status(status: &str) -> bool {
    matches!(
        status.to_uppercase().as_str(),
        "FILLED" | "EXECUTED" | "COMPLETED"
    )
}

/// Parse a broker timestamp. Schwab emits `%z` offsets without the colon
/// RFC 3339 requires, so try both shapes.
pub fn parse_broker_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.3f%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    None
}
