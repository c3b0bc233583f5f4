//! Core types used throughout Schwabot
//!
//! Defines the tracked suggestion entity, its broker-truth overlay and the
//! small enums shared by the store, reconciler and reporting layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a tracked suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    Active,
    HitTarget,
    StoppedOut,
    Closed,
    Expired,
    Canceled,
}

impl Default for SuggestionStatus {
    fn default() -> Self {
        SuggestionStatus::Active
    }
}

impl SuggestionStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(SuggestionStatus::Active),
            "HIT_TARGET" => Some(SuggestionStatus::HitTarget),
            "STOPPED_OUT" => Some(SuggestionStatus::StoppedOut),
            "CLOSED" => Some(SuggestionStatus::Closed),
            "EXPIRED" => Some(SuggestionStatus::Expired),
            "CANCELED" | "CANCELLED" => Some(SuggestionStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestionStatus::Active => write!(f, "ACTIVE"),
            SuggestionStatus::HitTarget => write!(f, "HIT_TARGET"),
            SuggestionStatus::StoppedOut => write!(f, "STOPPED_OUT"),
            SuggestionStatus::Closed => write!(f, "CLOSED"),
            SuggestionStatus::Expired => write!(f, "EXPIRED"),
            SuggestionStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Originating signal action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" | "BUY_TO_OPEN" => Some(TradeAction::Buy),
            "SELL" | "SELL_SHORT" | "SELL_TO_OPEN" => Some(TradeAction::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Option contract details attached to an option suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OptionContract {
    /// OCC contract symbol as the broker reports it (e.g. "AAPL  240119C00190000").
    /// Order matching uses this, never the underlying ticker.
    #[serde(default)]
    pub symbol: Option<String>,
    pub strike: f64,
    /// Expiration date, YYYY-MM-DD
    pub expiration: String,
    #[serde(default)]
    pub dte: Option<i64>,
    #[serde(default)]
    pub delta: Option<f64>,
    /// "CALL" or "PUT"
    pub option_type: String,
}

/// Order ids (and the originating signal action) captured at emission time,
/// before the broker overlay exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EvidencePacket {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub exit_order_id: Option<String>,
    #[serde(default)]
    pub action: Option<TradeAction>,
}

/// Broker-truth overlay for a suggestion.
///
/// Every field mirrors what the brokerage reported; statuses and times stay
/// raw strings. `merge` is additive only: an absent incoming field never
/// clears a previously known value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BrokerFill {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub account_hash: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub exit_order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub exit_status: Option<String>,
    #[serde(default)]
    pub entered_time: Option<String>,
    #[serde(default)]
    pub close_time: Option<String>,
    #[serde(default)]
    pub exit_close_time: Option<String>,
    #[serde(default)]
    pub filled_quantity: Option<f64>,
    #[serde(default)]
    pub remaining_quantity: Option<f64>,
    #[serde(default)]
    pub exit_filled_quantity: Option<f64>,
    #[serde(default)]
    pub exit_remaining_quantity: Option<f64>,
    #[serde(default)]
    pub average_fill_price: Option<f64>,
    #[serde(default)]
    pub exit_average_fill_price: Option<f64>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl BrokerFill {
    /// Additive merge: copy every `Some` field from `overlay` onto `self`.
    /// `last_update` is bumped by the caller once it knows whether the
    /// record actually changed.
    pub fn merge(&mut self, overlay: &BrokerFill) {
        macro_rules! take_some {
            ($field:ident) => {
                if overlay.$field.is_some() {
                    self.$field = overlay.$field.clone();
                }
            };
        }
        take_some!(provider);
        take_some!(account_hash);
        take_some!(order_id);
        take_some!(exit_order_id);
        take_some!(status);
        take_some!(exit_status);
        take_some!(entered_time);
        take_some!(close_time);
        take_some!(exit_close_time);
        take_some!(filled_quantity);
        take_some!(remaining_quantity);
        take_some!(exit_filled_quantity);
        take_some!(exit_remaining_quantity);
        take_some!(average_fill_price);
        take_some!(exit_average_fill_price);
        take_some!(last_update);
    }
}

/// One tracked trade idea/position, paper or broker-confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSuggestion {
    /// Opaque stable key, unique within the store
    pub id: String,
    pub ticker: String,
    /// Strategy name that emitted the suggestion (e.g. "momentum_scalper")
    pub strategy: String,
    #[serde(default)]
    pub setup: Option<String>,
    #[serde(default)]
    pub regime: Option<String>,
    pub entry_price: f64,
    /// Equity sizing; P&L defaults this to 100 shares when absent
    #[serde(default)]
    pub position_shares: Option<f64>,
    /// Option sizing; P&L defaults to 5 contracts when absent
    #[serde(default)]
    pub position_contracts: Option<f64>,
    /// Per-contract share equivalent; P&L defaults to 100 when absent
    #[serde(default)]
    pub contract_multiplier: Option<f64>,
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    /// 0-100
    pub confidence: f64,
    #[serde(default)]
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present iff `closed_price` is present
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_price: Option<f64>,
    #[serde(default)]
    pub option_contract: Option<OptionContract>,
    #[serde(default)]
    pub broker: Option<BrokerFill>,
    #[serde(default)]
    pub evidence: Option<EvidencePacket>,
}

impl TrackedSuggestion {
    /// New ACTIVE suggestion with a fresh id and timestamps
    pub fn new(ticker: &str, strategy: &str, entry_price: f64, confidence: f64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            strategy: strategy.to_string(),
            setup: None,
            regime: None,
            entry_price,
            position_shares: None,
            position_contracts: None,
            contract_multiplier: None,
            target_price: None,
            stop_loss: None,
            confidence,
            status: SuggestionStatus::Active,
            created_at: now,
            updated_at: now,
            closed_at: None,
            closed_price: None,
            option_contract: None,
            broker: None,
            evidence: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SuggestionStatus::Active
    }

    /// Entry order id: broker overlay first, evidence packet as fallback
    pub fn entry_order_id(&self) -> Option<&str> {
        self.broker
            .as_ref()
            .and_then(|b| b.order_id.as_deref())
            .or_else(|| self.evidence.as_ref().and_then(|e| e.order_id.as_deref()))
    }

    /// Exit order id: broker overlay first, evidence packet as fallback
    pub fn exit_order_id(&self) -> Option<&str> {
        self.broker
            .as_ref()
            .and_then(|b| b.exit_order_id.as_deref())
            .or_else(|| {
                self.evidence
                    .as_ref()
                    .and_then(|e| e.exit_order_id.as_deref())
            })
    }

    /// Symbol the broker's order collection reports for this instrument.
    ///
    /// An equity ticker and its option contract are different broker-side
    /// symbols; an option suggestion must match on the contract symbol.
    pub fn instrument_symbol(&self) -> String {
        self.option_contract
            .as_ref()
            .and_then(|c| c.symbol.as_deref())
            .unwrap_or(&self.ticker)
            .to_uppercase()
    }

    /// Originating signal action, when the emitter recorded one
    pub fn signal_action(&self) -> Option<TradeAction> {
        self.evidence.as_ref().and_then(|e| e.action)
    }
}
