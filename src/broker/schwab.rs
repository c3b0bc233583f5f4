//! Schwab REST client
//!
//! Thin HTTP layer over the Trader and Market Data APIs. Token acquisition
//! and refresh happen outside this process; the client carries an
//! already-issued bearer token and is bound to a single account hash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{
    AccountBalances, AccountDetails, BrokerApi, BrokerError, BrokerOrder, BrokerPosition,
    BrokerTransaction, Quote,
};

const DEFAULT_TRADER_URL: &str = "https://api.schwabapi.com/trader/v1";
const DEFAULT_MARKET_DATA_URL: &str = "https://api.schwabapi.com/marketdata/v1";

pub struct SchwabClient {
    client: Client,
    trader_url: String,
    market_data_url: String,
    account_hash: String,
    access_token: String,
}

impl SchwabClient {
    pub fn new(
        base_url: Option<&str>,
        account_hash: &str,
        access_token: &str,
        timeout_secs: u64,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        let (trader_url, market_data_url) = match base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                (format!("{}/trader/v1", base), format!("{}/marketdata/v1", base))
            }
            None => (
                DEFAULT_TRADER_URL.to_string(),
                DEFAULT_MARKET_DATA_URL.to_string(),
            ),
        };

        Self {
            client,
            trader_url,
            market_data_url,
            account_hash: account_hash.to_string(),
            access_token: access_token.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, BrokerError> {
        debug!(url, "schwab GET");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn fmt_query_time(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

// ── Wire shapes ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrder {
    order_id: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    entered_time: Option<String>,
    #[serde(default)]
    close_time: Option<String>,
    #[serde(default)]
    filled_quantity: Option<f64>,
    #[serde(default)]
    remaining_quantity: Option<f64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    order_leg_collection: Vec<WireOrderLeg>,
    #[serde(default)]
    order_activity_collection: Vec<WireOrderActivity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrderLeg {
    #[serde(default)]
    instrument: WireInstrument,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstrument {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    asset_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrderActivity {
    #[serde(default)]
    execution_legs: Vec<WireExecutionLeg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExecutionLeg {
    #[serde(default)]
    quantity: f64,
    #[serde(default)]
    price: f64,
}

impl WireOrder {
    /// Quantity-weighted execution price, falling back to the order's limit
    /// price when no executions are reported yet.
    fn average_fill_price(&self) -> Option<f64> {
        let mut qty = 0.0;
        let mut notional = 0.0;
        for activity in &self.order_activity_collection {
            for leg in &activity.execution_legs {
                qty += leg.quantity;
                notional += leg.quantity * leg.price;
            }
        }
        if qty > 0.0 {
            Some(notional / qty)
        } else {
            self.price
        }
    }

    fn into_order(self) -> BrokerOrder {
        let average_fill_price = self.average_fill_price();
        let symbol = self
            .order_leg_collection
            .first()
            .map(|leg| leg.instrument.symbol.clone())
            .unwrap_or_default();
        BrokerOrder {
            order_id: self.order_id.to_string(),
            symbol,
            status: self.status,
            entered_time: self.entered_time,
            close_time: self.close_time,
            filled_quantity: self.filled_quantity,
            remaining_quantity: self.remaining_quantity,
            average_fill_price,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAccount {
    securities_account: WireSecuritiesAccount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSecuritiesAccount {
    #[serde(default)]
    positions: Vec<WirePosition>,
    #[serde(default)]
    current_balances: WireBalances,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePosition {
    #[serde(default)]
    instrument: WireInstrument,
    #[serde(default)]
    long_quantity: f64,
    #[serde(default)]
    short_quantity: f64,
    #[serde(default)]
    average_price: f64,
    #[serde(default)]
    market_value: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBalances {
    #[serde(default)]
    cash_balance: f64,
    #[serde(default)]
    buying_power: f64,
    #[serde(default)]
    equity: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    #[serde(default)]
    activity_id: Option<i64>,
    #[serde(default)]
    time: String,
    #[serde(default)]
    net_amount: f64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuoteEnvelope {
    #[serde(default)]
    quote: WireQuote,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuote {
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    mark: Option<f64>,
    #[serde(default)]
    close_price: Option<f64>,
}

// ── BrokerApi implementation ────────────────────────────────

#[async_trait]
impl BrokerApi for SchwabClient {
    async fn list_orders(
        &self,
        from_time: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        let url = format!("{}/accounts/{}/orders", self.trader_url, self.account_hash);
        let orders: Vec<WireOrder> = self
            .get_json(
                &url,
                &[
                    ("fromEnteredTime", Self::fmt_query_time(from_time)),
                    ("toEnteredTime", Self::fmt_query_time(Utc::now())),
                    ("maxResults", max_results.to_string()),
                ],
            )
            .await?;
        Ok(orders.into_iter().map(WireOrder::into_order).collect())
    }

    async fn get_account_details(&self) -> Result<AccountDetails, BrokerError> {
        let url = format!("{}/accounts/{}", self.trader_url, self.account_hash);
        let account: WireAccount = self
            .get_json(&url, &[("fields", "positions".to_string())])
            .await?;

        let sa = account.securities_account;
        Ok(AccountDetails {
            positions: sa
                .positions
                .into_iter()
                .map(|p| BrokerPosition {
                    symbol: p.instrument.symbol,
                    asset_type: p.instrument.asset_type,
                    long_quantity: p.long_quantity,
                    short_quantity: p.short_quantity,
                    average_price: p.average_price,
                    market_value: p.market_value,
                })
                .collect(),
            balances: AccountBalances {
                cash_balance: sa.current_balances.cash_balance,
                buying_power: sa.current_balances.buying_power,
                equity: sa.current_balances.equity,
            },
        })
    }

    async fn list_transactions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BrokerTransaction>, BrokerError> {
        let url = format!(
            "{}/accounts/{}/transactions",
            self.trader_url, self.account_hash
        );
        let txns: Vec<WireTransaction> = self
            .get_json(
                &url,
                &[
                    ("startDate", Self::fmt_query_time(start)),
                    ("endDate", Self::fmt_query_time(end)),
                    ("types", "TRADE".to_string()),
                ],
            )
            .await?;
        Ok(txns
            .into_iter()
            .map(|t| BrokerTransaction {
                transaction_id: t.activity_id.map(|id| id.to_string()),
                time: t.time,
                net_amount: t.net_amount,
                description: t.description,
            })
            .collect())
    }

    async fn get_quotes(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, BrokerError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let url = format!("{}/quotes", self.market_data_url);
        let envelopes: HashMap<String, WireQuoteEnvelope> = self
            .get_json(&url, &[("symbols", symbols.join(","))])
            .await?;
        Ok(envelopes
            .into_iter()
            .map(|(symbol, env)| {
                (
                    symbol.to_uppercase(),
                    Quote {
                        last_price: env.quote.last_price,
                        mark: env.quote.mark,
                        close_price: env.quote.close_price,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_order_flattens_symbol_and_fill_price() {
        let raw = r#"{
            "orderId": 456789,
            "status": "FILLED",
            "enteredTime": "2024-01-15T14:30:00+0000",
            "closeTime": "2024-01-15T15:01:00+0000",
            "filledQuantity": 100.0,
            "remainingQuantity": 0.0,
            "orderLegCollection": [
                {"instrument": {"symbol": "AAPL", "assetType": "EQUITY"}}
            ],
            "orderActivityCollection": [
                {"executionLegs": [
                    {"quantity": 60.0, "price": 190.0},
                    {"quantity": 40.0, "price": 191.0}
                ]}
            ]
        }"#;
        let wire: WireOrder = serde_json::from_str(raw).unwrap();
        let order = wire.into_order();
        assert_eq!(order.order_id, "456789");
        assert_eq!(order.symbol, "AAPL");
        assert_eq!(order.status.as_deref(), Some("FILLED"));
        let avg = order.average_fill_price.unwrap();
        assert!((avg - 190.4).abs() < 1e-9);
    }

    #[test]
    fn wire_order_without_executions_falls_back_to_limit_price() {
        let raw = r#"{
            "orderId": 1,
            "status": "WORKING",
            "price": 55.5,
            "orderLegCollection": [
                {"instrument": {"symbol": "XYZ", "assetType": "EQUITY"}}
            ]
        }"#;
        let wire: WireOrder = serde_json::from_str(raw).unwrap();
        assert_eq!(wire.average_fill_price(), Some(55.5));
    }

    #[test]
    fn wire_account_decodes_positions_and_balances() {
        let raw = r#"{
            "securitiesAccount": {
                "positions": [
                    {
                        "instrument": {"symbol": "MSFT", "assetType": "EQUITY"},
                        "longQuantity": 50.0,
                        "shortQuantity": 0.0,
                        "averagePrice": 400.0,
                        "marketValue": 20500.0
                    }
                ],
                "currentBalances": {
                    "cashBalance": 1200.0,
                    "buyingPower": 2400.0,
                    "equity": 21700.0
                }
            }
        }"#;
        let account: WireAccount = serde_json::from_str(raw).unwrap();
        let sa = account.securities_account;
        assert_eq!(sa.positions.len(), 1);
        assert_eq!(sa.positions[0].instrument.symbol, "MSFT");
        assert_eq!(sa.current_balances.equity, 21700.0);
    }
}
