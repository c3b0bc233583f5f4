//! Schwabot runner
//!
//! The scheduler around the core: reconcile tracked suggestions against
//! broker truth on an interval and log the resulting P&L / risk picture.
//! Strategy signal generation and order placement live elsewhere.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use schwabot::broker::quotes::QuoteCache;
use schwabot::broker::schwab::SchwabClient;
use schwabot::broker::BrokerApi;
use schwabot::config::AppConfig;
use schwabot::pnl::{PnlEngine, Scope};
use schwabot::reconcile::OrderReconciler;
use schwabot::risk::RiskEngine;
use schwabot::store::{SuggestionStore, TradeLog};

/// Ticks between broker-truth (positions + realized) reports
const BROKER_REPORT_EVERY: u64 = 12;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/schwabot".to_string());
    let cfg = AppConfig::load(&config_path)?;
    if cfg.broker.account_hash.is_empty() || cfg.broker.access_token.is_empty() {
        anyhow::bail!(
            "broker.account_hash and broker.access_token must be configured \
             (file or SCHWABOT__BROKER__* env)"
        );
    }

    let broker: Arc<dyn BrokerApi> = Arc::new(SchwabClient::new(
        cfg.broker.base_url.as_deref(),
        &cfg.broker.account_hash,
        &cfg.broker.access_token,
        cfg.broker.request_timeout_secs,
    ));
    let store = Arc::new(SuggestionStore::new(&cfg.store.suggestions_path));
    let trade_log = TradeLog::new(&cfg.store.trade_log_path, cfg.store.strict_trade_log);

    let reconciler = OrderReconciler::new(broker.clone(), store.clone())
        .with_account_hash(&cfg.broker.account_hash)
        .with_trade_log(trade_log);
    let pnl = PnlEngine::new(broker.clone(), store.clone());
    let risk = RiskEngine::new(
        broker.clone(),
        store.clone(),
        QuoteCache::new(cfg.quotes.cache_ttl_ms),
    );

    info!(
        store = %cfg.store.suggestions_path,
        tick_secs = cfg.reconcile.tick_interval_secs,
        lookback_days = cfg.reconcile.lookback_days,
        "🚀 Schwabot reconciler started"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(
        cfg.reconcile.tick_interval_secs.max(1),
    ));
    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick += 1;

                let report = reconciler
                    .reconcile(cfg.reconcile.lookback_days, cfg.reconcile.max_results)
                    .await;
                if !report.ok {
                    warn!(errors = ?report.errors, "Reconcile tick failed");
                }

                if report.updated > 0 {
                    let summary = pnl.summary(Scope::All, None);
                    info!(
                        total_usd = format!("{:.2}", summary.total_usd),
                        trades = summary.trades,
                        "Realized P&L from tracked suggestions"
                    );
                }

                let open = risk.suggestion_summary().await;
                if open.ok {
                    info!(
                        open = open.rows.len(),
                        notional_usd = format!("{:.2}", open.total_notional_usd),
                        unrealized_usd = format!("{:.2}", open.total_unrealized_usd),
                        realized_today_usd = format!("{:.2}", open.realized_today_usd),
                        "Open suggestion risk"
                    );
                } else {
                    warn!(reason = ?open.reason, "Risk summary unavailable");
                }

                if tick % BROKER_REPORT_EVERY == 1 {
                    let positions = risk.broker_positions_summary().await;
                    if positions.ok {
                        info!(
                            positions = positions.rows.len(),
                            market_value_usd = format!("{:.2}", positions.total_market_value_usd),
                            unrealized_usd = format!("{:.2}", positions.total_unrealized_usd),
                            equity = format!("{:.2}", positions.balances.equity),
                            "Broker positions"
                        );
                    } else {
                        warn!(reason = ?positions.reason, "Broker positions unavailable");
                    }

                    let realized = pnl.broker_realized().await;
                    if realized.ok {
                        info!(
                            today_usd = format!("{:.2}", realized.today_usd),
                            wtd_usd = format!("{:.2}", realized.wtd_usd),
                            mtd_usd = format!("{:.2}", realized.mtd_usd),
                            "Broker realized P&L"
                        );
                    } else {
                        warn!(reason = ?realized.reason, "Broker realized P&L unavailable");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    Ok(())
}
