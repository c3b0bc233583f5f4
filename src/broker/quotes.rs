//! Short-lived quote cache
//!
//! Bounds upstream quote volume when summaries fan out across many symbols.
//! The staleness window bounds, but does not eliminate, duplicate fetches;
//! the cache is advisory and never a source of truth.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::{BrokerApi, BrokerError, Quote};

pub const DEFAULT_QUOTE_TTL_MS: i64 = 15_000;

struct CachedQuote {
    fetched_at_ms: i64,
    quote: Quote,
}

pub struct QuoteCache {
    ttl_ms: i64,
    entries: RwLock<HashMap<String, CachedQuote>>,
}

impl QuoteCache {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms: ttl_ms.max(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Quotes for `symbols`, hitting the broker only for symbols missing or
    /// older than the TTL. Symbols the feed does not know stay absent from
    /// the result; callers degrade those marks individually.
    pub async fn get_many(
        &self,
        broker: &dyn BrokerApi,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, BrokerError> {
        let now_ms = Utc::now().timestamp_millis();
        let wanted: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();

        let mut result = HashMap::new();
        let mut stale: Vec<String> = Vec::new();
        {
            let entries = self.entries.read().unwrap();
            for sym in &wanted {
                match entries.get(sym) {
                    Some(cached) if now_ms - cached.fetched_at_ms < self.ttl_ms => {
                        result.insert(sym.clone(), cached.quote);
                    }
                    _ => stale.push(sym.clone()),
                }
            }
        }

        if !stale.is_empty() {
            debug!(fresh = result.len(), fetching = stale.len(), "quote cache refresh");
            let fetched = broker.get_quotes(&stale).await?;
            let mut entries = self.entries.write().unwrap();
            for (sym, quote) in fetched {
                let sym = sym.to_uppercase();
                entries.insert(
                    sym.clone(),
                    CachedQuote {
                        fetched_at_ms: now_ms,
                        quote,
                    },
                );
                result.insert(sym, quote);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBroker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BrokerApi for CountingBroker {
        async fn list_orders(
            &self,
            _from_time: DateTime<Utc>,
            _max_results: u32,
        ) -> Result<Vec<super::super::BrokerOrder>, BrokerError> {
            Ok(Vec::new())
        }

        async fn get_account_details(
            &self,
        ) -> Result<super::super::AccountDetails, BrokerError> {
            Ok(Default::default())
        }

        async fn list_transactions(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<super::super::BrokerTransaction>, BrokerError> {
            Ok(Vec::new())
        }

        async fn get_quotes(
            &self,
            symbols: &[String],
        ) -> Result<HashMap<String, Quote>, BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(symbols
                .iter()
                .map(|s| {
                    (
                        s.clone(),
                        Quote {
                            last_price: Some(100.0),
                            mark: None,
                            close_price: None,
                        },
                    )
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn second_lookup_within_ttl_hits_cache() {
        let broker = CountingBroker {
            calls: AtomicUsize::new(0),
        };
        let cache = QuoteCache::new(DEFAULT_QUOTE_TTL_MS);
        let symbols = vec!["aapl".to_string(), "MSFT".to_string()];

        let first = cache.get_many(&broker, &symbols).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.contains_key("AAPL"));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);

        let second = cache.get_many(&broker, &symbols).await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_always_refetches() {
        let broker = CountingBroker {
            calls: AtomicUsize::new(0),
        };
        let cache = QuoteCache::new(0);
        let symbols = vec!["SPY".to_string()];

        cache.get_many(&broker, &symbols).await.unwrap();
        cache.get_many(&broker, &symbols).await.unwrap();
        assert_eq!(broker.calls.load(Ordering::SeqCst), 2);
    }
}
