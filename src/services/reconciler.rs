//! Gap detection and fetch-and-store reconciliation
//!
//! The reconciler decides which (ticker, date) pairs are missing from the
//! store, fetches exactly those from the upstream API, and persists them.
//! Presence rows are its source of truth: a date marked present is never
//! re-fetched.

use crate::db::models::TickKind;
use crate::error::{AppError, Result};
use crate::services::calendar;
use crate::state::AppState;
use chrono::NaiveDate;
use std::time::Instant;

/// Exchange code for a ticker, fetching and storing its metadata on first
/// sight. Memoized for the process lifetime.
pub async fn exchange_for_ticker(state: &AppState, symbol: &str) -> Result<String> {
    if let Some(exchange) = state.exchange_memo.get(&symbol.to_string()) {
        return Ok(exchange);
    }

    let details = match state.db.ticker_details(symbol)? {
        Some(details) => details,
        None => {
            let details = state.api.ticker_details(symbol).await?;
            state.db.store_ticker_details(&details)?;
            details
        }
    };

    state
        .exchange_memo
        .insert(symbol.to_string(), details.exchange.clone());
    Ok(details.exchange)
}

/// Dates in the range that are open but not yet stored.
async fn missing_dates(
    state: &AppState,
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
    kind: TickKind,
) -> Result<Vec<NaiveDate>> {
    let exchange = exchange_for_ticker(state, symbol).await?;
    let open = calendar::open_dates(state, &exchange, from, to, false)?;
    let stored = state.db.stored_dates(kind, symbol)?;
    Ok(open.iter().copied().filter(|d| !stored.contains(d)).collect())
}

/// Fetch and store every missing open date in the range, in ascending
/// order. Returns how many days were fetched.
///
/// The first failure — network, pagination, or storage — aborts the whole
/// request: partial completion of a range is a hard error, never a partial
/// success. Dates stored before the failure keep their presence rows, so a
/// retried request resumes after them.
pub async fn download_ticks(
    state: &AppState,
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
    kind: TickKind,
) -> Result<usize> {
    let missing = missing_dates(state, symbol, from, to, kind).await?;

    if missing.is_empty() {
        tracing::info!(
            "All day(s) of {} {} from {} to {} are already stored",
            symbol,
            kind.table_name(),
            from,
            to
        );
        return Ok(0);
    }

    tracing::info!(
        "Fetching {} day(s) of {} {}",
        missing.len(),
        symbol,
        kind.table_name()
    );

    for date in &missing {
        fetch_and_store_day(state, symbol, *date, kind)
            .await
            .map_err(|e| AppError::Ingest {
                symbol: symbol.to_string(),
                kind: kind.table_name(),
                date: *date,
                source: Box::new(e),
            })?;
    }

    Ok(missing.len())
}

async fn fetch_and_store_day(
    state: &AppState,
    symbol: &str,
    date: NaiveDate,
    kind: TickKind,
) -> Result<()> {
    let fetch_started = Instant::now();
    let store_started;
    match kind {
        TickKind::Trades => {
            let records = state.api.daily_trades(symbol, date).await?;
            store_started = Instant::now();
            state.db.write_trades(symbol, date, &records)?;
        }
        TickKind::Quotes => {
            let records = state.api.daily_quotes(symbol, date).await?;
            store_started = Instant::now();
            state.db.write_quotes(symbol, date, &records)?;
        }
    }

    tracing::info!(
        "{} {} - fetch: {}s, store: {}s",
        symbol,
        date,
        fetch_started.elapsed().as_secs(),
        store_started.elapsed().as_secs()
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::client::tests::fast_test_config;
    use crate::api::client::{HttpTransport, RawResponse};
    use crate::config::Config;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Fake upstream: serves company metadata and per-date tick pages, and
    /// records every request path.
    pub(crate) struct FakeUpstream {
        pub requests: Mutex<Vec<String>>,
        /// Dates with no canned data still serve an empty page.
        pub trades_per_day: usize,
    }

    impl FakeUpstream {
        pub fn new(trades_per_day: usize) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                trades_per_day,
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }

        pub fn day_fetches(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .filter(|url| url.contains("/v2/ticks/"))
                .cloned()
                .collect()
        }

        fn trades_body(&self, date: &str) -> String {
            // Noon exchange time keeps each tick inside its trading day.
            let base = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .unwrap()
                .and_hms_opt(17, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp_nanos_opt()
                .unwrap();
            let results: Vec<String> = (0..self.trades_per_day)
                .map(|i| {
                    format!(
                        r#"{{"t": {}, "p": {}, "s": {}}}"#,
                        base + (i as i64) * 1_000_000_000,
                        100.0 + i as f64,
                        10 + i
                    )
                })
                .collect();
            format!(
                r#"{{"results": [{}], "results_count": {}}}"#,
                results.join(","),
                self.trades_per_day
            )
        }
    }

    #[async_trait]
    impl HttpTransport for FakeUpstream {
        async fn get(&self, url: &str, _params: &[(String, String)]) -> Result<RawResponse> {
            self.requests.lock().push(url.to_string());

            let body = if url.contains("/v1/meta/symbols/") {
                r#"{
                    "symbol": "X",
                    "name": "X Corp",
                    "sector": "Test",
                    "exchangeSymbol": "NYE",
                    "success": true
                }"#
                .to_string()
            } else if url.contains("/v2/ticks/stocks/trades/") {
                let date = url.rsplit('/').next().unwrap_or_default();
                self.trades_body(date)
            } else if url.contains("/v2/ticks/stocks/nbbo/") {
                r#"{"results": [], "results_count": 0}"#.to_string()
            } else {
                r#"{"success": false}"#.to_string()
            };

            Ok(RawResponse { status: 200, body })
        }
    }

    pub(crate) fn test_state(upstream: Arc<FakeUpstream>) -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            database_path: dir.path().join("test.db"),
            data_dir: dir.path().to_path_buf(),
            ..fast_test_config()
        };
        let state = AppState::with_transport(config, upstream).unwrap();
        (dir, state)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_gap_diffing_skips_stored_dates() {
        let upstream = Arc::new(FakeUpstream::new(2));
        let (_dir, state) = test_state(upstream.clone());

        // Pre-store Wednesday; Mon, Tue, Thu, Fri remain missing.
        exchange_for_ticker(&state, "X").await.unwrap();
        state.db.write_trades("X", date(2021, 1, 6), &[]).unwrap();

        let missing = missing_dates(&state, "X", date(2021, 1, 4), date(2021, 1, 8), TickKind::Trades)
            .await
            .unwrap();
        assert_eq!(
            missing,
            vec![date(2021, 1, 4), date(2021, 1, 5), date(2021, 1, 7), date(2021, 1, 8)]
        );
    }

    #[tokio::test]
    async fn test_download_fetches_in_ascending_order() {
        let upstream = Arc::new(FakeUpstream::new(1));
        let (_dir, state) = test_state(upstream.clone());

        let fetched = download_ticks(&state, "X", date(2021, 1, 4), date(2021, 1, 8), TickKind::Trades)
            .await
            .unwrap();
        assert_eq!(fetched, 5);

        let days = upstream.day_fetches();
        assert_eq!(days.len(), 5);
        assert!(days[0].ends_with("2021-01-04"));
        assert!(days[4].ends_with("2021-01-08"));

        let stored = state.db.stored_dates(TickKind::Trades, "X").unwrap();
        assert_eq!(stored.len(), 5);
    }

    #[tokio::test]
    async fn test_download_is_idempotent() {
        let upstream = Arc::new(FakeUpstream::new(1));
        let (_dir, state) = test_state(upstream.clone());

        download_ticks(&state, "X", date(2021, 1, 4), date(2021, 1, 8), TickKind::Trades)
            .await
            .unwrap();
        let after_first = upstream.request_count();

        // Second pass over the same range: nothing missing, zero requests.
        let fetched = download_ticks(&state, "X", date(2021, 1, 4), date(2021, 1, 8), TickKind::Trades)
            .await
            .unwrap();
        assert_eq!(fetched, 0);
        assert_eq!(upstream.request_count(), after_first);
    }

    #[tokio::test]
    async fn test_trades_and_quotes_reconcile_independently() {
        let upstream = Arc::new(FakeUpstream::new(1));
        let (_dir, state) = test_state(upstream.clone());

        download_ticks(&state, "X", date(2021, 1, 4), date(2021, 1, 4), TickKind::Trades)
            .await
            .unwrap();
        let fetched = download_ticks(&state, "X", date(2021, 1, 4), date(2021, 1, 4), TickKind::Quotes)
            .await
            .unwrap();
        assert_eq!(fetched, 1);
        assert!(state.db.stored_dates(TickKind::Quotes, "X").unwrap().contains(&date(2021, 1, 4)));
    }

    #[tokio::test]
    async fn test_failure_aborts_range_and_names_the_date() {
        /// Upstream that fails every tick request for one specific date.
        struct FlakyUpstream {
            inner: FakeUpstream,
            bad_date: &'static str,
        }

        #[async_trait]
        impl HttpTransport for FlakyUpstream {
            async fn get(&self, url: &str, params: &[(String, String)]) -> Result<RawResponse> {
                if url.contains("/v2/ticks/") && url.ends_with(self.bad_date) {
                    self.inner.requests.lock().push(url.to_string());
                    return Ok(RawResponse { status: 500, body: String::new() });
                }
                self.inner.get(url, params).await
            }
        }

        let upstream = Arc::new(FlakyUpstream {
            inner: FakeUpstream::new(1),
            bad_date: "2021-01-06",
        });
        let dir = TempDir::new().unwrap();
        let config = Config {
            database_path: dir.path().join("test.db"),
            ..fast_test_config()
        };
        let state = AppState::with_transport(config, upstream).unwrap();

        let result =
            download_ticks(&state, "X", date(2021, 1, 4), date(2021, 1, 8), TickKind::Trades).await;

        match result {
            Err(AppError::Ingest { symbol, date: failed, .. }) => {
                assert_eq!(symbol, "X");
                assert_eq!(failed, date(2021, 1, 6));
            }
            other => panic!("expected Ingest error, got {:?}", other.map(|_| ())),
        }

        // Days before the failure are durable; the failed day and the days
        // after it were not marked present.
        let stored = state.db.stored_dates(TickKind::Trades, "X").unwrap();
        assert!(stored.contains(&date(2021, 1, 4)));
        assert!(stored.contains(&date(2021, 1, 5)));
        assert!(!stored.contains(&date(2021, 1, 6)));
        assert!(!stored.contains(&date(2021, 1, 7)));
        assert!(!stored.contains(&date(2021, 1, 8)));
    }
}
