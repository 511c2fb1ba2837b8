//! Consumer-facing accessors
//!
//! Pure functions of the reconciled, stored data: ranges of trades and
//! quotes, per-second bar aggregates, and trading hours. Every accessor
//! reconciles first and then reads back from durable storage, so repeated
//! calls are idempotent and the returned view is always store-backed.

use crate::db::models::{QuoteRow, TickKind, TradeRow};
use crate::error::Result;
use crate::services::calendar::{self, TradingSession};
use crate::services::reconciler;
use crate::state::AppState;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::collections::HashMap;
use std::sync::Arc;

/// All trades for a ticker over a date range, in time order.
///
/// Missing open dates are fetched and stored first; the result is the
/// concatenation of the stored days and is cached in a bounded LRU.
pub async fn get_trades(
    state: &AppState,
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Arc<Vec<TradeRow>>> {
    let key = (symbol.to_string(), from, to);
    if let Some(hit) = state.trades_cache.get(&key) {
        return Ok(hit);
    }

    reconciler::download_ticks(state, symbol, from, to, TickKind::Trades).await?;

    let exchange = reconciler::exchange_for_ticker(state, symbol).await?;
    let tz = calendar::exchange_timezone(&exchange);
    let open = calendar::open_dates(state, &exchange, from, to, false)?;
    if open.is_empty() {
        tracing::info!("There are no trades for the selected date(s)");
    }

    let mut rows = Vec::new();
    for date in open.iter() {
        rows.extend(state.db.read_trades(symbol, *date, tz)?);
    }

    let rows = Arc::new(rows);
    state.trades_cache.insert(key, rows.clone());
    Ok(rows)
}

/// All quotes for a ticker over a date range, in time order. The derived
/// spread is available on each row.
pub async fn get_quotes(
    state: &AppState,
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Arc<Vec<QuoteRow>>> {
    let key = (symbol.to_string(), from, to);
    if let Some(hit) = state.quotes_cache.get(&key) {
        return Ok(hit);
    }

    reconciler::download_ticks(state, symbol, from, to, TickKind::Quotes).await?;

    let exchange = reconciler::exchange_for_ticker(state, symbol).await?;
    let tz = calendar::exchange_timezone(&exchange);
    let open = calendar::open_dates(state, &exchange, from, to, false)?;

    let mut rows = Vec::new();
    for date in open.iter() {
        rows.extend(state.db.read_quotes(symbol, *date, tz)?);
    }

    let rows = Arc::new(rows);
    state.quotes_cache.insert(key, rows.clone());
    Ok(rows)
}

/// Trading session (open/close) for a ticker's exchange on one date.
pub async fn get_trading_hours(
    state: &AppState,
    symbol: &str,
    date: NaiveDate,
) -> Result<TradingSession> {
    let exchange = reconciler::exchange_for_ticker(state, symbol).await?;
    calendar::trading_session(state, &exchange, date)
}

/// How tick price and volume collapse into a per-second bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarAggregation {
    Mean,
    /// Volume-weighted price. Volume has no weighted mean and stays empty.
    WeightedMean,
    Median,
    Min,
    Max,
    /// Sample standard deviation; empty for buckets with fewer than two
    /// trades.
    Std,
    Sum,
    Count,
}

/// One per-second bucket. Seconds with no trades carry empty values, the
/// way a join against the session index leaves gaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub time: NaiveDateTime,
    pub price: Option<f64>,
    pub volume: Option<f64>,
}

/// Per-second aggregate bars across the trading session of one ticker-day.
pub async fn get_bars(
    state: &AppState,
    symbol: &str,
    date: NaiveDate,
    aggregation: BarAggregation,
) -> Result<Arc<Vec<Bar>>> {
    let key = (symbol.to_string(), date, aggregation);
    if let Some(hit) = state.bars_cache.get(&key) {
        return Ok(hit);
    }

    let trades = get_trades(state, symbol, date, date).await?;
    let session = get_trading_hours(state, symbol, date).await?;

    // Group trades by their second within the session.
    let mut buckets: HashMap<NaiveDateTime, Vec<(f64, i64)>> = HashMap::new();
    for trade in trades.iter() {
        if trade.time < session.open || trade.time > session.close {
            continue;
        }
        let second = truncate_to_second(trade.time);
        buckets.entry(second).or_default().push((trade.price, trade.volume));
    }

    let bars: Vec<Bar> = session
        .seconds_index()
        .into_iter()
        .map(|time| match buckets.get(&time) {
            Some(ticks) => aggregate_bucket(time, ticks, aggregation),
            None => Bar { time, price: None, volume: None },
        })
        .collect();

    let bars = Arc::new(bars);
    state.bars_cache.insert(key, bars.clone());
    Ok(bars)
}

fn truncate_to_second(time: NaiveDateTime) -> NaiveDateTime {
    time.with_nanosecond(0).unwrap_or(time)
}

fn aggregate_bucket(time: NaiveDateTime, ticks: &[(f64, i64)], aggregation: BarAggregation) -> Bar {
    let prices: Vec<f64> = ticks.iter().map(|(p, _)| *p).collect();
    let volumes: Vec<f64> = ticks.iter().map(|(_, v)| *v as f64).collect();

    let (price, volume) = match aggregation {
        BarAggregation::WeightedMean => {
            let total_volume: f64 = volumes.iter().sum();
            let price = if total_volume > 0.0 {
                let weighted: f64 = ticks.iter().map(|(p, v)| p * *v as f64).sum();
                Some(weighted / total_volume)
            } else {
                None
            };
            (price, None)
        }
        _ => (
            aggregate_values(&prices, aggregation),
            aggregate_values(&volumes, aggregation),
        ),
    };

    Bar { time, price, volume }
}

fn aggregate_values(values: &[f64], aggregation: BarAggregation) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    match aggregation {
        BarAggregation::Mean => Some(values.iter().sum::<f64>() / n),
        BarAggregation::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                Some((sorted[mid - 1] + sorted[mid]) / 2.0)
            } else {
                Some(sorted[mid])
            }
        }
        BarAggregation::Min => values.iter().copied().reduce(f64::min),
        BarAggregation::Max => values.iter().copied().reduce(f64::max),
        BarAggregation::Std => {
            if values.len() < 2 {
                return None;
            }
            let mean = values.iter().sum::<f64>() / n;
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(variance.sqrt())
        }
        BarAggregation::Sum => Some(values.iter().sum()),
        BarAggregation::Count => Some(n),
        BarAggregation::WeightedMean => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reconciler::tests::{test_state, FakeUpstream};
    use std::sync::Arc as StdArc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_reconcile_and_read() {
        let upstream = StdArc::new(FakeUpstream::new(3));
        let (_dir, state) = test_state(upstream.clone());

        // Wednesday is already stored: only 4 day-fetches should go out.
        reconciler::exchange_for_ticker(&state, "X").await.unwrap();
        let wednesday_noon = crate::api::TradeTick {
            timestamp: 1_609_952_400_000_000_000, // 2021-01-06 12:00 exchange time
            price: 99.0,
            volume: 1,
        };
        state
            .db
            .write_trades("X", date(2021, 1, 6), &[wednesday_noon])
            .unwrap();

        let trades = get_trades(&state, "X", date(2021, 1, 4), date(2021, 1, 8))
            .await
            .unwrap();

        assert_eq!(upstream.day_fetches().len(), 4);
        // 4 fetched days of 3 trades each plus the pre-stored Wednesday:
        // five days of ticks in the final result.
        assert_eq!(trades.len(), 13);
        let days: std::collections::BTreeSet<NaiveDate> =
            trades.iter().map(|t| t.time.date()).collect();
        assert_eq!(days.len(), 5);
        // Concatenated in ascending time order across days.
        for pair in trades.windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }
        assert_eq!(
            state.db.stored_dates(TickKind::Trades, "X").unwrap().len(),
            5
        );
    }

    #[tokio::test]
    async fn test_second_call_hits_cache_without_requests() {
        let upstream = StdArc::new(FakeUpstream::new(2));
        let (_dir, state) = test_state(upstream.clone());

        let first = get_trades(&state, "X", date(2021, 1, 4), date(2021, 1, 5))
            .await
            .unwrap();
        let requests_after_first = upstream.request_count();

        let second = get_trades(&state, "X", date(2021, 1, 4), date(2021, 1, 5))
            .await
            .unwrap();
        assert_eq!(upstream.request_count(), requests_after_first);
        assert!(StdArc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_quotes_expose_spread() {
        struct QuoteUpstream(FakeUpstream);

        #[async_trait::async_trait]
        impl crate::api::client::HttpTransport for QuoteUpstream {
            async fn get(
                &self,
                url: &str,
                params: &[(String, String)],
            ) -> Result<crate::api::client::RawResponse> {
                if url.contains("/v2/ticks/stocks/nbbo/") {
                    self.0.requests.lock().push(url.to_string());
                    return Ok(crate::api::client::RawResponse {
                        status: 200,
                        body: r#"{
                            "results": [
                                {"t": 1609770600000000000, "P": 100.5, "S": 3, "p": 100.0, "s": 7}
                            ],
                            "results_count": 1
                        }"#
                        .to_string(),
                    });
                }
                self.0.get(url, params).await
            }
        }

        let upstream = StdArc::new(QuoteUpstream(FakeUpstream::new(0)));
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::config::Config {
            database_path: dir.path().join("test.db"),
            ..crate::api::client::tests::fast_test_config()
        };
        let state = crate::state::AppState::with_transport(config, upstream).unwrap();

        let quotes = get_quotes(&state, "X", date(2021, 1, 4), date(2021, 1, 4))
            .await
            .unwrap();
        assert_eq!(quotes.len(), 1);
        assert!((quotes[0].spread() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_bars_align_to_session_index() {
        let upstream = StdArc::new(FakeUpstream::new(2));
        let (_dir, state) = test_state(upstream);

        let bars = get_bars(&state, "X", date(2021, 1, 4), BarAggregation::Mean)
            .await
            .unwrap();

        // Full session: 09:30:00..=16:00:00 inclusive.
        assert_eq!(bars.len(), 6 * 3600 + 1800 + 1);
        assert_eq!(bars[0].time.to_string(), "2021-01-04 09:30:00");

        // The fake serves trades at noon exchange time; those seconds carry
        // values, the rest are empty.
        let filled: Vec<&Bar> = bars.iter().filter(|b| b.price.is_some()).collect();
        assert_eq!(filled.len(), 2);
        assert_eq!(filled[0].price, Some(100.0));
        assert_eq!(filled[0].volume, Some(10.0));
    }

    #[tokio::test]
    async fn test_weighted_mean_bars() {
        struct TwoTickUpstream(FakeUpstream);

        #[async_trait::async_trait]
        impl crate::api::client::HttpTransport for TwoTickUpstream {
            async fn get(
                &self,
                url: &str,
                params: &[(String, String)],
            ) -> Result<crate::api::client::RawResponse> {
                if url.contains("/v2/ticks/stocks/trades/") {
                    self.0.requests.lock().push(url.to_string());
                    // Two trades in the same second: 100 @ 1, 200 @ 3.
                    return Ok(crate::api::client::RawResponse {
                        status: 200,
                        body: r#"{
                            "results": [
                                {"t": 1609774200000000000, "p": 100.0, "s": 1},
                                {"t": 1609774200500000000, "p": 200.0, "s": 3}
                            ],
                            "results_count": 2
                        }"#
                        .to_string(),
                    });
                }
                self.0.get(url, params).await
            }
        }

        let upstream = StdArc::new(TwoTickUpstream(FakeUpstream::new(0)));
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::config::Config {
            database_path: dir.path().join("test.db"),
            ..crate::api::client::tests::fast_test_config()
        };
        let state = crate::state::AppState::with_transport(config, upstream).unwrap();

        let bars = get_bars(&state, "X", date(2021, 1, 4), BarAggregation::WeightedMean)
            .await
            .unwrap();
        let filled: Vec<&Bar> = bars.iter().filter(|b| b.price.is_some()).collect();
        assert_eq!(filled.len(), 1);
        // (100*1 + 200*3) / 4 = 175.
        assert_eq!(filled[0].price, Some(175.0));
        assert_eq!(filled[0].volume, None);
    }

    #[test]
    fn test_aggregations() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(aggregate_values(&values, BarAggregation::Mean), Some(2.5));
        assert_eq!(aggregate_values(&values, BarAggregation::Median), Some(2.5));
        assert_eq!(aggregate_values(&values, BarAggregation::Min), Some(1.0));
        assert_eq!(aggregate_values(&values, BarAggregation::Max), Some(4.0));
        assert_eq!(aggregate_values(&values, BarAggregation::Sum), Some(10.0));
        assert_eq!(aggregate_values(&values, BarAggregation::Count), Some(4.0));

        let std = aggregate_values(&values, BarAggregation::Std).unwrap();
        assert!((std - 1.2909944487358056).abs() < 1e-12);

        assert_eq!(aggregate_values(&[5.0], BarAggregation::Std), None);
        assert_eq!(aggregate_values(&[], BarAggregation::Mean), None);
    }
}
