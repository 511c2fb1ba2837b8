//! Upstream market data API adapter
//!
//! A typed facade over the rate-limited, retrying client. No caching happens
//! here — gap reconciliation and the memoization layer own that — so this
//! stays a pure protocol adapter that can be called repeatedly and safely.

pub mod client;
pub mod paginator;
pub mod rate_limiter;

use crate::config::Config;
use crate::error::Result;
use chrono::NaiveDate;
use client::{ApiClient, HttpTransport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Minimal ticker metadata from the company endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerDetails {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sector: String,
    #[serde(rename = "exchangeSymbol")]
    pub exchange: String,
}

/// One trade tick as returned by the ticks endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    /// Nanoseconds since the Unix epoch, UTC
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "s")]
    pub volume: i64,
}

/// One NBBO quote tick as returned by the ticks endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteTick {
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "P")]
    pub ask_price: f64,
    #[serde(rename = "S")]
    pub ask_volume: i64,
    #[serde(rename = "p")]
    pub bid_price: f64,
    #[serde(rename = "s")]
    pub bid_volume: i64,
}

/// Upcoming holiday notice, used by calendar refresh tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingHoliday {
    pub exchange: String,
    pub date: String,
    pub status: String,
}

/// Typed facade over the upstream API
pub struct MarketDataApi {
    client: ApiClient,
    page_size: u32,
}

impl MarketDataApi {
    pub fn new(config: &Config, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            client: ApiClient::new(config, transport),
            page_size: config.page_size,
        }
    }

    /// Company metadata for a ticker, including its listing exchange.
    pub async fn ticker_details(&self, symbol: &str) -> Result<TickerDetails> {
        let path = format!("/v1/meta/symbols/{}/company", symbol);
        let body = self.client.request(&path, &[]).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Every trade for one ticker-day, in timestamp order.
    pub async fn daily_trades(&self, symbol: &str, date: NaiveDate) -> Result<Vec<TradeTick>> {
        let path = format!("/v2/ticks/stocks/trades/{}/{}", symbol, date);
        let raw = paginator::fetch_all(&self.client, &path, self.page_size).await?;
        raw.into_iter()
            .map(|record| serde_json::from_value(record).map_err(Into::into))
            .collect()
    }

    /// Every NBBO quote for one ticker-day, in timestamp order.
    pub async fn daily_quotes(&self, symbol: &str, date: NaiveDate) -> Result<Vec<QuoteTick>> {
        let path = format!("/v2/ticks/stocks/nbbo/{}/{}", symbol, date);
        let raw = paginator::fetch_all(&self.client, &path, self.page_size).await?;
        raw.into_iter()
            .map(|record| serde_json::from_value(record).map_err(Into::into))
            .collect()
    }

    /// Upcoming market holidays across exchanges. Best-effort.
    pub async fn upcoming_holidays(&self) -> Result<Vec<UpcomingHoliday>> {
        let body = self.client.request("/v1/marketstatus/upcoming", &[]).await?;
        Ok(serde_json::from_value(body)?)
    }
}
