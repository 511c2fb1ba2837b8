//! Engine state management
//!
//! [`AppState`] is the one context object: it owns the store, the upstream
//! API facade, and every cache, and is constructed once at process start and
//! passed to each service call. There is no module-level shared state.

use crate::api::client::{HttpTransport, ReqwestTransport};
use crate::api::MarketDataApi;
use crate::cache::{LruCache, Memo};
use crate::config::Config;
use crate::db::models::{HolidayRow, QuoteRow, TradeRow};
use crate::db::MarketDb;
use crate::error::Result;
use crate::services::accessors::{Bar, BarAggregation};
use chrono::NaiveDate;
use std::sync::Arc;

/// How many full range results to keep per tick kind. Small on purpose:
/// everything in these caches can be recomputed from the store.
const RANGE_CACHE_CAPACITY: usize = 10;
const BARS_CACHE_CAPACITY: usize = 20;

/// Engine state shared across all service calls
pub struct AppState {
    pub config: Config,

    /// Persistent store
    pub db: Arc<MarketDb>,

    /// Upstream API facade
    pub api: Arc<MarketDataApi>,

    /// Ticker symbol -> exchange code. Finite keyspace, immutable per
    /// process, unbounded.
    pub(crate) exchange_memo: Memo<String, String>,

    /// Holiday query results per (exchange, bounds). Unbounded.
    pub(crate) holidays_memo: Memo<(String, Option<NaiveDate>, Option<NaiveDate>), Arc<Vec<HolidayRow>>>,

    /// Open-date sets per (exchange, range, include_future). Unbounded.
    pub(crate) open_dates_memo: Memo<(String, NaiveDate, NaiveDate, bool), Arc<Vec<NaiveDate>>>,

    /// Recent full get_trades results. Bounded, eviction is harmless.
    pub(crate) trades_cache: LruCache<(String, NaiveDate, NaiveDate), Arc<Vec<TradeRow>>>,

    /// Recent full get_quotes results. Bounded.
    pub(crate) quotes_cache: LruCache<(String, NaiveDate, NaiveDate), Arc<Vec<QuoteRow>>>,

    /// Recent bar aggregations. Bounded.
    pub(crate) bars_cache: LruCache<(String, NaiveDate, BarAggregation), Arc<Vec<Bar>>>,
}

impl AppState {
    /// Build the engine against the real upstream transport.
    pub fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        Self::with_transport(config, transport)
    }

    /// Build the engine with a caller-supplied transport (tests, alternate
    /// upstreams).
    pub fn with_transport(config: Config, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let db = Arc::new(MarketDb::open(&config.database_path)?);
        let api = Arc::new(MarketDataApi::new(&config, transport));

        Ok(Self {
            config,
            db,
            api,
            exchange_memo: Memo::new(),
            holidays_memo: Memo::new(),
            open_dates_memo: Memo::new(),
            trades_cache: LruCache::new(RANGE_CACHE_CAPACITY),
            quotes_cache: LruCache::new(RANGE_CACHE_CAPACITY),
            bars_cache: LruCache::new(BARS_CACHE_CAPACITY),
        })
    }
}
