//! Persistent market data store
//!
//! SQLite-backed storage for ticker metadata, the holiday calendar, raw
//! ticks, generated features, and the presence indexes. Connections come
//! from an r2d2 pool and are borrowed for the duration of one logical
//! operation, so they are returned on every exit path.
//!
//! The presence contract: a `summary` (or `feature_values_summary`) row is
//! written in the same transaction as the data it covers, after the data
//! rows. A presence row therefore never exists without its records.

pub mod models;
mod features;
mod holidays;
mod migrations;
mod tickers;
mod ticks;

use crate::api::{QuoteTick, TickerDetails, TradeTick};
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use dashmap::DashMap;
use models::{FeatureFrame, HolidayRow, QuoteRow, TickKind, TradeRow};
use r2d2_sqlite::SqliteConnectionManager;
use std::collections::BTreeSet;
use std::path::Path;

/// Static holiday reference table, seeded at startup.
const HOLIDAYS_CSV: &str = include_str!("../../data/holidays.csv");

type Pool = r2d2::Pool<SqliteConnectionManager>;
type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Persistent store wrapper
pub struct MarketDb {
    pool: Pool,
    /// Ticker ids are immutable once assigned, so they memoize per process.
    ticker_ids: DashMap<String, i64>,
    feature_ids: DashMap<(i64, String), i64>,
}

impl MarketDb {
    /// Open (or create) the store, run migrations, and seed the holiday
    /// calendar.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_holidays(path, HOLIDAYS_CSV)
    }

    /// Open with a caller-supplied holiday reference table.
    pub fn open_with_holidays(path: &Path, holidays_csv: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
            )
        });
        let pool = r2d2::Pool::builder().build(manager)?;

        let db = Self {
            pool,
            ticker_ids: DashMap::new(),
            feature_ids: DashMap::new(),
        };

        let conn = db.conn()?;
        migrations::run_migrations(&conn)?;
        holidays::seed_holidays(&conn, holidays_csv)?;

        Ok(db)
    }

    /// Borrow a pooled connection for one logical operation.
    fn conn(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }

    // ========== Tickers ==========

    /// Ticker id for a stored symbol, memoized per process.
    pub fn ticker_id(&self, symbol: &str) -> Result<i64> {
        if let Some(id) = self.ticker_ids.get(symbol) {
            return Ok(*id);
        }
        let conn = self.conn()?;
        let id = tickers::ticker_id(&conn, symbol)?;
        self.ticker_ids.insert(symbol.to_string(), id);
        Ok(id)
    }

    pub fn store_ticker_details(&self, details: &TickerDetails) -> Result<i64> {
        let conn = self.conn()?;
        let id = tickers::store_ticker_details(&conn, details)?;
        self.ticker_ids.insert(details.symbol.clone(), id);
        Ok(id)
    }

    pub fn ticker_details(&self, symbol: &str) -> Result<Option<TickerDetails>> {
        let conn = self.conn()?;
        tickers::ticker_details(&conn, symbol)
    }

    // ========== Holidays ==========

    pub fn holidays(
        &self,
        exchange: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<HolidayRow>> {
        let conn = self.conn()?;
        holidays::holidays(&conn, exchange, from, to)
    }

    // ========== Ticks & presence ==========

    /// Dates already fully stored for a (kind, symbol) pair. A symbol with
    /// no ticker row has nothing stored.
    pub fn stored_dates(&self, kind: TickKind, symbol: &str) -> Result<BTreeSet<NaiveDate>> {
        let conn = self.conn()?;
        match tickers::try_ticker_id(&conn, symbol)? {
            Some(ticker_id) => ticks::stored_dates(&conn, kind, ticker_id),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Store one day of trades and its presence row in a single transaction.
    pub fn write_trades(&self, symbol: &str, date: NaiveDate, records: &[TradeTick]) -> Result<()> {
        let ticker_id = self.ticker_id(symbol)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        ticks::insert_trades(&tx, ticker_id, date, records)?;
        ticks::insert_presence(&tx, TickKind::Trades, ticker_id, date)?;
        tx.commit()?;
        tracing::debug!("Stored {} trade(s) for {} {}", records.len(), symbol, date);
        Ok(())
    }

    /// Store one day of quotes and its presence row in a single transaction.
    pub fn write_quotes(&self, symbol: &str, date: NaiveDate, records: &[QuoteTick]) -> Result<()> {
        let ticker_id = self.ticker_id(symbol)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        ticks::insert_quotes(&tx, ticker_id, date, records)?;
        ticks::insert_presence(&tx, TickKind::Quotes, ticker_id, date)?;
        tx.commit()?;
        tracing::debug!("Stored {} quote(s) for {} {}", records.len(), symbol, date);
        Ok(())
    }

    /// One day of trades in timestamp order, times in the exchange's civil
    /// time.
    pub fn read_trades(&self, symbol: &str, date: NaiveDate, tz: Tz) -> Result<Vec<TradeRow>> {
        let ticker_id = self.ticker_id(symbol)?;
        let conn = self.conn()?;
        ticks::read_trades(&conn, ticker_id, date, tz)
    }

    pub fn read_quotes(&self, symbol: &str, date: NaiveDate, tz: Tz) -> Result<Vec<QuoteRow>> {
        let ticker_id = self.ticker_id(symbol)?;
        let conn = self.conn()?;
        ticks::read_quotes(&conn, ticker_id, date, tz)
    }

    // ========== Features ==========

    fn cached_feature_id(
        &self,
        conn: &rusqlite::Connection,
        ticker_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64> {
        let key = (ticker_id, name.to_string());
        if let Some(id) = self.feature_ids.get(&key) {
            return Ok(*id);
        }
        let id = features::register_feature(conn, ticker_id, name, description)?;
        self.feature_ids.insert(key, id);
        Ok(id)
    }

    /// Store a wide per-day feature table and its presence rows in a single
    /// transaction. Feature names register idempotently.
    pub fn write_features(
        &self,
        symbol: &str,
        date: NaiveDate,
        frame: &FeatureFrame,
        descriptions: &std::collections::HashMap<String, String>,
    ) -> Result<()> {
        let ticker_id = self.ticker_id(symbol)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for column in &frame.columns {
            let description = descriptions.get(&column.name).map(String::as_str);
            let feature_id = self.cached_feature_id(&tx, ticker_id, &column.name, description)?;
            features::insert_values(&tx, feature_id, &frame.index, &column.values)?;
            features::insert_feature_presence(&tx, feature_id, date)?;
        }
        tx.commit()?;
        tracing::debug!(
            "Stored {} feature column(s) for {} {}",
            frame.columns.len(),
            symbol,
            date
        );
        Ok(())
    }

    /// Register features and their presence rows without values — the bulk
    /// flat-file path stores the values elsewhere.
    pub fn mark_features_present(
        &self,
        symbol: &str,
        date: NaiveDate,
        columns: &[(String, Option<String>)],
    ) -> Result<()> {
        let ticker_id = self.ticker_id(symbol)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (name, description) in columns {
            let feature_id =
                self.cached_feature_id(&tx, ticker_id, name, description.as_deref())?;
            features::insert_feature_presence(&tx, feature_id, date)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn read_features(&self, symbol: &str, date: NaiveDate) -> Result<FeatureFrame> {
        let ticker_id = self.ticker_id(symbol)?;
        let conn = self.conn()?;
        features::read_features(&conn, ticker_id, date)
    }

    /// Dates already generated for one feature. Unregistered features have
    /// nothing stored.
    pub fn feature_stored_dates(
        &self,
        symbol: &str,
        feature: &str,
    ) -> Result<BTreeSet<NaiveDate>> {
        let conn = self.conn()?;
        let ticker_id = match tickers::try_ticker_id(&conn, symbol)? {
            Some(id) => id,
            None => return Ok(BTreeSet::new()),
        };
        match features::feature_id(&conn, ticker_id, feature) {
            Ok(feature_id) => features::feature_stored_dates(&conn, feature_id),
            Err(AppError::NotFound(_)) => Ok(BTreeSet::new()),
            Err(e) => Err(e),
        }
    }
}
