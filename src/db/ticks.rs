//! Tick storage and the presence index
//!
//! Tick rows are append-only. Presence rows in `summary` are the contract
//! with the reconciler: a row exists only when every tick for that
//! (table, ticker, date) is durable, so inserts here always run inside the
//! caller's transaction with the presence row written after the ticks.

use crate::api::{QuoteTick, TradeTick};
use crate::db::models::{QuoteRow, TickKind, TradeRow};
use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;

pub fn insert_trades(
    conn: &Connection,
    ticker_id: i64,
    date: NaiveDate,
    records: &[TradeTick],
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO trades (ticker_id, date, timestamp, price, volume)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let date = date.to_string();
    for record in records {
        stmt.execute(params![
            ticker_id,
            date,
            record.timestamp,
            record.price,
            record.volume
        ])?;
    }
    Ok(())
}

pub fn insert_quotes(
    conn: &Connection,
    ticker_id: i64,
    date: NaiveDate,
    records: &[QuoteTick],
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO quotes (ticker_id, date, timestamp, ask_price, ask_volume, bid_price, bid_volume)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let date = date.to_string();
    for record in records {
        stmt.execute(params![
            ticker_id,
            date,
            record.timestamp,
            record.ask_price,
            record.ask_volume,
            record.bid_price,
            record.bid_volume
        ])?;
    }
    Ok(())
}

/// Mark a (table, ticker, date) combination as fully stored.
pub fn insert_presence(
    conn: &Connection,
    kind: TickKind,
    ticker_id: i64,
    date: NaiveDate,
) -> Result<()> {
    conn.execute(
        "INSERT INTO summary (table_name, ticker_id, date) VALUES (?1, ?2, ?3)",
        params![kind.table_name(), ticker_id, date.to_string()],
    )?;
    Ok(())
}

/// Dates already fully stored for a (table, ticker) pair.
pub fn stored_dates(
    conn: &Connection,
    kind: TickKind,
    ticker_id: i64,
) -> Result<BTreeSet<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT date FROM summary WHERE table_name = ?1 AND ticker_id = ?2",
    )?;

    let dates = stmt
        .query_map(params![kind.table_name(), ticker_id], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    dates
        .into_iter()
        .map(|date| {
            NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| AppError::Validation(format!("Bad summary date {}: {}", date, e)))
        })
        .collect()
}

pub fn read_trades(
    conn: &Connection,
    ticker_id: i64,
    date: NaiveDate,
    tz: Tz,
) -> Result<Vec<TradeRow>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, price, volume FROM trades
         WHERE ticker_id = ?1 AND date = ?2
         ORDER BY timestamp",
    )?;

    let rows = stmt
        .query_map(params![ticker_id, date.to_string()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(timestamp, price, volume)| {
            Ok(TradeRow {
                time: local_time(timestamp, tz)?,
                price,
                volume,
            })
        })
        .collect()
}

pub fn read_quotes(
    conn: &Connection,
    ticker_id: i64,
    date: NaiveDate,
    tz: Tz,
) -> Result<Vec<QuoteRow>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, ask_price, ask_volume, bid_price, bid_volume FROM quotes
         WHERE ticker_id = ?1 AND date = ?2
         ORDER BY timestamp",
    )?;

    let rows = stmt
        .query_map(params![ticker_id, date.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(timestamp, ask_price, ask_volume, bid_price, bid_volume)| {
            Ok(QuoteRow {
                time: local_time(timestamp, tz)?,
                ask_price,
                ask_volume,
                bid_price,
                bid_volume,
            })
        })
        .collect()
}

/// Convert epoch nanoseconds (UTC) to the exchange's civil time.
pub fn local_time(timestamp_ns: i64, tz: Tz) -> Result<NaiveDateTime> {
    let secs = timestamp_ns.div_euclid(1_000_000_000);
    let nanos = timestamp_ns.rem_euclid(1_000_000_000) as u32;
    let utc = DateTime::from_timestamp(secs, nanos).ok_or_else(|| {
        AppError::Validation(format!("Timestamp out of range: {}", timestamp_ns))
    })?;
    Ok(utc.with_timezone(&tz).naive_local())
}
