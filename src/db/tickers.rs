//! Ticker metadata storage
//!
//! Tickers are created on first metadata fetch and immutable afterwards;
//! their ids are the foreign key for everything else in the store.

use crate::api::TickerDetails;
use crate::error::{AppError, Result};
use rusqlite::{params, Connection};

/// Look up a ticker id, if the ticker is stored.
pub fn try_ticker_id(conn: &Connection, symbol: &str) -> Result<Option<i64>> {
    let result = conn.query_row(
        "SELECT id FROM tickers WHERE ticker = ?1",
        params![symbol],
        |row| row.get(0),
    );

    match result {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Look up a ticker id, failing if the ticker has never been stored.
pub fn ticker_id(conn: &Connection, symbol: &str) -> Result<i64> {
    try_ticker_id(conn, symbol)?
        .ok_or_else(|| AppError::NotFound(format!("Ticker {} is not stored", symbol)))
}

/// Store ticker metadata. Returns the new id.
pub fn store_ticker_details(conn: &Connection, details: &TickerDetails) -> Result<i64> {
    conn.execute(
        "INSERT INTO tickers (ticker, name, sector, exchange) VALUES (?1, ?2, ?3, ?4)",
        params![details.symbol, details.name, details.sector, details.exchange],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!("Stored ticker {} ({}) with id {}", details.symbol, details.exchange, id);
    Ok(id)
}

/// Read stored ticker metadata.
pub fn ticker_details(conn: &Connection, symbol: &str) -> Result<Option<TickerDetails>> {
    let result = conn.query_row(
        "SELECT ticker, name, sector, exchange FROM tickers WHERE ticker = ?1",
        params![symbol],
        |row| {
            Ok(TickerDetails {
                symbol: row.get(0)?,
                name: row.get(1)?,
                sector: row.get(2)?,
                exchange: row.get(3)?,
            })
        },
    );

    match result {
        Ok(details) => Ok(Some(details)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
