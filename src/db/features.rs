//! Feature storage
//!
//! Features are registered per ticker under a unique name; their values form
//! a per-day wide table. The `feature_values_summary` table is the presence
//! index on the feature side, with the same contract as `summary`.

use crate::db::models::{FeatureColumn, FeatureFrame};
use crate::error::{AppError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Register a feature name, returning its id.
///
/// Idempotent: re-registering a known name leaves the stored description
/// untouched.
pub fn register_feature(
    conn: &Connection,
    ticker_id: i64,
    name: &str,
    description: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO features (ticker_id, name, description) VALUES (?1, ?2, ?3)
         ON CONFLICT (ticker_id, name) DO NOTHING",
        params![ticker_id, name, description],
    )?;
    feature_id(conn, ticker_id, name)
}

/// Look up a feature id.
pub fn feature_id(conn: &Connection, ticker_id: i64, name: &str) -> Result<i64> {
    let result = conn.query_row(
        "SELECT id FROM features WHERE ticker_id = ?1 AND name = ?2",
        params![ticker_id, name],
        |row| row.get(0),
    );

    match result {
        Ok(id) => Ok(id),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(AppError::NotFound(format!(
            "Feature {} is not registered for ticker id {}",
            name, ticker_id
        ))),
        Err(e) => Err(e.into()),
    }
}

pub fn insert_values(
    conn: &Connection,
    feature_id: i64,
    index: &[NaiveDateTime],
    values: &[f64],
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO feature_values (feature_id, time, value) VALUES (?1, ?2, ?3)",
    )?;
    for (time, value) in index.iter().zip(values) {
        stmt.execute(params![
            feature_id,
            time.format(TIME_FORMAT).to_string(),
            value
        ])?;
    }
    Ok(())
}

/// Mark one feature-date as fully generated.
pub fn insert_feature_presence(conn: &Connection, feature_id: i64, date: NaiveDate) -> Result<()> {
    conn.execute(
        "INSERT INTO feature_values_summary (feature_id, date) VALUES (?1, ?2)",
        params![feature_id, date.to_string()],
    )?;
    Ok(())
}

/// Dates already generated for one feature.
pub fn feature_stored_dates(conn: &Connection, feature_id: i64) -> Result<BTreeSet<NaiveDate>> {
    let mut stmt =
        conn.prepare("SELECT date FROM feature_values_summary WHERE feature_id = ?1")?;

    let dates = stmt
        .query_map(params![feature_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    dates
        .into_iter()
        .map(|date| {
            NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                AppError::Validation(format!("Bad feature summary date {}: {}", date, e))
            })
        })
        .collect()
}

/// Reassemble the wide per-day table for one ticker-date.
pub fn read_features(conn: &Connection, ticker_id: i64, date: NaiveDate) -> Result<FeatureFrame> {
    let next_day = date
        .succ_opt()
        .ok_or_else(|| AppError::Validation(format!("Date out of range: {}", date)))?;

    let mut stmt = conn.prepare(
        "SELECT f.name, v.time, v.value
         FROM feature_values v
         JOIN features f ON f.id = v.feature_id
         WHERE f.ticker_id = ?1 AND v.time >= ?2 AND v.time < ?3
         ORDER BY f.name, v.time",
    )?;

    let rows = stmt
        .query_map(
            params![ticker_id, date.to_string(), next_day.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut frame = FeatureFrame::default();
    for (name, time, value) in rows {
        let time = NaiveDateTime::parse_from_str(&time, TIME_FORMAT)
            .map_err(|e| AppError::Validation(format!("Bad feature time {}: {}", time, e)))?;

        match frame.columns.last_mut() {
            Some(column) if column.name == name => {
                column.values.push(value);
                // All columns share one index; only the first builds it.
                if frame.columns.len() == 1 {
                    frame.index.push(time);
                }
            }
            _ => {
                if frame.columns.is_empty() {
                    frame.index.push(time);
                }
                frame.columns.push(FeatureColumn {
                    name,
                    values: vec![value],
                });
            }
        }
    }

    for column in &frame.columns {
        if column.values.len() != frame.index.len() {
            return Err(AppError::DataQuality(format!(
                "Feature `{}` has {} value(s) against an index of {} for {}",
                column.name,
                column.values.len(),
                frame.index.len(),
                date
            )));
        }
    }

    Ok(frame)
}
