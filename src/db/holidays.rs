//! Holiday calendar storage
//!
//! Seeded at startup from a wide per-exchange CSV reference table: one row
//! per holiday date, one column per exchange, values `closed` or an early
//! close time. The seed is melted into (exchange, date, status) rows;
//! `13:00` close times become the `half` status.

use crate::db::models::{HolidayRow, HolidayStatus};
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};

/// Seed the holidays table from the wide CSV reference table. Idempotent:
/// re-seeding replaces existing rows.
pub fn seed_holidays(conn: &Connection, csv_data: &str) -> Result<()> {
    let mut reader = csv::Reader::from_reader(csv_data.as_bytes());
    let headers = reader.headers()?.clone();

    // Columns after `date` and `day` are exchange codes.
    let exchanges: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .skip(2)
        .map(|(i, name)| (i, name.to_uppercase()))
        .collect();

    let mut seeded = 0;
    for record in reader.records() {
        let record = record?;
        let date = record
            .get(0)
            .ok_or_else(|| AppError::Validation("Holiday row without a date".to_string()))?;
        let day = record.get(1).unwrap_or_default();

        for (column, exchange) in &exchanges {
            let value = record.get(*column).unwrap_or_default().trim();
            if value.is_empty() {
                continue;
            }
            let status = if value == "13:00" { "half" } else { value };
            conn.execute(
                "INSERT OR REPLACE INTO holidays (exchange, date, status, day)
                 VALUES (?1, ?2, ?3, ?4)",
                params![exchange, date, status, day],
            )?;
            seeded += 1;
        }
    }

    tracing::info!("Seeded {} holiday row(s)", seeded);
    Ok(())
}

/// Holidays for an exchange, optionally bounded by date.
pub fn holidays(
    conn: &Connection,
    exchange: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<HolidayRow>> {
    let mut sql = "SELECT date, status FROM holidays WHERE exchange = ?1".to_string();
    let mut bounds: Vec<String> = Vec::new();
    if let Some(from) = from {
        sql.push_str(&format!(" AND date >= ?{}", bounds.len() + 2));
        bounds.push(from.to_string());
    }
    if let Some(to) = to {
        sql.push_str(&format!(" AND date <= ?{}", bounds.len() + 2));
        bounds.push(to.to_string());
    }
    sql.push_str(" ORDER BY date");

    let mut stmt = conn.prepare(&sql)?;
    let mut query_params: Vec<&dyn rusqlite::ToSql> = vec![&exchange];
    for bound in &bounds {
        query_params.push(bound);
    }

    let rows = stmt
        .query_map(query_params.as_slice(), |row| {
            let date: String = row.get(0)?;
            let status: String = row.get(1)?;
            Ok((date, status))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(date, status)| {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| AppError::Validation(format!("Bad holiday date {}: {}", date, e)))?;
            Ok(HolidayRow {
                date,
                status: HolidayStatus::parse(&status)?,
            })
        })
        .collect()
}
