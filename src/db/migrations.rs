//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create migrations table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_tickers", CREATE_TICKERS_TABLE)?;
    run_migration(conn, "002_summary", CREATE_SUMMARY_TABLE)?;
    run_migration(conn, "003_trades", CREATE_TRADES_TABLE)?;
    run_migration(conn, "004_quotes", CREATE_QUOTES_TABLE)?;
    run_migration(conn, "005_holidays", CREATE_HOLIDAYS_TABLE)?;
    run_migration(conn, "006_features", CREATE_FEATURES_TABLE)?;
    run_migration(conn, "007_feature_values", CREATE_FEATURE_VALUES_TABLE)?;
    run_migration(conn, "008_feature_values_summary", CREATE_FEATURE_VALUES_SUMMARY_TABLE)?;

    tracing::info!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    // Check if migration already applied
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_TICKERS_TABLE: &str = r#"
CREATE TABLE tickers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    sector TEXT NOT NULL,
    exchange TEXT NOT NULL
);
"#;

// The presence index: a row here means the (table, ticker, date) combination
// is fully stored and safe to read without re-fetching.
const CREATE_SUMMARY_TABLE: &str = r#"
CREATE TABLE summary (
    table_name TEXT NOT NULL,
    ticker_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    PRIMARY KEY (table_name, ticker_id, date),
    FOREIGN KEY (ticker_id) REFERENCES tickers(id)
);
"#;

// Ticks are append-only and deliberately carry no uniqueness constraint;
// duplicate avoidance happens at the pagination boundary.
const CREATE_TRADES_TABLE: &str = r#"
CREATE TABLE trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    price REAL NOT NULL,
    volume INTEGER NOT NULL,
    FOREIGN KEY (ticker_id) REFERENCES tickers(id)
);
CREATE INDEX idx_trades_day ON trades(ticker_id, date, timestamp);
"#;

const CREATE_QUOTES_TABLE: &str = r#"
CREATE TABLE quotes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    ask_price REAL NOT NULL,
    ask_volume INTEGER NOT NULL,
    bid_price REAL NOT NULL,
    bid_volume INTEGER NOT NULL,
    FOREIGN KEY (ticker_id) REFERENCES tickers(id)
);
CREATE INDEX idx_quotes_day ON quotes(ticker_id, date, timestamp);
"#;

const CREATE_HOLIDAYS_TABLE: &str = r#"
CREATE TABLE holidays (
    exchange TEXT NOT NULL,
    date TEXT NOT NULL,
    status TEXT NOT NULL,
    day TEXT NOT NULL,
    PRIMARY KEY (exchange, date)
);
"#;

const CREATE_FEATURES_TABLE: &str = r#"
CREATE TABLE features (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    UNIQUE (ticker_id, name),
    FOREIGN KEY (ticker_id) REFERENCES tickers(id)
);
"#;

const CREATE_FEATURE_VALUES_TABLE: &str = r#"
CREATE TABLE feature_values (
    feature_id INTEGER NOT NULL,
    time TEXT NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (feature_id, time),
    FOREIGN KEY (feature_id) REFERENCES features(id)
);
CREATE INDEX idx_feature_values_time ON feature_values(time, feature_id);
"#;

const CREATE_FEATURE_VALUES_SUMMARY_TABLE: &str = r#"
CREATE TABLE feature_values_summary (
    feature_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    PRIMARY KEY (feature_id, date),
    FOREIGN KEY (feature_id) REFERENCES features(id)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 8);
    }
}
