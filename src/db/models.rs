//! Row types for the persistent store

use crate::error::{AppError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Which tick table a record belongs to. Doubles as the presence-index kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickKind {
    Trades,
    Quotes,
}

impl TickKind {
    pub fn table_name(self) -> &'static str {
        match self {
            TickKind::Trades => "trades",
            TickKind::Quotes => "quotes",
        }
    }
}

/// One stored trade, with the timestamp resolved to the exchange's local
/// civil time for downstream consumption.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub time: NaiveDateTime,
    pub price: f64,
    pub volume: i64,
}

/// One stored NBBO quote, exchange-local civil time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub time: NaiveDateTime,
    pub ask_price: f64,
    pub ask_volume: i64,
    pub bid_price: f64,
    pub bid_volume: i64,
}

impl QuoteRow {
    pub fn spread(&self) -> f64 {
        self.ask_price - self.bid_price
    }
}

/// Exchange calendar status for one date. Dates without a row are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HolidayStatus {
    Closed,
    Half,
}

impl HolidayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HolidayStatus::Closed => "closed",
            HolidayStatus::Half => "half",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "closed" => Ok(HolidayStatus::Closed),
            "half" => Ok(HolidayStatus::Half),
            other => Err(AppError::Validation(format!(
                "Unknown holiday status: {}",
                other
            ))),
        }
    }
}

/// One holiday calendar entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolidayRow {
    pub date: NaiveDate,
    pub status: HolidayStatus,
}

/// Per-day wide feature table: one shared timestamp index plus named
/// columns of equal length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureFrame {
    pub index: Vec<NaiveDateTime>,
    pub columns: Vec<FeatureColumn>,
}

/// One named feature column
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub values: Vec<f64>,
}

impl FeatureFrame {
    pub fn new(index: Vec<NaiveDateTime>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    /// Add a column; its length must match the index.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(AppError::Validation(format!(
                "Column `{}` has {} value(s) for an index of {}",
                name,
                values.len(),
                self.index.len()
            )));
        }
        self.columns.push(FeatureColumn { name, values });
        Ok(())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.index.is_empty()
    }
}
