//! Cursor-based pagination over tick endpoints
//!
//! Tick endpoints cap the number of records per response, so one ticker-day
//! is assembled from multiple pages. The cursor is the last record's
//! timestamp, passed as an exclusive-ish lower bound: the first record of
//! each following page repeats the prior page's last record and is dropped.

use crate::api::client::ApiClient;
use crate::error::{AppError, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct TickPage {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    results_count: u64,
}

/// Fetch every page of a tick resource and return the records in order.
///
/// Any page failure propagates immediately with nothing returned: a
/// half-fetched day must never be mistaken for a complete one. A page
/// reporting `results_count >= page_size` is always treated as potentially
/// non-final, even if the follow-up request comes back empty — that final
/// empty page is valid and avoids truncating days whose record count is an
/// exact multiple of the page size.
pub async fn fetch_all(client: &ApiClient, path: &str, page_size: u32) -> Result<Vec<Value>> {
    let mut records: Vec<Value> = Vec::new();
    let mut cursor: i64 = 0;
    let mut first_page = true;

    loop {
        let params = [
            ("timestamp".to_string(), cursor.to_string()),
            ("limit".to_string(), page_size.to_string()),
        ];
        let body = client.request(path, &params).await?;
        let page: TickPage = serde_json::from_value(body)?;

        let non_final = page.results_count >= u64::from(page_size);
        let next_cursor = page
            .results
            .last()
            .and_then(|record| record.get("t"))
            .and_then(Value::as_i64);

        // The first record of every page but the first duplicates the
        // cursor record from the previous page.
        let skip = usize::from(!first_page);
        records.extend(page.results.into_iter().skip(skip));

        if !non_final {
            return Ok(records);
        }
        cursor = next_cursor.ok_or_else(|| AppError::Api {
            endpoint: path.to_string(),
            attempts: 1,
            reason: "full page without a usable cursor timestamp".to_string(),
        })?;
        first_page = false;
    }
}
