//! Exchange calendar and trading session resolution
//!
//! Open dates are weekdays minus holidays where the exchange is closed,
//! minus today and the future unless the caller opts in. Sessions run
//! 09:30–16:00 exchange-local, closing at 13:00 on half days.

use crate::db::models::{HolidayRow, HolidayStatus};
use crate::error::{AppError, Result};
use crate::state::AppState;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::sync::Arc;

/// Timezone an exchange's civil times are quoted in. The supported listing
/// venues all trade on US Eastern time.
pub fn exchange_timezone(_exchange: &str) -> Tz {
    chrono_tz::America::New_York
}

/// Today's date as the exchange sees it.
fn today_local(exchange: &str) -> NaiveDate {
    Utc::now().with_timezone(&exchange_timezone(exchange)).date_naive()
}

/// Cached holiday lookup.
pub fn holidays(
    state: &AppState,
    exchange: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Arc<Vec<HolidayRow>>> {
    let key = (exchange.to_string(), from, to);
    state
        .holidays_memo
        .get_or_try_insert(&key, || Ok(Arc::new(state.db.holidays(exchange, from, to)?)))
}

/// Dates within the range on which the exchange is open.
///
/// Weekends and closed holidays are excluded. Today and future dates are
/// excluded unless `include_future` is set — their tick data is incomplete
/// or nonexistent upstream.
pub fn open_dates(
    state: &AppState,
    exchange: &str,
    from: NaiveDate,
    to: NaiveDate,
    include_future: bool,
) -> Result<Arc<Vec<NaiveDate>>> {
    let key = (exchange.to_string(), from, to, include_future);
    state.open_dates_memo.get_or_try_insert(&key, || {
        let holiday_rows = holidays(state, exchange, Some(from), Some(to))?;
        let closed: HashSet<NaiveDate> = holiday_rows
            .iter()
            .filter(|h| h.status == HolidayStatus::Closed)
            .map(|h| h.date)
            .collect();
        let today = today_local(exchange);

        let mut dates = Vec::new();
        let mut date = from;
        while date <= to {
            let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
            if !weekend && !closed.contains(&date) && (include_future || date < today) {
                dates.push(date);
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Ok(Arc::new(dates))
    })
}

/// One exchange-day trading session, in exchange-local civil time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingSession {
    pub open: NaiveDateTime,
    pub close: NaiveDateTime,
}

impl TradingSession {
    /// Per-second timestamps across the session, both endpoints included.
    /// This is the index bar and feature tables align to.
    pub fn seconds_index(&self) -> Vec<NaiveDateTime> {
        let total = (self.close - self.open).num_seconds().max(0);
        (0..=total)
            .map(|s| self.open + chrono::Duration::seconds(s))
            .collect()
    }
}

/// Resolve the trading session for one exchange-date.
///
/// Fails for weekends and closed holidays; half days close at 13:00.
pub fn trading_session(state: &AppState, exchange: &str, date: NaiveDate) -> Result<TradingSession> {
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return Err(AppError::Validation(format!(
            "{} is a weekend; {} is not open",
            date, exchange
        )));
    }

    let holiday_rows = holidays(state, exchange, Some(date), Some(date))?;
    let close_time = match holiday_rows.first().map(|h| h.status) {
        Some(HolidayStatus::Closed) => {
            return Err(AppError::Validation(format!(
                "{} is closed on {}",
                exchange, date
            )));
        }
        Some(HolidayStatus::Half) => NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        None => NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
    };
    let open_time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();

    Ok(TradingSession {
        open: date.and_time(open_time),
        close: date.and_time(close_time),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::fast_test_config;
    use crate::api::client::{HttpTransport, RawResponse};
    use crate::config::Config;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoTransport;

    #[async_trait]
    impl HttpTransport for NoTransport {
        async fn get(&self, _url: &str, _params: &[(String, String)]) -> Result<RawResponse> {
            Err(AppError::Validation("no network in calendar tests".to_string()))
        }
    }

    fn test_state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            database_path: dir.path().join("test.db"),
            ..fast_test_config()
        };
        let state = AppState::with_transport(config, std::sync::Arc::new(NoTransport)).unwrap();
        (dir, state)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekends_are_excluded() {
        let (_dir, state) = test_state();
        // 2021-01-04 is a Monday; the range spans two weekends.
        let dates = open_dates(&state, "NYE", date(2021, 1, 2), date(2021, 1, 10), false).unwrap();
        assert_eq!(
            dates.as_slice(),
            &[
                date(2021, 1, 4),
                date(2021, 1, 5),
                date(2021, 1, 6),
                date(2021, 1, 7),
                date(2021, 1, 8),
            ]
        );
    }

    #[test]
    fn test_closed_holidays_are_excluded() {
        let (_dir, state) = test_state();
        // 2021-01-18 is Martin Luther King Jr. Day (closed) in the seed table.
        let dates = open_dates(&state, "NYE", date(2021, 1, 18), date(2021, 1, 19), false).unwrap();
        assert_eq!(dates.as_slice(), &[date(2021, 1, 19)]);
    }

    #[test]
    fn test_half_days_are_open() {
        let (_dir, state) = test_state();
        // 2021-11-26 is a half day: open, but with an early close.
        let dates = open_dates(&state, "NYE", date(2021, 11, 26), date(2021, 11, 26), false).unwrap();
        assert_eq!(dates.as_slice(), &[date(2021, 11, 26)]);

        let session = trading_session(&state, "NYE", date(2021, 11, 26)).unwrap();
        assert_eq!(session.close.time(), NaiveTime::from_hms_opt(13, 0, 0).unwrap());
    }

    #[test]
    fn test_future_dates_are_excluded_by_default() {
        let (_dir, state) = test_state();
        let today = today_local("NYE");
        let far_future = today + chrono::Duration::days(30);

        let without = open_dates(&state, "NYE", today, far_future, false).unwrap();
        assert!(without.is_empty());

        let with = open_dates(&state, "NYE", today, far_future, true).unwrap();
        assert!(!with.is_empty());
    }

    #[test]
    fn test_full_day_session() {
        let (_dir, state) = test_state();
        let session = trading_session(&state, "NYE", date(2021, 1, 4)).unwrap();
        assert_eq!(session.open.to_string(), "2021-01-04 09:30:00");
        assert_eq!(session.close.to_string(), "2021-01-04 16:00:00");
        // 6.5 hours of seconds, endpoints included.
        assert_eq!(session.seconds_index().len(), 6 * 3600 + 1800 + 1);
    }

    #[test]
    fn test_session_fails_on_closed_days() {
        let (_dir, state) = test_state();
        assert!(trading_session(&state, "NYE", date(2021, 1, 2)).is_err()); // Saturday
        assert!(trading_session(&state, "NYE", date(2021, 1, 18)).is_err()); // MLK Day
    }
}
