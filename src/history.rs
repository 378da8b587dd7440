use crate::store::{HistoryQuery, SampleStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid start {0:?}; expected -<n><unit>, RFC 3339 or epoch milliseconds")]
    InvalidStart(String),
    #[error("invalid aggregation window {0:?}; expected <n><unit> with unit s, m, h, d or w")]
    InvalidWindow(String),
    #[error("sample store read failed: {0}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub ts: i64,
    pub value: f64,
}

/// Answers `(resource, start, window)` requests with mean-aggregated points, oldest first.
#[derive(Clone)]
pub struct HistoryService {
    store: SampleStore,
    limit: usize,
}

impl HistoryService {
    pub fn new(store: SampleStore, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn get_samples(
        &self,
        resource: &str,
        start: &str,
        aggr_window: &str,
    ) -> Result<Vec<HistoryPoint>, HistoryError> {
        self.get_samples_at(resource, start, aggr_window, Utc::now().timestamp_millis())
            .await
    }

    pub async fn get_samples_at(
        &self,
        resource: &str,
        start: &str,
        aggr_window: &str,
        now_ms: i64,
    ) -> Result<Vec<HistoryPoint>, HistoryError> {
        let query = HistoryQuery {
            measure: resource.to_string(),
            start_ms: parse_start(start, now_ms)?,
            window_ms: parse_window(aggr_window)?,
            limit: self.limit,
        };
        let rows = self.store.read(&query).await?;
        tracing::debug!(
            resource,
            start_ms = query.start_ms,
            window_ms = query.window_ms,
            rows = rows.len(),
            "served history query"
        );
        Ok(rows
            .into_iter()
            .map(|row| HistoryPoint {
                ts: row.timestamp_ms,
                value: row.value,
            })
            .collect())
    }
}

/// `<n><unit>` to milliseconds; `n` must be a positive integer.
pub fn parse_window(raw: &str) -> Result<i64, HistoryError> {
    duration_ms(raw.trim()).ok_or_else(|| HistoryError::InvalidWindow(raw.to_string()))
}

/// Resolves a start reference against `now_ms`: `-3h` style offsets, `now`, epoch milliseconds
/// or an RFC 3339 timestamp.
pub fn parse_start(raw: &str, now_ms: i64) -> Result<i64, HistoryError> {
    let trimmed = raw.trim();
    let invalid = || HistoryError::InvalidStart(raw.to_string());
    let start_ms = if trimmed.eq_ignore_ascii_case("now") {
        now_ms
    } else if let Some(offset) = trimmed.strip_prefix('-') {
        let ms = duration_ms(offset).ok_or_else(invalid)?;
        now_ms.saturating_sub(ms)
    } else if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        trimmed.parse::<i64>().map_err(|_| invalid())?
    } else {
        DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
            .map_err(|_| invalid())?
    };
    // Anything chrono cannot represent would reach the database as the epoch.
    DateTime::<Utc>::from_timestamp_millis(start_ms)
        .map(|_| start_ms)
        .ok_or_else(invalid)
}

fn duration_ms(raw: &str) -> Option<i64> {
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split);
    let amount = digits.parse::<i64>().ok().filter(|n| *n > 0)?;
    let unit_ms: i64 = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return None,
    };
    amount.checked_mul(unit_ms)
}
