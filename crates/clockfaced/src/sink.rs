//! External report sink (spreadsheet-style append-only log).

use async_trait::async_trait;
use clockface_core::ExportRow;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sink returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("sink call timed out after {0:?}")]
    Timeout(Duration),
}

/// Append-only tabular log keyed by a range / sheet identifier.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// False when no sink is configured; writes are then no-ops.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn append(&self, row: &ExportRow) -> Result<(), SinkError>;

    async fn read_all(&self) -> Result<Vec<Vec<String>>, SinkError>;
}

/// Sink used when no spreadsheet is configured.
pub struct DisabledSink;

#[async_trait]
impl ReportSink for DisabledSink {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn append(&self, row: &ExportRow) -> Result<(), SinkError> {
        tracing::debug!(employee_id = %row.employee_id, "report sink not configured; skipping append");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Vec<String>>, SinkError> {
        Ok(Vec::new())
    }
}

/// Client for a Sheets-style `values` API.
///
/// - append: `POST {base}/spreadsheets/{id}/values/{range}:append?valueInputOption=USER_ENTERED`
/// - read:   `GET {base}/spreadsheets/{id}/values/{range}`
pub struct SheetsSink {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    range: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl SheetsSink {
    pub fn new(
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            token,
        })
    }

    fn values_url(&self) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url, self.spreadsheet_id, self.range
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ReportSink for SheetsSink {
    async fn append(&self, row: &ExportRow) -> Result<(), SinkError> {
        let url = format!("{}:append", self.values_url());
        let req = self
            .client
            .post(url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": [row.cells()] }));
        Self::check(self.authorize(req).send().await?).await?;
        tracing::debug!(employee_id = %row.employee_id, range = %self.range, "row appended to sheet");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Vec<String>>, SinkError> {
        let req = self.client.get(self.values_url());
        let response = Self::check(self.authorize(req).send().await?).await?;
        let range: ValueRange = response.json().await?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}

fn cell_to_string(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clockface_core::AttendanceKind;

    #[tokio::test]
    async fn test_disabled_sink_is_noop() {
        let sink = DisabledSink;
        assert!(!sink.is_enabled());
        let row = ExportRow {
            employee_id: "E1".into(),
            name: "Ada".into(),
            kind: AttendanceKind::CheckIn,
            timestamp: Utc::now(),
        };
        assert!(sink.append(&row).await.is_ok());
        assert!(sink.read_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_values_url() {
        let sink = SheetsSink::new(
            "https://sheets.example.test/v4/",
            "abc123",
            "Sheet1!A:D",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(sink.is_enabled());
        assert_eq!(
            sink.values_url(),
            "https://sheets.example.test/v4/spreadsheets/abc123/values/Sheet1!A:D"
        );
    }

    #[test]
    fn test_value_range_parsing() {
        let range: ValueRange = serde_json::from_str(
            r#"{"range": "Sheet1!A1:D2", "values": [["E1", "Ada", "CHECK_IN", "2026-01-01"], ["E2", 42, null]]}"#,
        )
        .unwrap();
        let rows: Vec<Vec<String>> = range
            .values
            .into_iter()
            .map(|r| r.into_iter().map(cell_to_string).collect())
            .collect();
        assert_eq!(rows[0], vec!["E1", "Ada", "CHECK_IN", "2026-01-01"]);
        assert_eq!(rows[1], vec!["E2", "42", ""]);

        let empty: ValueRange = serde_json::from_str(r#"{"range": "Sheet1!A:D"}"#).unwrap();
        assert!(empty.values.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_sheet_is_error() {
        let sink = SheetsSink::new(
            "http://127.0.0.1:9",
            "abc",
            "Sheet1!A:D",
            Some("token".into()),
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(matches!(sink.read_all().await, Err(SinkError::Http(_))));
    }
}
