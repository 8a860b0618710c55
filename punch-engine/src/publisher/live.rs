//! Live-results HTTP sink.
//!
//! Posts each published result as a small JSON document to a live-results
//! service. The service authenticates with a `pwd` header and answers
//! `OK` on success or `BADPWD` for a wrong key.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Timelike;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::debug;

use crate::domain::{PunchTime, RunResult};

use super::{ResultSink, SinkError};

/// Configuration for the live-results sink.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct LiveResultsConfig {
    /// Endpoint results are posted to.
    pub url: String,
    /// Key sent in the `pwd` header.
    pub api_key: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl LiveResultsConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout_secs: default_timeout(),
        }
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Body posted for one result. Times are in tenths of a second; the start
/// counts from midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveResult {
    pub card: u32,
    pub stat: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub st: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rt: Option<i64>,
}

impl From<&RunResult> for LiveResult {
    fn from(result: &RunResult) -> Self {
        Self {
            card: result.card_id.get(),
            stat: result.status.live_code(),
            st: result.start_time.map(tenths_since_midnight),
            rt: result.total_time.map(|t| t.num_milliseconds() / 100),
        }
    }
}

fn tenths_since_midnight(t: PunchTime) -> i64 {
    let time = t.time();
    i64::from(time.num_seconds_from_midnight()) * 10 + i64::from(time.nanosecond() / 100_000_000)
}

/// Sink posting results to a live-results service.
#[derive(Debug, Clone)]
pub struct LiveResultsSink {
    http: reqwest::Client,
    url: String,
}

impl LiveResultsSink {
    pub fn new(config: LiveResultsConfig) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| SinkError::Config("API key is not a valid header value".into()))?;
        headers.insert("pwd", key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: config.url,
        })
    }
}

#[async_trait]
impl ResultSink for LiveResultsSink {
    fn name(&self) -> &str {
        "live-results"
    }

    async fn deliver(&self, result: &RunResult) -> Result<(), SinkError> {
        let body = LiveResult::from(result);
        let response = self.http.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SinkError::Unauthorized);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.contains("BADPWD") {
            return Err(SinkError::Unauthorized);
        }

        debug!(card = body.card, stat = body.stat, "posted live result");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardId, RunId, RunStatus};
    use chrono::{NaiveDate, TimeZone, Utc};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn result(status: RunStatus) -> RunResult {
        let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
        RunResult {
            run_id: RunId(7),
            card_id: CardId::new(7203463).unwrap(),
            status,
            splits: vec![],
            controls: vec![],
            extra_punches: vec![],
            start_time: Some(PunchTime::parse_hms("10:00:00", date).unwrap()),
            finish_time: None,
            total_time: Some(chrono::Duration::milliseconds(1_234_567)),
            read_errors: BTreeSet::new(),
            readout_at: Utc.with_ymd_and_hms(2026, 5, 9, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn payload_uses_tenths() {
        let body = LiveResult::from(&result(RunStatus::MisPunch));
        assert_eq!(body.card, 7203463);
        assert_eq!(body.stat, 3);
        assert_eq!(body.st, Some(360_000));
        assert_eq!(body.rt, Some(12_345));
    }

    #[tokio::test]
    async fn posts_result_with_key() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/results")
                .header("pwd", "secret")
                .json_body(json!({"card": 7203463, "stat": 1, "st": 360000, "rt": 12345}));
            then.status(200).body("OK");
        });

        let sink = LiveResultsSink::new(LiveResultsConfig::new(server.url("/results"), "secret"))
            .unwrap();
        sink.deliver(&result(RunStatus::Ok)).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn bad_key_is_unauthorized() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/results");
            then.status(200).body("BADPWD");
        });

        let sink = LiveResultsSink::new(LiveResultsConfig::new(server.url("/results"), "wrong"))
            .unwrap();
        let err = sink.deliver(&result(RunStatus::Ok)).await.unwrap_err();
        assert!(matches!(err, SinkError::Unauthorized));
    }

    #[tokio::test]
    async fn server_error_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/results");
            then.status(503).body("down");
        });

        let sink = LiveResultsSink::new(LiveResultsConfig::new(server.url("/results"), "k"))
            .unwrap();
        let err = sink.deliver(&result(RunStatus::Ok)).await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected { status: 503, .. }));
    }

    #[test]
    fn invalid_key_rejected_at_construction() {
        let err = LiveResultsSink::new(LiveResultsConfig::new("http://x", "bad\nkey")).unwrap_err();
        assert!(matches!(err, SinkError::Config(_)));
    }
}
