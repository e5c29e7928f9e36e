use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, StatusCode};

use crate::error::PresenceError;

use super::sink::{AttendanceHistory, DailyRecordSubmission, RemoteSink, SinkAck};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Attendance backend reached over HTTPS.
pub struct HttpSink {
    client: Client,
    base_url: String,
}

impl HttpSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PresenceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PresenceError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn submit_url(&self) -> String {
        format!("{}/api/user/mark_attendance", self.base_url)
    }

    pub fn history_url(&self, employee_id: &str) -> String {
        format!("{}/api/user/get_attendance/{}", self.base_url, employee_id)
    }
}

async fn failure_for(status: StatusCode, resp: reqwest::Response) -> PresenceError {
    let text = resp.text().await.unwrap_or_default();
    PresenceError::SyncFailure(format!("attendance backend returned HTTP {status}: {text}"))
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn submit_daily_record(
        &self,
        submission: &DailyRecordSubmission,
    ) -> Result<SinkAck, PresenceError> {
        let resp = self
            .client
            .post(self.submit_url())
            .header(IDEMPOTENCY_HEADER, submission.flush_id.to_string())
            .json(submission)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let err = failure_for(status, resp).await;
            warn!("daily record for {} rejected: {err}", submission.date);
            return Err(err);
        }

        // Some deployments answer with an empty body.
        let text = resp.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        info!(
            "daily record for {} accepted ({} min)",
            submission.date, submission.total_minutes
        );
        Ok(SinkAck {
            status: status.as_u16(),
            body,
        })
    }

    async fn fetch_history(&self, employee_id: &str) -> Result<AttendanceHistory, PresenceError> {
        let resp = self.client.get(self.history_url(employee_id)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(failure_for(status, resp).await);
        }
        resp.json::<AttendanceHistory>()
            .await
            .map_err(|err| PresenceError::SyncFailure(format!("malformed attendance history: {err}")))
    }
}
