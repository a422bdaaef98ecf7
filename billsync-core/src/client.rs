use std::time::{Duration, SystemTime};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.billsync.app";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl ApiError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ApiError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // Transport failures cover refused connections and timeouts.
            ApiError::Request(_) => true,
            ApiError::Url(_) => false,
            ApiError::Api { .. } => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ApiError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Clone)]
pub struct BillsyncClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl BillsyncClient {
    pub fn new(token: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn create_record(
        &self,
        table: &str,
        payload: &serde_json::Value,
    ) -> Result<RemoteRecord, ApiError> {
        let url = self.endpoint(&format!("/v1/{table}"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(payload)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn update_record(
        &self,
        table: &str,
        row_id: &str,
        payload: &serde_json::Value,
    ) -> Result<RemoteRecord, ApiError> {
        let url = self.endpoint(&format!("/v1/{table}/{row_id}"))?;
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .json(payload)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    // The backend treats a missing row as already deleted, so replaying a
    // delete is safe.
    pub async fn delete_record(&self, table: &str, row_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("/v1/{table}/{row_id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::api_error(response).await)
    }

    // The backend applies the batch in order and reports failures per item.
    pub async fn submit_batch(&self, records: &[SyncRecord]) -> Result<BatchOutcome, ApiError> {
        let url = self.endpoint("/v1/sync/batch")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&BatchRequest { operations: records })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn health(&self) -> Result<(), ApiError> {
        let url = self.endpoint("/v1/health")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::api_error(response).await)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        ApiError::Api {
            status,
            body,
            retry_after,
        }
    }
}

// Retry-After arrives either as delta-seconds or as an HTTP-date.
fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(SystemTime::now())
        .ok()
        .map(|delta| delta.as_secs())
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default)]
    pub revision: Option<u64>,
    #[serde(default)]
    pub synced_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncRecord {
    pub table: String,
    pub row_id: String,
    pub action: RecordAction,
    pub payload: serde_json::Value,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    operations: &'a [SyncRecord],
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BatchOutcome {
    pub applied: u32,
    #[serde(default)]
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BatchFailure {
    pub index: u32,
    pub error: String,
}
