//! Client for the remote patta persistence service.
//!
//! | Operation        | Request                                   |
//! |------------------|-------------------------------------------|
//! | `upload`         | `POST /upload` (multipart `file`, `type`) |
//! | `save_patta`     | `POST /patta`                             |
//! | `get_patta`      | `GET /patta/{id}`                         |
//! | `update_patta`   | `PUT /patta/{id}`                         |
//! | `delete_patta`   | `DELETE /patta/{id}`                      |
//! | `list_pattas`    | `GET /pattas?limit=&offset=`              |
//! | `search_pattas`  | `GET /pattas/search?q=&village=&…`        |
//! | `health_check`   | `GET /health` (unauthenticated)           |
//!
//! Network errors, 5xx and 429 are retried with the shared backoff policy.
//! Other 4xx answers and unreadable bodies fail at once. A body carrying
//! `"success": false` becomes [`PersistenceError::Rejected`].
//!
//! Deployments disagree on key casing, so replies are read in either
//! `camelCase` or `snake_case`.

use crate::error::PersistenceError;
use crate::output::{ClaimType, PattaRecord};
use crate::pipeline::retry::{retry, Failure, RetryPolicy};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const SAVE_SOURCE: &str = "ocr_ner_extraction";
const UPLOAD_TYPE: &str = "patta_document";

// ── Wire types ───────────────────────────────────────────────────────────

/// Reply to `upload`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    #[serde(alias = "fileId")]
    pub file_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// One page of `list_pattas`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PattaPage {
    #[serde(default, alias = "pattas")]
    pub records: Vec<PattaRecord>,
    #[serde(default)]
    pub total: u64,
    #[serde(default, alias = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SearchResults {
    #[serde(default, alias = "pattas")]
    pub records: Vec<PattaRecord>,
    #[serde(default)]
    pub total: u64,
}

/// Optional narrowing for `search_pattas`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub village: Option<String>,
    pub district: Option<String>,
    pub claim_type: Option<ClaimType>,
}

impl SearchFilters {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(ref v) = self.village {
            pairs.push(("village", v.clone()));
        }
        if let Some(ref d) = self.district {
            pairs.push(("district", d.clone()));
        }
        if let Some(c) = self.claim_type.filter(|c| !c.is_unspecified()) {
            pairs.push(("claim_type", c.as_str().to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    #[serde(default)]
    pub ocr: bool,
    #[serde(default)]
    pub ner: bool,
    #[serde(default)]
    pub database: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(default)]
    pub services: ServiceHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthReport {
    fn unhealthy(message: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            services: ServiceHealth::default(),
            message: Some(message),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// `{success, pattaId | message}` and friends.
#[derive(Debug, Deserialize)]
struct Ack {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default, alias = "pattaId")]
    patta_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordEnvelope {
    Wrapped {
        #[serde(alias = "pattaData")]
        patta_data: PattaRecord,
    },
    Bare(PattaRecord),
}

#[derive(Serialize)]
struct SaveRequest<'a> {
    patta_data: &'a PattaRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_id: Option<&'a str>,
    source: &'static str,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    patta_data: &'a PattaRecord,
}

// ── Attempt classification ───────────────────────────────────────────────

#[derive(Debug)]
enum AttemptError {
    Transport(String),
    Status(StatusCode, String),
    Decode(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(m) | AttemptError::Decode(m) => f.write_str(m),
            AttemptError::Status(status, body) if body.is_empty() => write!(f, "HTTP {status}"),
            AttemptError::Status(status, body) => write!(f, "HTTP {status}: {body}"),
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let body = body.trim();
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

// ── Client ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PattaStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl PattaStore {
    /// Client for `base_url` (e.g. `http://host:5000/api`).
    pub fn new(
        base_url: impl Into<String>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PersistenceError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            policy,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into()).filter(|k: &String| !k.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload the source document. Returns the service's file id.
    pub async fn upload(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadReceipt, PersistenceError> {
        let receipt: UploadReceipt = self
            .execute("upload", true, || {
                let part = Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
                let form = Form::new().part("file", part).text("type", UPLOAD_TYPE);
                self.request(Method::POST, "/upload", true).multipart(form)
            })
            .await?;
        info!("Uploaded '{}' as {}", file_name, receipt.file_id);
        Ok(receipt)
    }

    /// Store a record, optionally linked to an uploaded file. Returns the patta id.
    pub async fn save_patta(
        &self,
        record: &PattaRecord,
        file_id: Option<&str>,
    ) -> Result<String, PersistenceError> {
        let body = SaveRequest {
            patta_data: record,
            file_id,
            source: SAVE_SOURCE,
        };
        let ack: Ack = self
            .execute("save_patta", true, || {
                self.request(Method::POST, "/patta", true).json(&body)
            })
            .await?;
        let patta_id = accepted("save_patta", ack)?.ok_or_else(|| {
            PersistenceError::InvalidResponse {
                operation: "save_patta",
                detail: "reply carried no patta id".to_string(),
            }
        })?;
        info!("Saved patta {}", patta_id);
        Ok(patta_id)
    }

    pub async fn get_patta(&self, patta_id: &str) -> Result<PattaRecord, PersistenceError> {
        let path = format!("/patta/{patta_id}");
        let envelope: RecordEnvelope = self
            .execute("get_patta", true, || self.request(Method::GET, &path, true))
            .await?;
        Ok(match envelope {
            RecordEnvelope::Wrapped { patta_data } => patta_data,
            RecordEnvelope::Bare(record) => record,
        })
    }

    pub async fn update_patta(
        &self,
        patta_id: &str,
        record: &PattaRecord,
    ) -> Result<(), PersistenceError> {
        let path = format!("/patta/{patta_id}");
        let body = UpdateRequest { patta_data: record };
        let ack: Ack = self
            .execute("update_patta", true, || {
                self.request(Method::PUT, &path, true).json(&body)
            })
            .await?;
        accepted("update_patta", ack).map(drop)
    }

    pub async fn delete_patta(&self, patta_id: &str) -> Result<(), PersistenceError> {
        let path = format!("/patta/{patta_id}");
        let ack: Ack = self
            .execute("delete_patta", true, || {
                self.request(Method::DELETE, &path, true)
            })
            .await?;
        accepted("delete_patta", ack).map(drop)
    }

    pub async fn list_pattas(&self, limit: u32, offset: u32) -> Result<PattaPage, PersistenceError> {
        self.execute("list_pattas", true, || {
            self.request(Method::GET, "/pattas", true)
                .query(&[("limit", limit), ("offset", offset)])
        })
        .await
    }

    pub async fn search_pattas(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<SearchResults, PersistenceError> {
        let mut params = vec![("q", query.to_string())];
        params.extend(filters.query_pairs());
        self.execute("search_pattas", true, || {
            self.request(Method::GET, "/pattas/search", true).query(&params)
        })
        .await
    }

    /// Never fails: an unreachable or misbehaving service is reported as
    /// `unhealthy` with every service down.
    pub async fn health_check(&self) -> HealthReport {
        match self
            .execute::<HealthReport, _>("health_check", false, || {
                self.request(Method::GET, "/health", false)
            })
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!("Persistence service health check failed: {}", e);
                HealthReport::unhealthy(e.to_string())
            }
        }
    }

    fn request(&self, method: Method, path: &str, auth: bool) -> RequestBuilder {
        let request = self.client.request(method, format!("{}{}", self.base_url, path));
        match self.api_key {
            Some(ref key) if auth => request.bearer_auth(key),
            _ => request,
        }
    }

    /// Send the request built by `build`, retrying transient failures, and
    /// decode the JSON reply.
    async fn execute<T, F>(
        &self,
        operation: &'static str,
        log_attempts: bool,
        build: F,
    ) -> Result<T, PersistenceError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder + Sync,
    {
        let build = &build;
        let result = retry(&self.policy, operation, |attempt| async move {
            if log_attempts {
                debug!("{} (attempt {})", operation, attempt);
            }
            let response = build()
                .send()
                .await
                .map_err(|e| Failure::Transient(AttemptError::Transport(e.to_string())))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| Failure::Transient(AttemptError::Transport(e.to_string())))?;
            if !status.is_success() {
                let error = AttemptError::Status(status, snippet(&text));
                return Err(if is_retryable(status) {
                    Failure::Transient(error)
                } else {
                    Failure::Permanent(error)
                });
            }
            serde_json::from_str::<T>(&text)
                .map_err(|e| Failure::Permanent(AttemptError::Decode(e.to_string())))
        })
        .await;

        result.map_err(|exhausted| match exhausted.error {
            AttemptError::Decode(detail) => PersistenceError::InvalidResponse { operation, detail },
            error => PersistenceError::RequestFailed {
                operation,
                attempts: exhausted.attempts,
                detail: error.to_string(),
            },
        })
    }
}

/// Turn `success: false` into `Rejected`; otherwise hand back the patta id.
fn accepted(operation: &'static str, ack: Ack) -> Result<Option<String>, PersistenceError> {
    if ack.success {
        Ok(ack.patta_id)
    } else {
        Err(PersistenceError::Rejected {
            operation,
            message: ack.message.unwrap_or_else(|| "no reason given".to_string()),
        })
    }
}
