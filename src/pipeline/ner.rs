//! Entity extraction against the remote NER service.
//!
//! Two endpoints are used:
//!
//! * `POST {base}/ner` with `{text, locale}`: general-purpose NER.
//! * `POST {base}/ner/patta` with `{text, schema, languages}`: a model
//!   trained on land records. When it fails the general call is tried.
//!
//! Every network error and non-2xx status counts as transient and is retried
//! with exponential backoff; only the final failure surfaces as an
//! [`ExtractionError`]. A 2xx body that is not the expected JSON is not
//! retried.

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::output::EntitySpan;
use crate::pipeline::retry::{retry, Failure, RetryPolicy};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything that can turn OCR text into entity spans.
pub trait EntitySource: Send + Sync {
    fn extract<'a>(
        &'a self,
        text: &'a str,
        locale: &'a str,
    ) -> BoxFuture<'a, Result<Vec<EntitySpan>, ExtractionError>>;
}

/// Wire shape of a NER reply. Older deployments send `spans`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NerResponse {
    #[serde(default, alias = "spans")]
    pub entities: Vec<EntitySpan>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub language: Option<String>,
    /// Seconds spent by the service.
    #[serde(default)]
    pub processing_time: f64,
}

#[derive(Serialize)]
struct GeneralRequest<'a> {
    text: &'a str,
    locale: &'a str,
}

#[derive(Serialize)]
struct DomainRequest<'a> {
    text: &'a str,
    schema: &'a str,
    languages: &'a [String],
}

/// Failure of one HTTP attempt.
#[derive(Debug)]
enum AttemptError {
    Transport(String),
    Decode(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(m) | AttemptError::Decode(m) => f.write_str(m),
        }
    }
}

/// HTTP client for the NER service.
#[derive(Debug, Clone)]
pub struct HttpEntityExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    schema: Option<String>,
    languages: Vec<String>,
    policy: RetryPolicy,
}

impl HttpEntityExtractor {
    /// General-only extractor for `base_url` (e.g. `http://host:8000/api`).
    pub fn new(
        base_url: impl Into<String>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            schema: None,
            languages: Vec::new(),
            policy,
        })
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &ExtractionConfig) -> Result<Option<Self>, ExtractionError> {
        let Some(ref endpoint) = config.ner_endpoint else {
            return Ok(None);
        };
        let mut extractor = Self::new(
            endpoint.as_str(),
            config.retry_policy(),
            Duration::from_secs(config.ner_timeout_secs),
        )?;
        extractor.api_key = config.ner_api_key.clone();
        if let Some(ref schema) = config.ner_schema {
            extractor = extractor.with_schema(schema.as_str(), config.languages.iso_codes());
        }
        Ok(Some(extractor))
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Try the domain-schema endpoint first, with these ISO 639-1 languages.
    pub fn with_schema(mut self, schema: impl Into<String>, languages: Vec<String>) -> Self {
        self.schema = Some(schema.into());
        self.languages = languages;
        self
    }

    /// `POST {base}/ner`.
    pub async fn extract_general(
        &self,
        text: &str,
        locale: &str,
    ) -> Result<NerResponse, ExtractionError> {
        self.post("/ner", &GeneralRequest { text, locale }).await
    }

    /// `POST {base}/ner/patta`. Errors if no schema is configured.
    pub async fn extract_domain(&self, text: &str) -> Result<NerResponse, ExtractionError> {
        let schema = self
            .schema
            .as_deref()
            .ok_or_else(|| ExtractionError::Client("no domain schema configured".into()))?;
        let body = DomainRequest {
            text,
            schema,
            languages: &self.languages,
        };
        self.post(&format!("/ner/{schema}"), &body).await
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<NerResponse, ExtractionError> {
        let url = format!("{}{}", self.base_url, path);
        let what = format!("NER {path}");
        let (client, api_key, url_ref) = (&self.client, self.api_key.as_deref(), url.as_str());

        let result = retry(&self.policy, &what, |attempt| async move {
            debug!("POST {} (attempt {})", url_ref, attempt);
            let mut request = client.post(url_ref).json(body);
            if let Some(key) = api_key {
                request = request.bearer_auth(key);
            }
            let response = request
                .send()
                .await
                .map_err(|e| Failure::Transient(AttemptError::Transport(e.to_string())))?;
            let status = response.status();
            if !status.is_success() {
                return Err(Failure::Transient(AttemptError::Transport(format!(
                    "HTTP {status}"
                ))));
            }
            let text = response
                .text()
                .await
                .map_err(|e| Failure::Transient(AttemptError::Transport(e.to_string())))?;
            serde_json::from_str::<NerResponse>(&text)
                .map_err(|e| Failure::Permanent(AttemptError::Decode(e.to_string())))
        })
        .await;

        match result {
            Ok(response) => {
                debug!(
                    "NER {}: {} entities ({:.2}s server time)",
                    path,
                    response.entities.len(),
                    response.processing_time
                );
                Ok(response)
            }
            Err(exhausted) => Err(match exhausted.error {
                AttemptError::Decode(detail) => ExtractionError::InvalidResponse { detail },
                AttemptError::Transport(detail) => ExtractionError::Exhausted {
                    attempts: exhausted.attempts,
                    detail,
                },
            }),
        }
    }

    async fn extract_spans(&self, text: &str, locale: &str) -> Result<Vec<EntitySpan>, ExtractionError> {
        if self.schema.is_some() {
            match self.extract_domain(text).await {
                Ok(response) => return Ok(response.entities),
                Err(e) => warn!("Domain NER failed ({}); falling back to general NER", e),
            }
        }
        let response = self.extract_general(text, locale).await?;
        info!("NER returned {} entities", response.entities.len());
        Ok(response.entities)
    }
}

impl EntitySource for HttpEntityExtractor {
    fn extract<'a>(
        &'a self,
        text: &'a str,
        locale: &'a str,
    ) -> BoxFuture<'a, Result<Vec<EntitySpan>, ExtractionError>> {
        self.extract_spans(text, locale).boxed()
    }
}
