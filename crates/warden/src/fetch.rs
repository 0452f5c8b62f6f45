//! The controlled fetch facade - the only network primitive scripts see.
//!
//! The real implementation checks every destination against the egress
//! guard, applies a fixed per-request timeout independent of the script's
//! overall budget, normalizes the response shape, and leaves a redacted
//! audit record. The validation doubles let the pipeline exercise a script
//! against both a healthy and a failing network without touching one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::audit::{AuditSink, FetchAuditRecord, TracingAuditSink};
use crate::guard::{self, EgressError};

/// Fixed per-request timeout, independent of the harness budget.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Options a script may pass as the second `fetch` argument.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchOptions {
    /// HTTP method, GET when absent
    pub method: Option<String>,
    /// Request headers
    pub headers: Option<BTreeMap<String, String>>,
    /// Request body
    pub body: Option<String>,
}

/// Normalized response handed back into the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Response body as text
    pub body: String,
}

/// Failure modes of a controlled fetch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The egress guard refused the destination.
    #[error("{0}")]
    Blocked(#[from] EgressError),
    /// The per-invocation call budget is exhausted.
    #[error("fetch call budget of {max} exhausted")]
    BudgetExceeded {
        /// The configured ceiling.
        max: u32,
    },
    /// The request did not complete within [`REQUEST_TIMEOUT`].
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The request failed for any other reason.
    #[error("request failed: {0}")]
    Request(String),
}

/// The network capability injected into a script invocation.
///
/// Implementations must be safe to share across invocations; per-invocation
/// state (the call budget) lives in the sandbox, not here.
#[async_trait]
pub trait FetchHandler: Send + Sync {
    /// Perform one guarded fetch.
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResponse, FetchError>;
}

/// Production fetch: egress guard, request timeout, redacted audit record.
pub struct GuardedFetch {
    client: reqwest::Client,
    timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for GuardedFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedFetch")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GuardedFetch {
    /// Create a production fetch handler with the default tracing audit sink.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_audit(Arc::new(TracingAuditSink))
    }

    /// Create a production fetch handler with a custom audit sink.
    pub fn with_audit(audit: Arc<dyn AuditSink>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self {
            client,
            timeout: REQUEST_TIMEOUT,
            audit,
        })
    }

    fn audit(&self, url: &Url, status: Option<u16>, started: Instant, error: Option<String>) {
        // Origin + path only. Query strings routinely carry credentials and
        // must never reach the audit log.
        self.audit.record(FetchAuditRecord {
            origin: url.origin().ascii_serialization(),
            path: url.path().to_string(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        });
    }
}

#[async_trait]
impl FetchHandler for GuardedFetch {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResponse, FetchError> {
        let url = guard::check_url(url).await?;
        let started = Instant::now();

        let method = match &options.method {
            Some(name) => reqwest::Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|_| FetchError::Request(format!("invalid method `{name}`")))?,
            None => reqwest::Method::GET,
        };

        let mut request = self
            .client
            .request(method, url.clone())
            .timeout(self.timeout);
        if let Some(headers) = &options.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                self.audit(&url, None, started, Some("timeout".to_string()));
                return Err(FetchError::Timeout(self.timeout));
            }
            Err(e) => {
                let message = e.to_string();
                self.audit(&url, None, started, Some(message.clone()));
                return Err(FetchError::Request(message));
            }
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let message = e.to_string();
                self.audit(&url, Some(status), started, Some(message.clone()));
                return Err(FetchError::Request(message));
            }
        };

        self.audit(&url, Some(status), started, None);
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

/// Validation double that always succeeds with a canned response.
#[derive(Debug, Clone)]
pub struct StaticFetch {
    /// Status returned for every call
    pub status: u16,
    /// Body returned for every call
    pub body: String,
}

impl Default for StaticFetch {
    fn default() -> Self {
        Self {
            status: 200,
            body: r#"{"ok":true}"#.to_string(),
        }
    }
}

#[async_trait]
impl FetchHandler for StaticFetch {
    async fn fetch(&self, _url: &str, _options: &FetchOptions) -> Result<FetchResponse, FetchError> {
        Ok(FetchResponse {
            status: self.status,
            headers: BTreeMap::new(),
            body: self.body.clone(),
        })
    }
}

/// Validation double that fails every call with a network error, the way an
/// unreachable upstream would.
#[derive(Debug, Clone, Default)]
pub struct FailingFetch;

#[async_trait]
impl FetchHandler for FailingFetch {
    async fn fetch(&self, _url: &str, _options: &FetchOptions) -> Result<FetchResponse, FetchError> {
        Err(FetchError::Request("network unreachable".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_static_fetch_succeeds() {
        let double = StaticFetch::default();
        let response = double
            .fetch("https://api.example.com/v1", &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_failing_fetch_fails() {
        let double = FailingFetch;
        let err = double
            .fetch("https://api.example.com/v1", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
        assert!(err.to_string().contains("network unreachable"));
    }

    #[tokio::test]
    async fn test_guarded_fetch_blocks_private_destination_and_audits_nothing() {
        #[derive(Default)]
        struct Capture(Mutex<Vec<FetchAuditRecord>>);
        impl AuditSink for Capture {
            fn record(&self, record: FetchAuditRecord) {
                if let Ok(mut records) = self.0.lock() {
                    records.push(record);
                }
            }
        }

        let capture = Arc::new(Capture::default());
        let fetch = GuardedFetch::with_audit(capture.clone()).unwrap();
        let err = fetch
            .fetch("http://10.1.2.3/internal", &FetchOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Blocked(_)), "got: {err:?}");
        // Guard rejections never reach the wire, so there is nothing to audit.
        assert!(capture.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fetch_options_accept_partial_json() {
        let options: FetchOptions =
            serde_json::from_str(r#"{"method":"post","body":"{}"}"#).unwrap();
        assert_eq!(options.method.as_deref(), Some("post"));
        assert!(options.headers.is_none());
    }
}
