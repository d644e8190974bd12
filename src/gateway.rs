//! Signed REST gateway. Owns the request signing, status classification
//! and bounded retry policy; also hands out the authenticated handshake
//! for the one streaming connection per session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use sha2::Sha256;

use crate::config::Settings;
use crate::errors::ExchangeError;
use crate::ops::Metrics;
use crate::stream::StreamClient;
use crate::sync::TableSynchronizer;

type HmacSha256 = Hmac<Sha256>;

/// Unix seconds provider; swappable in tests to pin signatures.
pub type TimestampFn = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct ExchangeGateway {
    settings: Settings,
    http: Client,
    timestamp_fn: TimestampFn,
    metrics: Option<Metrics>,
}

impl ExchangeGateway {
    /// Build the gateway and its single shared connection pool.
    pub fn new(settings: &Settings) -> Result<Self, ExchangeError> {
        let mut builder = Client::builder();
        if let Some(proxy) = &settings.http_proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|err| ExchangeError::BadRequest(format!("invalid proxy: {err}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|err| ExchangeError::Transient(err.to_string()))?;
        Ok(Self {
            settings: settings.clone(),
            http,
            timestamp_fn: Arc::new(unix_now_secs),
            metrics: None,
        })
    }

    pub fn with_timestamp_fn(mut self, timestamp_fn: TimestampFn) -> Self {
        self.timestamp_fn = timestamp_fn;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn expires(&self) -> i64 {
        (self.timestamp_fn)() + self.settings.auth_expiry_margin_secs
    }

    /// Signed headers for the streaming handshake; the stream client owns
    /// the socket, the gateway owns the credentials.
    pub fn ws_auth_headers(&self) -> Vec<(&'static str, String)> {
        let expires = self.expires();
        let signature = sign_payload(
            &self.settings.credentials.api_secret,
            &format!("GET/realtime{expires}"),
        );
        vec![
            ("api-key", self.settings.credentials.api_key.clone()),
            ("api-expires", expires.to_string()),
            ("api-signature", signature),
        ]
    }

    /// Open the session's single streaming connection. The stream client
    /// owns the socket and its tasks; the gateway owns the credentials.
    pub async fn connect_stream(
        &self,
        sync: Arc<Mutex<TableSynchronizer>>,
        metrics: Option<Metrics>,
    ) -> anyhow::Result<StreamClient> {
        StreamClient::connect(self, sync, metrics).await
    }

    pub async fn get(&self, path: &str, query: Vec<(String, String)>) -> Result<Value, ExchangeError> {
        self.call(Method::GET, path, query, None, None, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ExchangeError> {
        self.call(Method::POST, path, Vec::new(), Some(body), None, None)
            .await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, ExchangeError> {
        self.call(Method::PUT, path, Vec::new(), Some(body), None, None)
            .await
    }

    pub async fn delete(
        &self,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<Value, ExchangeError> {
        self.call(Method::DELETE, path, query, None, None, None).await
    }

    /// Issue one signed REST call.
    ///
    /// `max_retries` bounds retries of transient faults (503 and network
    /// errors). When `None`, GET and DELETE get the configured default
    /// budget; POST and PUT get zero, because resubmitting an
    /// order-mutating call risks duplicate execution. Retries decrement
    /// an explicit budget in a loop; nothing here ever sleeps.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<&Value>,
        timeout: Option<Duration>,
        max_retries: Option<u32>,
    ) -> Result<Value, ExchangeError> {
        let mut budget = max_retries.unwrap_or_else(|| self.default_retries(&method));
        let body_str = body.map(|v| v.to_string());
        let path_q = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, canonical_query(&query))
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self
                .attempt(&method, &path_q, body_str.as_deref(), timeout)
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if budget == 0 {
                        let max_retry = ExchangeError::MaxRetry {
                            attempts,
                            last: err.to_string(),
                        };
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_rest_failure(max_retry.reason_label());
                        }
                        return Err(max_retry);
                    }
                    budget -= 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_rest_retry();
                    }
                }
                Err(err) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_rest_failure(err.reason_label());
                    }
                    return Err(err);
                }
            }
        }
    }

    fn default_retries(&self, method: &Method) -> u32 {
        // GET and DELETE are idempotent here; mutating verbs are not.
        if *method == Method::GET || *method == Method::DELETE {
            self.settings.default_retries
        } else {
            0
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        path_q: &str,
        body: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Value, ExchangeError> {
        let expires = self.expires();
        let payload = format!(
            "{}{}{}{}",
            method.as_str(),
            path_q,
            expires,
            body.unwrap_or("")
        );
        let signature = sign_payload(&self.settings.credentials.api_secret, &payload);

        let url = format!("{}{}", self.settings.rest_url, path_q);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("api-key", &self.settings.credentials.api_key)
            .header("api-expires", expires.to_string())
            .header("api-signature", signature);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ExchangeError::Transient(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|err| ExchangeError::Transient(err.to_string()))?;
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|err| ExchangeError::BadRequest(format!("invalid response body: {err}")));
        }

        let reset_header = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let body_text = response.text().await.unwrap_or_default();
        Err(self.classify(status, method, reset_header, body_text))
    }

    fn classify(
        &self,
        status: StatusCode,
        method: &Method,
        reset_header: Option<i64>,
        body: String,
    ) -> ExchangeError {
        let message = error_message(&body);
        match status.as_u16() {
            400 => {
                let lower = message.to_lowercase();
                if lower.contains("insufficient")
                    && (lower.contains("balance") || lower.contains("margin"))
                {
                    ExchangeError::MarginNotEnough(message)
                } else {
                    ExchangeError::BadRequest(message)
                }
            }
            401 => ExchangeError::Auth(message),
            403 => ExchangeError::Forbidden(message),
            404 => ExchangeError::NotFound {
                message,
                // A DELETE target that is gone was already canceled or
                // filled; callers may treat that as done.
                already_gone: *method == Method::DELETE,
            },
            429 => {
                let now = (self.timestamp_fn)();
                let reset_after_secs = reset_header
                    .map(|reset| (reset - now).max(0) as u64)
                    .unwrap_or(0);
                ExchangeError::RateLimited { reset_after_secs }
            }
            503 => ExchangeError::Transient(message),
            code => ExchangeError::Http {
                status: code,
                body: message,
            },
        }
    }
}

pub fn sign_payload(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn canonical_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_component(raw: &str) -> String {
    raw.as_bytes()
        .iter()
        .map(|b| {
            let c = *b as char;
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Structured error bodies look like `{"error": {"message": "..."}}`;
/// anything else is passed through verbatim.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn unix_now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
