use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::time::{Duration, sleep};

use crate::config::RetryConfig;
use crate::credentials::{CredentialPool, Lease};
use crate::limiter::RateLimiter;
use crate::metrics::{METRICS, bump};
use crate::providers::adapter::{ProviderAdapter, RequestSpec};
use crate::util::truncate_for_log;

/// Body excerpt length in warnings.
const LOG_BODY_CHARS: usize = 300;

// ------------------------------------------------------------
// HTTP transport
// ------------------------------------------------------------
//
// The executor only needs "GET url?params → status + body". Keeping
// that behind a trait lets the pipeline run against scripted
// responses in tests.
//

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport with a fixed per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        let url = reqwest::Url::parse_with_params(url, params)
            .map_err(|e| TransportError::Other(format!("invalid url {}: {}", url, e)))?;

        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(HttpResponse { status, body })
    }
}

// ------------------------------------------------------------
// Outcomes
// ------------------------------------------------------------

/// Final result of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A parsed JSON payload (successful or not, the adapter decides)
    Data(Value),

    /// The provider rejected the request shape (HTTP 400); nothing to page
    Empty,

    /// Every credential of the provider is exhausted
    QuotaFailure { credential_id: Option<i64> },

    /// Retries exhausted
    Fatal(String),
}

/// Classification of a single attempt.
enum Attempt {
    Data(Value),
    Empty,
    Quota,
    RateLimited,
    Transient(String),
}

/// Runs provider requests through admission control, the credential
/// pool and the retry policy.
///
/// One executor belongs to one provider collection and is driven
/// sequentially, so it holds the current credential lease by value.
///
/// POLICY:
/// - The limiter is awaited before every attempt
/// - Transport failures back off `retry_delay × attempt`
/// - HTTP 429 cools down `rate_limit_cooldown × attempt`
/// - Quota payloads rotate the credential and re-issue the same
///   request without consuming an attempt
pub struct RequestExecutor {
    provider: &'static str,
    adapter: Arc<dyn ProviderAdapter>,
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    credentials: CredentialPool,
    retry: RetryConfig,
    lease: Option<Lease>,
}

impl RequestExecutor {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        transport: Arc<dyn HttpTransport>,
        limiter: Arc<RateLimiter>,
        credentials: CredentialPool,
        retry: RetryConfig,
    ) -> Self {
        Self {
            provider: adapter.name(),
            adapter,
            transport,
            limiter,
            credentials,
            retry,
            lease: None,
        }
    }

    /// Id of the credential currently in use.
    pub fn credential_id(&self) -> Option<i64> {
        self.lease.as_ref().map(|l| l.id)
    }

    /// Executes `spec` to a final [`Outcome`].
    ///
    /// `Err` is reserved for credential store failures; everything the
    /// provider or the network does is an `Outcome`.
    pub async fn execute(&mut self, spec: &RequestSpec) -> Result<Outcome> {
        if self.lease.is_none() {
            self.lease = self.credentials.current(self.provider).await?;
        }

        let max_retries = self.retry.max_retries.max(1);
        let mut attempt = 0u32;
        let mut last_error = String::from("no attempt made");

        while attempt < max_retries {
            let Some(lease) = self.lease.clone() else {
                warn!("[{}] no usable credential", self.provider);
                return Ok(Outcome::QuotaFailure { credential_id: None });
            };

            self.limiter.wait().await;
            bump(&METRICS.requests_sent);

            let params = spec.params_with_credential(&lease.secret);
            match self.attempt(&spec.url, &params).await {
                Attempt::Data(payload) => return Ok(Outcome::Data(payload)),
                Attempt::Empty => return Ok(Outcome::Empty),

                Attempt::Quota => {
                    bump(&METRICS.quota_rotations);
                    self.lease = self.credentials.rotate(self.provider, lease.id).await?;
                    if self.lease.is_none() {
                        return Ok(Outcome::QuotaFailure {
                            credential_id: Some(lease.id),
                        });
                    }
                }

                Attempt::RateLimited => {
                    bump(&METRICS.rate_limited);
                    attempt += 1;
                    last_error = "rate limited (HTTP 429)".to_string();
                    if attempt < max_retries {
                        let cooldown = self.retry.rate_limit_cooldown_ms * u64::from(attempt);
                        warn!("[{}] rate limited, cooling down {}ms", self.provider, cooldown);
                        sleep(Duration::from_millis(cooldown)).await;
                    }
                }

                Attempt::Transient(reason) => {
                    bump(&METRICS.transient_failures);
                    attempt += 1;
                    if attempt < max_retries {
                        let delay = self.retry.retry_delay_ms * u64::from(attempt);
                        warn!(
                            "[{}] attempt {}/{} failed: {} (retry in {}ms)",
                            self.provider, attempt, max_retries, reason, delay
                        );
                        sleep(Duration::from_millis(delay)).await;
                    }
                    last_error = reason;
                }
            }
        }

        bump(&METRICS.fatal_requests);
        warn!(
            "[{}] giving up after {} attempts: {}",
            self.provider, max_retries, last_error
        );
        Ok(Outcome::Fatal(last_error))
    }

    async fn attempt(&self, url: &str, params: &[(String, String)]) -> Attempt {
        let response = match self.transport.get(url, params).await {
            Ok(r) => r,
            Err(e) => return Attempt::Transient(e.to_string()),
        };

        match response.status {
            200..=299 => {}
            429 => return Attempt::RateLimited,
            400 => {
                // body tells an overflowing page apart from a malformed request
                warn!(
                    "[{}] HTTP 400, treating as empty: {}",
                    self.provider,
                    truncate_for_log(&response.body, LOG_BODY_CHARS)
                );
                return Attempt::Empty;
            }
            status => return Attempt::Transient(format!("HTTP {}", status)),
        }

        let payload: Value = match serde_json::from_str(&response.body) {
            Ok(v) => v,
            Err(e) => {
                debug!(
                    "[{}] non-JSON body: {}",
                    self.provider,
                    truncate_for_log(&response.body, LOG_BODY_CHARS)
                );
                return Attempt::Transient(format!("invalid JSON: {}", e));
            }
        };

        if self.adapter.is_quota_error(&payload) {
            return Attempt::Quota;
        }
        if !self.adapter.is_success(&payload) {
            warn!(
                "[{}] provider reported failure: {}",
                self.provider,
                truncate_for_log(&payload.to_string(), LOG_BODY_CHARS)
            );
        }
        Attempt::Data(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::providers::get_adapter;
    use crate::store;

    /// Replays canned responses and records the credential of each call.
    struct Scripted {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        seen_keys: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen_keys: Mutex::new(Vec::new()),
            })
        }

        fn keys(&self) -> Vec<String> {
            self.seen_keys.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for Scripted {
        async fn get(&self, _url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
            let key = params.iter().find(|(k, _)| k == "key").map(|(_, v)| v.clone());
            self.seen_keys.lock().unwrap().push(key.unwrap_or_default());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }

    fn ok(body: Value) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse { status: 200, body: body.to_string() })
    }

    fn status(code: u16, body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse { status: code, body: body.to_string() })
    }

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            retry_delay_ms: 1,
            rate_limit_cooldown_ms: 20,
            timeout_secs: 5,
        }
    }

    async fn executor(
        transport: Arc<Scripted>,
        keys: &[&str],
        max_retries: u32,
    ) -> (tempfile::TempDir, CredentialPool, RequestExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let db = store::connect(&dir.path().join("poi.db")).await.unwrap();
        store::run_migrations(&db).await.unwrap();
        let pool = CredentialPool::new(db);
        for k in keys {
            pool.add("amap", k, "").await.unwrap();
        }
        let exec = RequestExecutor::new(
            get_adapter("amap").unwrap(),
            transport,
            Arc::new(RateLimiter::new(1000.0, 100)),
            pool.clone(),
            retry(max_retries),
        );
        (dir, pool, exec)
    }

    fn spec() -> RequestSpec {
        RequestSpec::new("https://restapi.amap.com/v3/place/text", "key").param("keywords", "中学")
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let transport = Scripted::new(vec![
            Err(TransportError::Timeout("slow".into())),
            status(502, "bad gateway"),
            ok(json!({"status": "1", "count": "0", "pois": []})),
        ]);
        let (_dir, _pool, mut exec) = executor(transport.clone(), &["A"], 3).await;

        let outcome = exec.execute(&spec()).await.unwrap();
        assert!(matches!(outcome, Outcome::Data(_)));
        assert_eq!(transport.keys(), vec!["A", "A", "A"]);
    }

    #[tokio::test]
    async fn exhausted_retries_are_fatal() {
        let transport = Scripted::new(vec![
            status(500, ""),
            status(200, "<html>"),
            Err(TransportError::Connect("refused".into())),
        ]);
        let (_dir, _pool, mut exec) = executor(transport.clone(), &["A"], 3).await;

        let outcome = exec.execute(&spec()).await.unwrap();
        assert!(matches!(outcome, Outcome::Fatal(ref m) if m.contains("refused")));
        assert_eq!(transport.keys().len(), 3);
    }

    #[tokio::test]
    async fn bad_request_is_empty_without_retry() {
        let transport = Scripted::new(vec![status(400, r#"{"info":"INVALID_PARAMS"}"#)]);
        let (_dir, _pool, mut exec) = executor(transport.clone(), &["A"], 3).await;

        assert_eq!(exec.execute(&spec()).await.unwrap(), Outcome::Empty);
        assert_eq!(transport.keys().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_cools_down_and_consumes_attempts() {
        let transport = Scripted::new(vec![
            status(429, ""),
            status(429, ""),
            ok(json!({"status": "1", "pois": []})),
        ]);
        let (_dir, _pool, mut exec) = executor(transport.clone(), &["A"], 3).await;

        let start = std::time::Instant::now();
        let outcome = exec.execute(&spec()).await.unwrap();
        assert!(matches!(outcome, Outcome::Data(_)));
        // 20ms after the first 429, 40ms after the second
        assert!(start.elapsed() >= Duration::from_millis(60));

        let transport = Scripted::new(vec![status(429, ""), status(429, "")]);
        let (_dir, _pool, mut exec) = executor(transport, &["A"], 2).await;
        assert!(matches!(exec.execute(&spec()).await.unwrap(), Outcome::Fatal(_)));
    }

    #[tokio::test]
    async fn quota_rotates_without_consuming_attempts() {
        let quota = json!({"status": "0", "info": "DAILY_QUERY_OVER_LIMIT", "infocode": "10003"});
        let transport = Scripted::new(vec![
            ok(quota.clone()),
            ok(json!({"status": "1", "pois": []})),
        ]);
        let (_dir, pool, mut exec) = executor(transport.clone(), &["A", "B"], 1).await;

        let outcome = exec.execute(&spec()).await.unwrap();
        assert!(matches!(outcome, Outcome::Data(_)));
        assert_eq!(transport.keys(), vec!["A", "B"]);

        let creds = pool.list("amap").await.unwrap();
        assert!(creds[0].quota_exhausted);
        assert!(!creds[1].quota_exhausted);
        assert_eq!(exec.credential_id(), Some(creds[1].id));
    }

    #[tokio::test]
    async fn quota_without_spare_credential_fails() {
        let quota = json!({"status": "0", "infocode": "10044"});
        let transport = Scripted::new(vec![ok(quota.clone()), ok(quota)]);
        let (_dir, pool, mut exec) = executor(transport.clone(), &["A", "B"], 3).await;

        let outcome = exec.execute(&spec()).await.unwrap();
        let b = pool.list("amap").await.unwrap()[1].id;
        assert_eq!(outcome, Outcome::QuotaFailure { credential_id: Some(b) });
        assert_eq!(transport.keys(), vec!["A", "B"]);
        assert_eq!(exec.credential_id(), None);
    }

    #[tokio::test]
    async fn no_credentials_at_all() {
        let transport = Scripted::new(vec![]);
        let (_dir, _pool, mut exec) = executor(transport.clone(), &[], 3).await;
        assert_eq!(
            exec.execute(&spec()).await.unwrap(),
            Outcome::QuotaFailure { credential_id: None }
        );
        assert!(transport.keys().is_empty());
    }

    // --------------------------------------------------------
    // reqwest transport against a local socket
    // --------------------------------------------------------

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn install_crypto() {
        let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());
    }

    /// Serves `status` + `body` to every connection and records each
    /// request line.
    async fn canned_server(status: &'static str, body: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                log.lock().unwrap().push(request.lines().next().unwrap_or_default().to_string());

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/v3/place/text", addr), seen)
    }

    fn params() -> Vec<(String, String)> {
        vec![("keywords".to_string(), "中学".to_string()), ("key".to_string(), "A".to_string())]
    }

    #[tokio::test]
    async fn reqwest_passes_status_and_body_through() {
        install_crypto();
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();

        let (url, seen) = canned_server("429 Too Many Requests", r#"{"info":"CUQPS_HAS_EXCEEDED_THE_LIMIT"}"#).await;
        let response = transport.get(&url, &params()).await.unwrap();
        assert_eq!(response.status, 429);
        assert!(response.body.contains("CUQPS_HAS_EXCEEDED_THE_LIMIT"));

        let line = seen.lock().unwrap()[0].clone();
        assert!(line.starts_with("GET /v3/place/text?"));
        assert!(line.contains("keywords=%E4%B8%AD%E5%AD%A6"));
        assert!(line.contains("key=A"));

        let (url, _) = canned_server("500 Internal Server Error", "upstream down").await;
        let response = transport.get(&url, &params()).await.unwrap();
        assert_eq!(response, HttpResponse { status: 500, body: "upstream down".to_string() });
    }

    #[tokio::test]
    async fn reqwest_timeout_is_reported_as_timeout() {
        install_crypto();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accepts and never answers
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport = ReqwestTransport::new(Duration::from_millis(200)).unwrap();
        let err = transport
            .get(&format!("http://{}/v2/search", addr), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "{:?}", err);
        server.abort();
    }

    #[tokio::test]
    async fn reqwest_refused_connection_is_reported_as_connect() {
        install_crypto();
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport
            .get(&format!("http://{}/place/v2/search", addr), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn server_errors_over_http_exhaust_into_fatal() {
        install_crypto();
        let (url, seen) = canned_server("503 Service Unavailable", "busy").await;

        let dir = tempfile::tempdir().unwrap();
        let db = store::connect(&dir.path().join("poi.db")).await.unwrap();
        store::run_migrations(&db).await.unwrap();
        let pool = CredentialPool::new(db);
        pool.add("amap", "A", "").await.unwrap();

        let mut exec = RequestExecutor::new(
            get_adapter("amap").unwrap(),
            Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap()),
            Arc::new(RateLimiter::new(1000.0, 100)),
            pool,
            retry(2),
        );
        let spec = RequestSpec::new(&url, "key").param("keywords", "中学");

        let outcome = exec.execute(&spec).await.unwrap();
        assert!(matches!(outcome, Outcome::Fatal(ref m) if m.contains("503")));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
