use crate::config::Config;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// The server quota is per hour; the gate spreads it evenly over that window.
pub const QUOTA_WINDOW_MS: u64 = 3_600_000;

pub const ACCESS_TOKEN_PARAM: &str = "access_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: Option<u32>,
    pub min_delay: Duration,
}

impl RateLimitInfo {
    /// `None` for a zero limit, which carries no pacing information.
    pub fn new(limit: u32, remaining: Option<u32>) -> Option<Self> {
        if limit == 0 {
            return None;
        }
        Some(Self {
            limit,
            remaining,
            min_delay: Duration::from_millis(QUOTA_WINDOW_MS / u64::from(limit)),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub status: Option<u16>,
}

/// Result of one gate call. Callers decide whether absence is acceptable.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Data(T),
    /// 2xx with an empty or `null` body.
    Empty,
    Failed(ErrorInfo),
}

impl<T> FetchOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed(_))
    }
}

pub fn build_client(cfg: &Config) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(cfg.user_agent.as_str())
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .use_rustls_tls()
        .build()
}

pub fn map_status_to_error(status: StatusCode, message: String) -> ErrorInfo {
    let code = match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::CONFLICT => "conflict",
        StatusCode::TOO_MANY_REQUESTS => "rate_limited",
        s if s.is_server_error() => "upstream_error",
        _ => "server_error",
    };
    ErrorInfo {
        code: code.to_string(),
        message,
        status: Some(status.as_u16()),
    }
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u32>().ok())
}

/// Reads `x-ratelimit-limit` / `x-ratelimit-remaining`. Without a usable limit
/// there is nothing to pace on.
pub fn extract_rate_limit(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let limit = header_u32(headers, "x-ratelimit-limit")?;
    RateLimitInfo::new(limit, header_u32(headers, "x-ratelimit-remaining"))
}

/// Builds the request URL: `query` is appended, then the access token unless
/// the URL already carries one (server-issued continuation URLs do).
pub fn with_access_token(
    url: &str,
    query: &[(&str, String)],
    token: &str,
) -> Result<Url, url::ParseError> {
    let mut parsed = Url::parse(url)?;
    let stamped = parsed.query_pairs().any(|(k, _)| k == ACCESS_TOKEN_PARAM);
    if !query.is_empty() || !stamped {
        let mut pairs = parsed.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
        if !stamped {
            pairs.append_pair(ACCESS_TOKEN_PARAM, token);
        }
    }
    Ok(parsed)
}

/// How long a call issued at `now` must wait to keep `min_delay` between dispatches.
pub fn throttle_wait(
    rate: Option<&RateLimitInfo>,
    last_issued: Option<Instant>,
    now: Instant,
) -> Option<Duration> {
    let rate = rate?;
    let last = last_issued?;
    let elapsed = now.saturating_duration_since(last);
    rate.min_delay.checked_sub(elapsed).filter(|d| !d.is_zero())
}

// URLs are logged without their query so the token never reaches the log.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

fn redact_str(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[derive(Debug, Default)]
struct Pacing {
    rate: Option<RateLimitInfo>,
    last_issued: Option<Instant>,
}

/// Authenticated, self-throttling GET wrapper. Pacing state belongs to this
/// instance; callers sharing one gate are serialized through [`FetchGate::pace`].
#[derive(Debug)]
pub struct FetchGate {
    http: Client,
    token: String,
    throttle: bool,
    pacing: Mutex<Pacing>,
}

impl FetchGate {
    pub fn new(http: Client, token: impl Into<String>, throttle: bool) -> Self {
        Self {
            http,
            token: token.into(),
            throttle,
            pacing: Mutex::new(Pacing::default()),
        }
    }

    /// Rate limit observed on the most recent successful response, if any.
    pub async fn rate_limit(&self) -> Option<RateLimitInfo> {
        self.pacing.lock().await.rate
    }

    async fn pace(&self) {
        let mut pacing = self.pacing.lock().await;
        if self.throttle {
            if let Some(wait) = throttle_wait(pacing.rate.as_ref(), pacing.last_issued, Instant::now()) {
                debug!("Throttling next request for {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
        pacing.last_issued = Some(Instant::now());
    }

    async fn observe_rate(&self, headers: &HeaderMap, url: &Url) {
        if let Some(rate) = extract_rate_limit(headers) {
            info!(
                "Rate limit: {} of {} for {}",
                rate.remaining.map(|r| r.to_string()).unwrap_or_else(|| "?".into()),
                rate.limit,
                redact(url)
            );
            self.pacing.lock().await.rate = Some(rate);
        }
    }

    /// Issue one GET. Never fails loudly: every problem becomes
    /// [`FetchOutcome::Failed`] after being logged.
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> FetchOutcome<Value> {
        let target = match with_access_token(url, query, &self.token) {
            Ok(u) => u,
            Err(e) => {
                warn!("GET {} skipped: invalid URL ({})", redact_str(url), e);
                return FetchOutcome::Failed(ErrorInfo {
                    code: "invalid_url".into(),
                    message: e.to_string(),
                    status: None,
                });
            }
        };

        self.pace().await;
        debug!("GET {}", redact(&target));
        let res = self
            .http
            .get(target.clone())
            .header(AUTHORIZATION, auth_header(&self.token))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await;

        let res = match res {
            Ok(r) => r,
            Err(e) => {
                warn!("GET {} failed: {}", redact(&target), e);
                return FetchOutcome::Failed(ErrorInfo {
                    code: "transport_error".into(),
                    message: e.to_string(),
                    status: None,
                });
            }
        };

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            warn!("GET {} returned {}", redact(&target), status);
            return FetchOutcome::Failed(map_status_to_error(status, text));
        }
        self.observe_rate(res.headers(), &target).await;

        let text = match res.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!("GET {} body read failed: {}", redact(&target), e);
                return FetchOutcome::Failed(ErrorInfo {
                    code: "transport_error".into(),
                    message: e.to_string(),
                    status: Some(status.as_u16()),
                });
            }
        };
        if text.trim().is_empty() {
            return FetchOutcome::Empty;
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Null) => FetchOutcome::Empty,
            Ok(v) => FetchOutcome::Data(v),
            Err(e) => {
                warn!("GET {} returned invalid JSON: {}", redact(&target), e);
                FetchOutcome::Failed(ErrorInfo {
                    code: "decode_error".into(),
                    message: e.to_string(),
                    status: Some(status.as_u16()),
                })
            }
        }
    }

    /// [`FetchGate::get`] decoded into `T`; a shape mismatch is a failure.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> FetchOutcome<T> {
        match self.get(url, query).await {
            FetchOutcome::Data(v) => match serde_json::from_value::<T>(v) {
                Ok(t) => FetchOutcome::Data(t),
                Err(e) => {
                    warn!("GET {} returned an unexpected shape: {}", redact_str(url), e);
                    FetchOutcome::Failed(ErrorInfo {
                        code: "decode_error".into(),
                        message: e.to_string(),
                        status: None,
                    })
                }
            },
            FetchOutcome::Empty => FetchOutcome::Empty,
            FetchOutcome::Failed(e) => FetchOutcome::Failed(e),
        }
    }
}

fn auth_header(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token))
        .unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
}
