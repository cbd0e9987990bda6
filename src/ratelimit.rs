//! Reactive rate-limit handling.
//!
//! The SpaceTraders API reports its limits on every governed response:
//!
//! ```text
//! x-ratelimit-type: IP Address
//! x-ratelimit-limit-burst: 10
//! x-ratelimit-limit-per-second: 2
//! x-ratelimit-remaining: 0
//! x-ratelimit-reset: 2023-01-21T23:36:33.435Z
//! retry-after: 1
//! ```
//!
//! Nothing is tracked between requests. Each response is inspected on its
//! own; when the quota is exhausted the caller waits until the reset time
//! plus jitter and the original request is re-sent under exponential backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::json;

use crate::backoff::{retry_with_backoff, BackoffPolicy, RetryOutcome};
use crate::cancel::Cancellation;
use crate::error::ApiError;
use crate::events::EventEmitter;
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

pub const HEADER_TYPE: &str = "x-ratelimit-type";
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_LIMIT_BURST: &str = "x-ratelimit-limit-burst";
pub const HEADER_LIMIT_PER_SECOND: &str = "x-ratelimit-limit-per-second";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_JITTER_MS: u64 = 1_000;

/// Rate-limit metadata read from a single response.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitState {
    pub limit_type: String,
    /// Missing or unparsable values count as zero.
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after: Option<RetryAfter>,
    pub limit: Option<u32>,
    pub limit_burst: Option<u32>,
    pub limit_per_second: Option<u32>,
}

/// The two forms `retry-after` can take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryAfter {
    Delay(Duration),
    At(DateTime<Utc>),
}

impl RetryAfter {
    /// Delay-seconds or an HTTP date. Values too large for a `Duration` are dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(secs) = raw.parse::<u64>() {
            return Some(Self::Delay(Duration::from_secs(secs)));
        }
        if let Ok(secs) = raw.parse::<f64>() {
            return Duration::try_from_secs_f64(secs).ok().map(Self::Delay);
        }
        DateTime::parse_from_rfc2822(raw)
            .ok()
            .map(|at| Self::At(at.with_timezone(&Utc)))
    }

    pub fn wait_from(&self, now: DateTime<Utc>) -> Duration {
        match *self {
            Self::Delay(delay) => delay,
            Self::At(at) => (at - now).to_std().unwrap_or(Duration::ZERO),
        }
    }
}

impl RateLimitState {
    /// `None` when the response carries no rate-limit type, i.e. is not governed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let limit_type = text(HEADER_TYPE)?.to_string();
        let remaining = text(HEADER_REMAINING)
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0);
        let reset_at = text(HEADER_RESET)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc));
        let retry_after = text(HEADER_RETRY_AFTER).and_then(RetryAfter::parse);
        let limit = text(HEADER_LIMIT).and_then(|value| value.parse().ok());
        let limit_burst = text(HEADER_LIMIT_BURST).and_then(|value| value.parse().ok());
        let limit_per_second = text(HEADER_LIMIT_PER_SECOND).and_then(|value| value.parse().ok());

        Some(Self {
            limit_type,
            remaining,
            reset_at,
            retry_after,
            limit,
            limit_burst,
            limit_per_second,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    /// Time left until the window resets, never negative.
    ///
    /// Falls back to `retry-after` when the reset timestamp is missing.
    pub fn wait_from(&self, now: DateTime<Utc>) -> Duration {
        match self.reset_at {
            Some(reset_at) => (reset_at - now).to_std().unwrap_or(Duration::ZERO),
            None => self
                .retry_after
                .map_or(Duration::ZERO, |retry_after| retry_after.wait_from(now)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorConfig {
    pub retry: BackoffPolicy,
    /// Upper bound (exclusive) of the random delay added to the reset wait.
    pub max_jitter: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            retry: BackoffPolicy::new(
                Some(DEFAULT_MAX_RETRIES),
                Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            ),
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

/// Middleware applied to every response before it reaches the caller.
#[derive(Debug, Clone)]
pub struct RateLimitGovernor {
    config: GovernorConfig,
    events: EventEmitter,
}

impl Default for RateLimitGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

impl RateLimitGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            events: EventEmitter::new(false),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Pass `response` through, or wait out an exhausted limit and re-send
    /// `request` until it succeeds or the retry budget is spent.
    pub async fn on_response<T: Transport>(
        &self,
        transport: &T,
        request: &ApiRequest,
        response: ApiResponse,
        cancel: &Cancellation,
    ) -> Result<ApiResponse, ApiError> {
        self.on_response_at(transport, request, response, cancel, Utc::now())
            .await
    }

    /// [`Self::on_response`] against an explicit wall-clock reading.
    pub async fn on_response_at<T: Transport>(
        &self,
        transport: &T,
        request: &ApiRequest,
        response: ApiResponse,
        cancel: &Cancellation,
        now: DateTime<Utc>,
    ) -> Result<ApiResponse, ApiError> {
        let Some(state) = RateLimitState::from_headers(&response.headers) else {
            return Ok(response);
        };

        if !state.is_exhausted() {
            tracing::trace!(
                target = "traders_console::ratelimit",
                limit_type = %state.limit_type,
                remaining = state.remaining,
                "rate limit reported, quota left"
            );
            return Ok(response);
        }

        let reset_wait = state.wait_from(now);
        let jitter = self.jitter();
        let wait = reset_wait.saturating_add(jitter);

        tracing::warn!(
            target = "traders_console::ratelimit",
            limit_type = %state.limit_type,
            status = response.status.as_u16(),
            path = %request.path,
            wait_ms = wait.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "rate limit exhausted, waiting for reset"
        );
        self.events.emit(
            "rate_limited",
            json!({
                "limit_type": state.limit_type,
                "path": request.path,
                "wait_ms": wait.as_millis() as u64,
                "reset_at": state.reset_at.map(|reset| reset.to_rfc3339()),
                "limit": state.limit,
                "limit_burst": state.limit_burst,
                "limit_per_second": state.limit_per_second,
            }),
        );

        if !cancel.sleep(wait).await {
            return Err(ApiError::Aborted);
        }

        match retry_with_backoff(&self.config.retry, cancel, || reissue(transport, request)).await {
            RetryOutcome::Success(response) => Ok(response),
            RetryOutcome::Cancelled => Err(ApiError::Aborted),
            RetryOutcome::Failed { attempts, error } => {
                tracing::error!(
                    target = "traders_console::ratelimit",
                    path = %request.path,
                    attempts,
                    error = %error,
                    "giving up after rate limit retries"
                );
                Err(ApiError::RateLimitExhausted {
                    attempts,
                    source: error,
                })
            }
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

async fn reissue<T: Transport>(
    transport: &T,
    request: &ApiRequest,
) -> Result<ApiResponse, TransportError> {
    let response = transport.send(request).await?;
    if response.status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TransportError::RateLimited {
            status: response.status.as_u16(),
            limit_type: response.header(HEADER_TYPE).map(ToOwned::to_owned),
        });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone, Utc};
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::StatusCode;
    use tokio::time::Instant;

    use super::*;

    /// Replays canned responses and records when each send happened.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<ApiResponse>>,
        sent_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<ApiResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                sent_at: Mutex::new(Vec::new()),
            }
        }

        fn sent_at(&self) -> Vec<Instant> {
            self.sent_at.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            self.sent_at.lock().unwrap().push(Instant::now());
            let next = self.responses.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| ok_response("{}")))
        }
    }

    fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn ok_response(body: &str) -> ApiResponse {
        ApiResponse::new(StatusCode::OK, HeaderMap::new(), body)
    }

    fn exhausted_response(reset_at: chrono::DateTime<Utc>) -> ApiResponse {
        ApiResponse::new(
            StatusCode::TOO_MANY_REQUESTS,
            headers(&[
                (HEADER_TYPE, "IP Address".into()),
                (HEADER_REMAINING, "0".into()),
                (HEADER_RESET, reset_at.to_rfc3339()),
                (HEADER_LIMIT_BURST, "10".into()),
                (HEADER_LIMIT_PER_SECOND, "2".into()),
            ]),
            r#"{"error":{"message":"You have reached your API limit.","code":429}}"#,
        )
    }

    fn governor(max_retries: u32) -> RateLimitGovernor {
        RateLimitGovernor::new(GovernorConfig {
            retry: BackoffPolicy::new(Some(max_retries), Duration::from_millis(100)),
            max_jitter: Duration::from_millis(1_000),
        })
    }

    #[test]
    fn parses_documented_headers() {
        let map = headers(&[
            (HEADER_TYPE, "IP Address".into()),
            (HEADER_REMAINING, "0".into()),
            (HEADER_RESET, "2023-01-21T23:36:33.435Z".into()),
            (HEADER_LIMIT, "2".into()),
            (HEADER_LIMIT_BURST, "10".into()),
            (HEADER_LIMIT_PER_SECOND, "2".into()),
            (HEADER_RETRY_AFTER, "1".into()),
        ]);
        let state = RateLimitState::from_headers(&map).unwrap();
        assert_eq!(state.limit_type, "IP Address");
        assert_eq!(state.remaining, 0);
        assert!(state.is_exhausted());
        assert_eq!(state.limit, Some(2));
        assert_eq!(state.limit_burst, Some(10));
        assert_eq!(state.limit_per_second, Some(2));
        assert_eq!(state.retry_after, Some(RetryAfter::Delay(Duration::from_secs(1))));
        assert_eq!(
            state.reset_at.unwrap().to_rfc3339(),
            "2023-01-21T23:36:33.435+00:00"
        );
    }

    #[test]
    fn oversized_retry_after_is_ignored() {
        for raw in ["99999999999999999999999999999", "1e30", "-3", "NaN"] {
            let map = headers(&[
                (HEADER_TYPE, "IP Address".into()),
                (HEADER_REMAINING, "0".into()),
                (HEADER_RETRY_AFTER, raw.into()),
            ]);
            let state = RateLimitState::from_headers(&map).unwrap();
            assert_eq!(state.retry_after, None, "retry-after {raw:?}");
            assert_eq!(state.wait_from(Utc::now()), Duration::ZERO);
        }
    }

    #[test]
    fn retry_after_accepts_largest_whole_seconds_and_fractions() {
        assert_eq!(
            RetryAfter::parse("18446744073709551615"),
            Some(RetryAfter::Delay(Duration::from_secs(u64::MAX)))
        );
        assert_eq!(
            RetryAfter::parse("1.5"),
            Some(RetryAfter::Delay(Duration::from_millis(1500)))
        );
    }

    #[test]
    fn retry_after_http_date_is_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        let map = headers(&[
            (HEADER_TYPE, "IP Address".into()),
            (HEADER_REMAINING, "0".into()),
            (HEADER_RETRY_AFTER, "Wed, 21 Oct 2015 07:28:30 GMT".into()),
        ]);
        let state = RateLimitState::from_headers(&map).unwrap();
        assert_eq!(
            state.retry_after,
            Some(RetryAfter::At(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 30).unwrap()))
        );
        assert_eq!(state.wait_from(now), Duration::from_secs(30));
        assert_eq!(
            state.wait_from(now + TimeDelta::minutes(1)),
            Duration::ZERO
        );
    }

    #[test]
    fn missing_type_means_not_governed() {
        let map = headers(&[(HEADER_REMAINING, "0".into())]);
        assert!(RateLimitState::from_headers(&map).is_none());
    }

    #[test]
    fn missing_remaining_counts_as_exhausted() {
        let map = headers(&[(HEADER_TYPE, "Account".into())]);
        assert!(RateLimitState::from_headers(&map).unwrap().is_exhausted());
    }

    #[test]
    fn wait_is_clamped_and_falls_back_to_retry_after() {
        let now = Utc::now();
        let past = RateLimitState {
            limit_type: "Account".into(),
            remaining: 0,
            reset_at: Some(now - TimeDelta::seconds(3)),
            retry_after: Some(RetryAfter::Delay(Duration::from_secs(9))),
            limit: None,
            limit_burst: None,
            limit_per_second: None,
        };
        assert_eq!(past.wait_from(now), Duration::ZERO);

        let no_reset = RateLimitState {
            reset_at: None,
            ..past
        };
        assert_eq!(no_reset.wait_from(now), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn ungoverned_response_passes_through_immediately() {
        let transport = ScriptedTransport::new(vec![]);
        let response = ApiResponse::new(StatusCode::OK, HeaderMap::new(), r#"{"status":"ok"}"#);
        let started = Instant::now();

        let result = governor(5)
            .on_response(
                &transport,
                &ApiRequest::get("/"),
                response,
                &Cancellation::never(),
            )
            .await
            .unwrap();

        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(result.body, r#"{"status":"ok"}"#);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(transport.sent_at().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_quota_passes_through() {
        let transport = ScriptedTransport::new(vec![]);
        let response = ApiResponse::new(
            StatusCode::OK,
            headers(&[
                (HEADER_TYPE, "IP Address".into()),
                (HEADER_REMAINING, "3".into()),
            ]),
            "{}",
        );

        let result = governor(5)
            .on_response(
                &transport,
                &ApiRequest::get("/"),
                response,
                &Cancellation::never(),
            )
            .await
            .unwrap();

        assert_eq!(result.status, StatusCode::OK);
        assert!(transport.sent_at().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_limit_waits_for_reset_plus_jitter_then_retries() {
        let now = Utc::now();
        let transport = ScriptedTransport::new(vec![ok_response(r#"{"data":{}}"#)]);
        let started = Instant::now();

        let result = governor(5)
            .on_response_at(
                &transport,
                &ApiRequest::get("/my/agent"),
                exhausted_response(now + TimeDelta::milliseconds(500)),
                &Cancellation::never(),
                now,
            )
            .await
            .unwrap();

        assert_eq!(result.status, StatusCode::OK);
        let sent = transport.sent_at();
        assert_eq!(sent.len(), 1);
        let waited = sent[0] - started;
        assert!(waited >= Duration::from_millis(500), "waited {waited:?}");
        assert!(waited < Duration::from_millis(1_500), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_failure() {
        let now = Utc::now();
        let still_limited: Vec<ApiResponse> = (0..10).map(|_| exhausted_response(now)).collect();
        let transport = ScriptedTransport::new(still_limited);

        let err = governor(3)
            .on_response_at(
                &transport,
                &ApiRequest::get("/my/ships"),
                exhausted_response(now),
                &Cancellation::never(),
                now,
            )
            .await
            .unwrap_err();

        match err {
            ApiError::RateLimitExhausted { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(matches!(
                    source,
                    TransportError::RateLimited { status: 429, .. }
                ));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        let sent = transport.sent_at();
        assert_eq!(sent.len(), 4);
        let gaps: Vec<u64> = sent
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
            .collect();
        assert_eq!(gaps, vec![100, 200, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_reset_wait_aborts_without_retrying() {
        let now = Utc::now();
        let transport = std::sync::Arc::new(ScriptedTransport::new(vec![]));
        let (handle, cancel) = Cancellation::channel();

        let task_transport = transport.clone();
        let task = tokio::spawn(async move {
            governor(5)
                .on_response_at(
                    task_transport.as_ref(),
                    &ApiRequest::get("/"),
                    exhausted_response(now + TimeDelta::seconds(30)),
                    &cancel,
                    now,
                )
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert!(transport.sent_at().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_retry_after_waits_until_cancelled() {
        let transport = std::sync::Arc::new(ScriptedTransport::new(vec![]));
        let (handle, cancel) = Cancellation::channel();
        let response = ApiResponse::new(
            StatusCode::TOO_MANY_REQUESTS,
            headers(&[
                (HEADER_TYPE, "IP Address".into()),
                (HEADER_REMAINING, "0".into()),
                (HEADER_RETRY_AFTER, "18446744073709551000".into()),
            ]),
            "{}",
        );

        let task_transport = transport.clone();
        let task = tokio::spawn(async move {
            governor(5)
                .on_response(task_transport.as_ref(), &ApiRequest::get("/"), response, &cancel)
                .await
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert!(transport.sent_at().is_empty());
    }
}
