//! API client: every request goes through the rate-limit governor.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::Cancellation;
use crate::error::ApiError;
use crate::ratelimit::RateLimitGovernor;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::types::{RegisterData, RegisterRequest, ServerStatus};

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: i64,
}

pub struct ApiClient<T = HttpTransport> {
    transport: T,
    governor: RateLimitGovernor,
    cancel: Cancellation,
    token: Option<String>,
}

impl ApiClient<HttpTransport> {
    pub fn connect(
        base_url: &str,
        timeout: Duration,
        governor: RateLimitGovernor,
        cancel: Cancellation,
    ) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(base_url, timeout)?;
        Ok(Self::new(transport, governor, cancel))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, governor: RateLimitGovernor, cancel: Cancellation) -> Self {
        Self {
            transport,
            governor,
            cancel,
            token: None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn has_session(&self) -> bool {
        self.token.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request` and hand the response to the governor.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let request = if request.bearer.is_none() {
            request.with_bearer(self.token.clone())
        } else {
            request
        };

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ApiError::Aborted),
            response = self.transport.send(&request) => response?,
        };

        self.governor
            .on_response(&self.transport, &request, response, &self.cancel)
            .await
    }

    pub async fn get<D: DeserializeOwned>(&self, path: &str) -> Result<D, ApiError> {
        let response = self.execute(ApiRequest::get(path)).await?;
        decode(response)
    }

    pub async fn post<D: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<D, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.execute(ApiRequest::post(path, body)).await?;
        decode(response)
    }

    pub async fn server_status(&self) -> Result<ServerStatus, ApiError> {
        self.get("/").await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterData, ApiError> {
        self.post("/register", request).await
    }
}

/// Turn a response into `D`, unwrapping the `{"data": ...}` envelope when present.
pub fn decode<D: DeserializeOwned>(response: ApiResponse) -> Result<D, ApiError> {
    let status = response.status;

    if !status.is_success() {
        tracing::debug!(
            target = "traders_console::client",
            status = status.as_u16(),
            body = %response.body,
            "request failed"
        );
        return Err(match serde_json::from_str::<ErrorEnvelope>(&response.body) {
            Ok(envelope) => ApiError::api(status.as_u16(), envelope.error.code, envelope.error.message),
            Err(_) => ApiError::api(
                status.as_u16(),
                0,
                status.canonical_reason().unwrap_or("request failed"),
            ),
        });
    }

    let mut value: Value = serde_json::from_str(&response.body)
        .map_err(|e| ApiError::InvalidResponse(format!("body is not JSON: {e}")))?;

    let payload = match value.get_mut("data") {
        Some(data) => data.take(),
        None => value,
    };
    Ok(serde_json::from_value(payload)?)
}
