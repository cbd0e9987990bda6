//! Request/response descriptors and the HTTP exchange underneath the governor.

use std::future::Future;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A re-issued request was itself answered with a rate-limit status.
    #[error("still rate limited (HTTP {status}, type {})", .limit_type.as_deref().unwrap_or("unknown"))]
    RateLimited {
        status: u16,
        limit_type: Option<String>,
    },
}

/// Everything needed to send, and later re-send, one API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// One request/response exchange. Implementations must be able to send the
/// same [`ApiRequest`] more than once.
pub trait Transport {
    fn send(
        &self,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send;
}

/// `reqwest`-backed transport rooted at a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        tracing::debug!(
            target = "traders_console::transport",
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            "request completed"
        );

        Ok(ApiResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{ApiRequest, HttpTransport};

    #[test]
    fn request_builders_keep_descriptor_fields() {
        let request = ApiRequest::post("/register", json!({"symbol": "BADGER"}))
            .with_query("page", "2")
            .with_bearer(Some("tok".into()));
        assert_eq!(request.method, reqwest::Method::POST);
        assert_eq!(request.path, "/register");
        assert_eq!(request.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(request.body, Some(json!({"symbol": "BADGER"})));
        assert_eq!(request.bearer.as_deref(), Some("tok"));
        assert_eq!(request.clone(), request);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let transport =
            HttpTransport::new("https://api.spacetraders.io/v2/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "https://api.spacetraders.io/v2");
    }
}
