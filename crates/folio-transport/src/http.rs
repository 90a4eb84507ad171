//! reqwest-backed HTTP transport.
//!
//! JSON in, JSON out. Response bodies are read as text and parsed
//! leniently: an empty or non-JSON body becomes `null` rather than an error.

use async_trait::async_trait;
use folio_core::{ApiRequest, ClientConfig, ClientError, Method, Transport};
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde_json::Value;

/// HTTP client for the Folio backend.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create with a custom reqwest [`Client`] (for proxies, TLS roots, etc.).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        Self {
            client,
            base_url: base.trim_end_matches('/').to_string(),
        }
    }

    /// Create from configuration, applying the request timeout if set.
    ///
    /// # Errors
    /// Returns error if the underlying client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config.api_base.clone()))
    }

    /// The configured base URL, without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a request path. Absolute `http(s)://` URLs pass through.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    async fn execute(&self, request: ApiRequest) -> Result<Value, ClientError> {
        let url = self.url_for(&request.path);
        let mut builder = self.client.request(reqwest_method(request.method), &url);

        let content_type_overridden = request
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        if !content_type_overridden {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let token = request.token.as_deref().filter(|t| !t.is_empty());
        for (name, value) in &request.headers {
            // The session token wins over a caller-supplied Authorization.
            if token.is_some() && name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.to_string());
        }

        tracing::debug!(method = %request.method, %url, "sending request");

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        let payload = parse_payload(&text);

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), %url, "request rejected");
            return Err(ClientError::from_response(status.as_u16(), payload));
        }

        Ok(payload.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, mut request: ApiRequest) -> Result<Value, ClientError> {
        let Some(cancel) = request.cancel.take() else {
            return self.execute(request).await;
        };

        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let path = request.path.clone();
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!(%path, "request cancelled by caller");
                Err(ClientError::Cancelled)
            }

            result = self.execute(request) => result,
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn parse_payload(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}

fn transport_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Transport(format!("request timed out: {e}"))
    } else {
        ClientError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_url_resolution() {
        let client = HttpClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(
            client.url_for("/api/far/metrics"),
            "http://localhost:8000/api/far/metrics"
        );
        assert_eq!(client.url_for("api/auth/me"), "http://localhost:8000/api/auth/me");
        assert_eq!(
            client.url_for("https://quotes.example.com/v1/AAPL"),
            "https://quotes.example.com/v1/AAPL"
        );
    }

    #[test]
    fn test_parse_payload_is_lenient() {
        assert_eq!(parse_payload(""), None);
        assert_eq!(parse_payload("  \n"), None);
        assert_eq!(parse_payload("<html>"), None);
        assert_eq!(parse_payload(r#"{"ok":true}"#), Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_from_config_uses_base() {
        let config = ClientConfig::default()
            .with_api_base("https://api.folio.test")
            .with_request_timeout(Duration::from_secs(5));
        let client = HttpClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "https://api.folio.test");
    }
}
