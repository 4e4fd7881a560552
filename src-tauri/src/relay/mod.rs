use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::error::VpnError;

fn default_method() -> String {
    "POST".to_string()
}

/// Request forwarded verbatim to the provisioning API
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ApiRequest {
    pub fn post(path: &str, body: serde_json::Value) -> Self {
        Self {
            path: path.to_string(),
            method: default_method(),
            body: Some(body),
            headers: HashMap::new(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self {
            path: path.to_string(),
            method: "GET".to_string(),
            body: None,
            headers: HashMap::new(),
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.headers
            .insert("Authorization".to_string(), format!("Bearer {}", token));
        self
    }
}

// Header values may carry bearer tokens
impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Any response the server sent back, whatever its status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status_code: u16,
    /// Raw response body
    pub data: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Turn a non-2xx response into `ApiError` carrying the raw body
    pub fn error_for_status(self) -> Result<Self, VpnError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(VpnError::ApiError {
                status: self.status_code,
                body: self.data,
            })
        }
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, VpnError> {
        serde_json::from_str(&self.data)
            .map_err(|e| VpnError::ParseError(format!("invalid response body: {}", e)))
    }
}

/// Transport to the provisioning backend
#[async_trait]
pub trait ApiRelay: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, VpnError>;
}

/// Relay to one fixed backend over plain HTTP
pub struct HttpRelay {
    client: Client,
    base_url: String,
}

impl HttpRelay {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_base_url(&format!("http://{}:{}", host, port))
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build_headers(request: &ApiRequest) -> Result<HeaderMap, VpnError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Caller headers win over the defaults
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| VpnError::InvalidArgument(format!("header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| VpnError::InvalidArgument(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl ApiRelay for HttpRelay {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, VpnError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| VpnError::InvalidArgument(format!("HTTP method {}", request.method)))?;
        let headers = Self::build_headers(request)?;
        let url = self.url_for(&request.path);

        debug!("{} {}", method, url);

        let mut builder = self.client.request(method, &url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| VpnError::NetworkError(format!("{}: {}", url, e)))?;

        let status_code = response.status().as_u16();
        let data = response
            .text()
            .await
            .map_err(|e| VpnError::NetworkError(format!("reading response from {}: {}", url, e)))?;

        debug!("{} answered {}", url, status_code);

        Ok(ApiResponse { status_code, data })
    }
}

/// Relay whose target can be swapped when the settings change
pub struct SwitchableRelay {
    inner: parking_lot::RwLock<Arc<dyn ApiRelay>>,
}

impl SwitchableRelay {
    pub fn new(inner: Arc<dyn ApiRelay>) -> Self {
        Self {
            inner: parking_lot::RwLock::new(inner),
        }
    }

    pub fn replace(&self, inner: Arc<dyn ApiRelay>) {
        *self.inner.write() = inner;
    }
}

#[async_trait]
impl ApiRelay for SwitchableRelay {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, VpnError> {
        // Clone out so the lock is not held across the request
        let inner = self.inner.read().clone();
        inner.send(request).await
    }
}
