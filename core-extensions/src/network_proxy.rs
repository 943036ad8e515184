//! # Network Proxy Adapter
//!
//! Executes every HTTP request issued from inside the sandbox.
//!
//! Responses always come back as a [`ProxyResponse`]; transport failures are
//! reported as `status: 0` with an `error` message so the extension's own
//! error branches run the same way they would for a failed browser `fetch`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bridge_traits::{HttpClient, HttpMethod, HttpRequest, RetryPolicy};
use bytes::Bytes;
use core_runtime::config::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::drm;

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".bmp"];

/// A request as issued by extension code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyRequest {
    pub url: String,
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Explicitly ask for a binary (base64) response
    pub binary: bool,
}

impl ProxyRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Whether the response body must cross the boundary as base64.
    pub fn wants_binary(&self) -> bool {
        self.binary || drm::has_query_marker(&self.url) || has_image_extension(&self.url)
    }
}

/// Result handed back to extension code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyResponse {
    /// Text body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Base64 body of a binary request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub headers: HashMap<String, String>,
}

impl ProxyResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    /// Decode the binary payload, if any.
    pub fn bytes(&self) -> Option<Bytes> {
        let encoded = self.raw_data.as_deref()?;
        BASE64.decode(encoded).ok().map(Bytes::from)
    }
}

fn has_image_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let lower = path.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub struct NetworkProxy {
    http: Arc<dyn HttpClient>,
    config: ProxyConfig,
}

impl NetworkProxy {
    pub fn new(http: Arc<dyn HttpClient>, config: ProxyConfig) -> Self {
        Self { http, config }
    }

    /// Execute `request`, bounded by the configured request timeout even when
    /// the host client ignores [`HttpRequest::timeout`].
    pub async fn fetch(&self, request: ProxyRequest) -> ProxyResponse {
        let binary = request.wants_binary();
        let method = match request.method.as_deref() {
            None => HttpMethod::Get,
            Some(name) => match HttpMethod::parse(name) {
                Some(method) => method,
                None => {
                    warn!(method = name, "Unsupported extension request method");
                    return ProxyResponse::failure(format!("Unsupported HTTP method: {}", name));
                }
            },
        };

        let mut http_request = HttpRequest::new(method, request.url.clone())
            .timeout(self.config.request_timeout);
        http_request.headers = self.merge_headers(&request.headers);
        if let Some(body) = request.body {
            http_request = http_request.body(Bytes::from(body));
        }

        let url = core_runtime::logging::strip_url_query(&request.url);
        debug!(url = %url, binary, "Proxying extension request");

        let outcome = tokio::time::timeout(
            self.config.request_timeout,
            self.http
                .execute_with_retry(http_request, RetryPolicy::single_attempt()),
        )
        .await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Extension request failed");
                return ProxyResponse::failure(e.to_string());
            }
            Err(_) => {
                let after_ms = self.config.request_timeout.as_millis() as u64;
                warn!(url = %url, timeout_ms = after_ms, "Extension request timed out");
                return ProxyResponse::failure(format!("Request timed out after {}ms", after_ms));
            }
        };

        let mut result = ProxyResponse {
            status: response.status,
            headers: response.headers.clone(),
            ..ProxyResponse::default()
        };
        if binary {
            result.raw_data = Some(BASE64.encode(&response.body));
        } else {
            result.data = Some(response.text_lossy());
        }
        result
    }

    /// Default headers overlaid with the caller's, caller winning
    /// regardless of header-name case.
    fn merge_headers(&self, caller: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = HashMap::new();
        for (name, value) in [
            ("User-Agent", self.config.user_agent.as_str()),
            ("Accept", self.config.accept.as_str()),
        ] {
            if !caller.keys().any(|k| k.eq_ignore_ascii_case(name)) {
                merged.insert(name.to_string(), value.to_string());
            }
        }
        merged.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}
