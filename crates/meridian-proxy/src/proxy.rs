//! Prediction proxy
//!
//! Forwards a JSON body to a model's predict endpoint and reports what the
//! model server said. Backend failures (non-2xx) and transport failures are
//! kept apart so callers can tell "your model errored" from "we could not
//! reach your model".

use std::collections::HashSet;
use std::error::Error as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use reqwest::redirect::Policy;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use meridian_common::{Error, PlatformConfig, Result};
use meridian_registry::ModelRegistry;

use crate::settings::{custom_url, model_url, pinned_address, ConnectionSettings, PredictRequest};

/// Largest model server response relayed back to the caller
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Model server output: parsed JSON, or the raw body when it is not JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionPayload {
    /// JSON response body
    Json(serde_json::Value),
    /// Non-JSON response body
    Raw(String),
}

/// Result of a proxied prediction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    /// Model the prediction was made for
    pub model_name: String,
    /// Status code returned by the model server
    pub status_code: u16,
    /// Response body
    pub output: PredictionPayload,
}

/// Proxies prediction requests to model servers
pub struct PredictionProxy {
    registry: Arc<ModelRegistry>,
    client: reqwest::Client,
    timeout: Duration,
    max_response_bytes: usize,
}

impl PredictionProxy {
    /// Create a proxy using the configured request timeout
    pub fn new(registry: Arc<ModelRegistry>, config: &PlatformConfig) -> Result<Self> {
        let timeout = config.predict_timeout;
        Ok(Self {
            registry,
            client: build_client(timeout, None)?,
            timeout,
            max_response_bytes: MAX_RESPONSE_BYTES,
        })
    }

    /// Override the cap on relayed response bodies
    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    /// Send `request` to the model's predict endpoint.
    ///
    /// `namespace` is only consulted when the target comes from the model
    /// status rather than custom connection settings.
    pub async fn predict(
        &self,
        namespace: &str,
        model: &str,
        request: &PredictRequest,
    ) -> Result<PredictionResult> {
        let default_settings = ConnectionSettings::default();
        let settings = request
            .connection_settings
            .as_ref()
            .unwrap_or(&default_settings);

        let url = self.resolve_target(namespace, model, settings).await?;
        let pinned = pinned_address(&settings.dns_resolve, &url)?;
        let headers = request_headers(settings)?;
        let body = serde_json::to_vec(&request.input_data)
            .map_err(|e| Error::validation(format!("inputData is not serializable: {}", e)))?;

        let client = match (pinned, url.host_str()) {
            (Some(addr), Some(host)) => {
                debug!(host = %host, address = %addr, "pinning name resolution");
                build_client(self.timeout, Some((host, addr)))?
            }
            _ => self.client.clone(),
        };

        let started = Instant::now();
        let response = client
            .post(url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, &e))?;

        let status = response.status();
        let text = self.read_body(&url, response).await?;

        info!(
            model = %model,
            url = %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "prediction proxied"
        );

        if !status.is_success() {
            return Err(Error::Backend {
                status: status.as_u16(),
                body: text,
            });
        }

        let output = match serde_json::from_str(&text) {
            Ok(value) => PredictionPayload::Json(value),
            Err(_) => PredictionPayload::Raw(text),
        };
        Ok(PredictionResult {
            model_name: model.to_string(),
            status_code: status.as_u16(),
            output,
        })
    }

    async fn resolve_target(
        &self,
        namespace: &str,
        model: &str,
        settings: &ConnectionSettings,
    ) -> Result<Url> {
        if settings.use_custom {
            return custom_url(settings, model);
        }

        let descriptor = self.registry.get(namespace, model).await?;
        if !descriptor.ready {
            return Err(Error::ModelNotReady(format!(
                "model '{}' in namespace '{}' is not ready{}",
                model,
                namespace,
                descriptor
                    .message
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            )));
        }
        let external = descriptor.external_url.ok_or_else(|| {
            Error::ModelNotReady(format!("model '{}' has no external URL yet", model))
        })?;
        model_url(&external, model)
    }

    async fn read_body(&self, url: &Url, mut response: reqwest::Response) -> Result<String> {
        let limit = self.max_response_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(self.oversized(url));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(url, &e))?
        {
            if body.len() + chunk.len() > limit {
                return Err(self.oversized(url));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn oversized(&self, url: &Url) -> Error {
        warn!(url = %url, limit = self.max_response_bytes, "prediction response too large");
        Error::Proxy(format!(
            "response from {} exceeds {} bytes",
            url, self.max_response_bytes
        ))
    }

    fn transport_error(&self, url: &Url, err: &reqwest::Error) -> Error {
        let detail = error_chain(err);
        warn!(url = %url, error = %detail, "prediction transport failure");
        if err.is_timeout() {
            Error::Proxy(format!(
                "request to {} timed out after {}s",
                url,
                self.timeout.as_secs()
            ))
        } else {
            Error::Proxy(format!("failed to reach {}: {}", url, detail))
        }
    }
}

fn build_client(timeout: Duration, pin: Option<(&str, SocketAddr)>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(Policy::none());
    if let Some((host, addr)) = pin {
        builder = builder.resolve(host, addr);
    }
    builder
        .build()
        .map_err(|e| Error::internal(format!("failed to create HTTP client: {}", e)))
}

/// Default JSON content type plus caller headers.
///
/// A caller header replaces the default of the same name; repeating a name
/// sends every value.
fn request_headers(settings: &ConnectionSettings) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let mut from_caller = HashSet::new();

    for pair in &settings.headers {
        let key = pair.key.trim();
        if key.is_empty() {
            continue;
        }
        let value = HeaderValue::from_str(pair.value.trim()).map_err(|_| {
            Error::validation(format!("invalid value for header '{}'", key))
        })?;
        if key.eq_ignore_ascii_case("host") {
            // Sets the virtual host; the connection still goes to the URL host
            headers.insert(HOST, value);
            continue;
        }
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| Error::validation(format!("invalid header name '{}'", key)))?;
        if from_caller.insert(name.clone()) {
            headers.insert(name, value);
        } else {
            headers.append(name, value);
        }
    }
    Ok(headers)
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
