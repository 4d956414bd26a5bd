//! Remote metrics API client
//!
//! Thin request/response wrapper over the REST endpoints under `/api/v1`.
//! Every call needs a bearer token; without one it fails before any I/O.

use crate::error::{MetricsError, MetricsResult};
use crate::timeframe::SourceInfo;
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Path prefix of every endpoint
pub const API_BASE_PATH: &str = "/api/v1";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the remote API
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL (scheme optional, defaults to http)
    pub base_url: String,
    /// Bearer token
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Body of `POST /metrics/query`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBody {
    pub mode: String,
    pub key: String,
    pub value_path: String,
    pub from: String,
    pub to: String,
    pub granularity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<String>,
    pub slices: usize,
}

#[derive(Debug, Deserialize)]
struct SourceEnvelope {
    #[serde(default)]
    data: SourceInfo,
}

/// Remote metrics API client
pub struct RemoteClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

/// Add `http://` when no scheme is given and drop trailing slashes.
pub fn normalize_base_url(raw: &str) -> MetricsResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MetricsError::Config("missing base URL".to_string()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    Url::parse(&with_scheme)
        .map_err(|e| MetricsError::Config(format!("invalid base URL: {}", e)))?;

    Ok(with_scheme.trim_end_matches('/').to_string())
}

fn map_send_error(err: reqwest::Error) -> MetricsError {
    if err.is_timeout() {
        MetricsError::Transport(format!("timed out: {}", err))
    } else if err.is_connect() {
        MetricsError::Transport(format!("could not connect: {}", err))
    } else {
        MetricsError::Transport(err.to_string())
    }
}

impl RemoteClient {
    pub fn new(config: RemoteConfig) -> MetricsResult<Self> {
        let base_url = normalize_base_url(&config.base_url)?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(env!("CARGO_PKG_NAME"))
            .build()
            .map_err(|e| MetricsError::Config(format!("failed to build HTTP client: {}", e)))?;

        let token = config
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /metrics`; empty parameters are left out of the query string.
    pub async fn get_metrics(&self, params: &[(&str, &str)]) -> MetricsResult<Value> {
        self.request(Method::GET, "/metrics", params, None).await
    }

    /// `POST /metrics`
    pub async fn post_metrics(&self, body: &Value) -> MetricsResult<Value> {
        self.request(Method::POST, "/metrics", &[], Some(body)).await
    }

    /// `POST /metrics/query`, returning the `data` object of the response.
    pub async fn query_metrics(&self, query: &QueryBody) -> MetricsResult<Map<String, Value>> {
        let body = serde_json::to_value(query)?;
        let response = self
            .request(Method::POST, "/metrics/query", &[], Some(&body))
            .await?;

        match response.get("data") {
            None | Some(Value::Null) => Err(MetricsError::Decode("missing data in response".to_string())),
            Some(Value::Object(data)) => Ok(data.clone()),
            Some(_) => Err(MetricsError::Decode("unexpected data shape".to_string())),
        }
    }

    /// `GET /source`
    pub async fn get_source(&self) -> MetricsResult<SourceInfo> {
        let response = self.request(Method::GET, "/source", &[], None).await?;
        let envelope: SourceEnvelope = serde_json::from_value(response)?;
        Ok(envelope.data)
    }

    pub async fn list_transponders(&self) -> MetricsResult<Value> {
        self.request(Method::GET, "/transponders", &[], None).await
    }

    pub async fn create_transponder(&self, payload: &Value) -> MetricsResult<Value> {
        self.request(Method::POST, "/transponders", &[], Some(payload))
            .await
    }

    pub async fn update_transponder(&self, id: &str, payload: &Value) -> MetricsResult<Value> {
        let path = format!("/transponders/{}", urlencoding::encode(id));
        self.request(Method::PUT, &path, &[], Some(payload)).await
    }

    pub async fn delete_transponder(&self, id: &str) -> MetricsResult<Value> {
        let path = format!("/transponders/{}", urlencoding::encode(id));
        self.request(Method::DELETE, &path, &[], None).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> MetricsResult<Value> {
        let token = self.token.as_deref().ok_or(MetricsError::AuthRequired)?;
        let url = format!("{}{}{}", self.base_url, API_BASE_PATH, path);
        debug!(method = %method, url = %url, "remote request");

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json");

        let query: Vec<(&str, &str)> = params
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .copied()
            .collect();
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        if method != Method::GET {
            builder = builder.header(reqwest::header::CONTENT_TYPE, "application/json");
            if let Some(body) = body {
                builder = builder.body(serde_json::to_vec(body)?);
            }
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_send_error)?;

        if !status.is_success() {
            return Err(MetricsError::Api {
                status: status.as_u16(),
                body: text.trim().to_string(),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}
