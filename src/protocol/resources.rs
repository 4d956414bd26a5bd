//! Resource reads over `tally://` URIs

use super::catalog::URI_SCHEME;
use crate::error::{MetricsError, MetricsResult};
use crate::orchestrator::{Args, Orchestrator, SeriesRequest};
use reqwest::Url;
use serde_json::Value;

/// Parsed resource address
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUri {
    pub host: String,
    /// Decoded path without the leading slash
    pub path: String,
    pub query: Args,
}

impl ResourceUri {
    pub fn parse(raw: &str) -> MetricsResult<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| MetricsError::invalid(format!("invalid resource uri: {}", e)))?;
        if url.scheme() != URI_SCHEME {
            return Err(MetricsError::invalid(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        let path = url.path().trim_start_matches('/');
        let path = urlencoding::decode(path)
            .map_err(|e| MetricsError::invalid(format!("invalid resource uri: {}", e)))?
            .into_owned();

        let query = url
            .query_pairs()
            .fold(Args::default(), |args, (k, v)| args.with(&k, v.into_owned()));

        Ok(Self {
            host: url.host_str().unwrap_or_default().to_string(),
            path,
            query,
        })
    }
}

/// Resolve a resource URI against the active backend.
pub async fn read_resource(orchestrator: &Orchestrator, raw: &str) -> MetricsResult<Value> {
    let uri = ResourceUri::parse(raw)?;
    match uri.host.as_str() {
        "source" => to_value(orchestrator.source_info().await?),
        "transponders" => orchestrator.list_transponders().await,
        "metrics" => {
            let mut request = SeriesRequest::from_args(&uri.query);
            if uri.path.trim().is_empty() {
                request.key = None;
                to_value(orchestrator.list_metrics(&request).await?)
            } else {
                request.key = Some(uri.path.clone());
                to_value(orchestrator.fetch_series(&request).await?)
            }
        }
        host => Err(MetricsError::invalid(format!("unknown resource: {}", host))),
    }
}

fn to_value(payload: impl serde::Serialize) -> MetricsResult<Value> {
    Ok(serde_json::to_value(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metric_uri() {
        let uri = ResourceUri::parse(
            "tally://metrics/event%3A%3Asignup?from=2024-01-01T00:00:00Z&granularity=1h",
        )
        .unwrap();
        assert_eq!(uri.host, "metrics");
        assert_eq!(uri.path, "event::signup");
        assert_eq!(uri.query.string("from"), "2024-01-01T00:00:00Z");
        assert_eq!(uri.query.string("granularity"), "1h");

        let listing = ResourceUri::parse("tally://metrics").unwrap();
        assert_eq!(listing.path, "");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let err = ResourceUri::parse("http://metrics/signup").unwrap_err();
        assert_eq!(err.to_string(), "unsupported scheme: http");

        let err = ResourceUri::parse("metrics").unwrap_err();
        assert!(err.to_string().starts_with("invalid resource uri"));
    }
}
