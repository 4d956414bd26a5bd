//! Query orchestration
//!
//! Validates requests, dispatches them to the active backend and shapes
//! the answer into one payload per operation. Local results are computed
//! here from the fetched series; remote results come from the API and only
//! get their path lists cleaned up.

pub mod args;
pub mod payload;
pub mod summary;

pub use args::{load_json_payload, Args, QueryRequest, RangeArgs, SeriesRequest, WriteRequest};
pub use payload::{
    AggregatePayload, FormattedPayload, FormattedView, KeyCount, MetricsListing, QueryMode,
    QueryResult, SeriesPayload, SourcePayload, Timeframe, WriteResult, WrittenMetric, STATUS_OK,
};

use crate::backend::{Backend, LocalBackend, QueryBody, RemoteClient};
use crate::error::{MetricsError, MetricsResult};
use crate::series::{Aggregator, Series};
use crate::stats::packer::normalize_number;
use crate::stats::SYSTEM_KEY;
use crate::timeframe::{
    resolve_time_range, validate_granularity, validate_timestamp, SourceInfo, TimeRange,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

const TRANSPONDERS_REMOTE_ONLY: &str = "transponders are only available for api drivers";
const SETUP_LOCAL_ONLY: &str =
    "setup is only supported for local drivers (sqlite, postgres, mysql, redis, mongo)";

/// Sorted, deduplicated intersection of `paths` with `available`
pub fn filter_available(paths: &[String], available: &[String]) -> Vec<String> {
    let allowed: BTreeSet<&String> = available.iter().collect();
    let matched: BTreeSet<&String> = paths.iter().filter(|p| allowed.contains(p)).collect();
    matched.into_iter().cloned().collect()
}

/// Reject `*` in a value path.
pub fn ensure_no_wildcards(value_path: &str) -> MetricsResult<()> {
    if value_path.contains('*') {
        return Err(MetricsError::invalid(format!(
            "wildcards are not supported in value_path {:?}",
            value_path
        )));
    }
    Ok(())
}

/// Sort and dedupe the path lists of a remote query answer.
///
/// A non-empty `available_paths` with an empty `matched_paths` means the
/// path selected nothing.
pub fn normalize_remote_paths(
    mut data: Map<String, Value>,
    value_path: &str,
) -> MetricsResult<Map<String, Value>> {
    let mut lengths = [None, None];
    for (slot, field) in ["available_paths", "matched_paths"].iter().enumerate() {
        if let Some(Value::Array(items)) = data.get(*field) {
            let paths: BTreeSet<String> = items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect();
            lengths[slot] = Some(paths.len());
            data.insert(field.to_string(), json!(paths));
        }
    }

    if let [Some(available), Some(0)] = lengths {
        if available > 0 {
            return Err(MetricsError::NoMatchingData {
                path: value_path.to_string(),
            });
        }
    }
    Ok(data)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Front door for every metrics operation
pub struct Orchestrator {
    backend: Backend,
}

impl Orchestrator {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn driver_name(&self) -> &'static str {
        self.backend.driver_name()
    }

    pub fn is_remote(&self) -> bool {
        self.backend.is_remote()
    }

    /// Explicit granularity, else the source's default.
    pub async fn resolve_granularity(&self, explicit: Option<&str>) -> MetricsResult<String> {
        match &self.backend {
            Backend::Local(local) => local.resolve_granularity(explicit),
            Backend::Remote(client) => match explicit.map(str::trim).filter(|v| !v.is_empty()) {
                Some(value) => validate_granularity(value),
                None => Ok(client.get_source().await?.pick_default()),
            },
        }
    }

    async fn resolve(&self, range: &RangeArgs) -> MetricsResult<(TimeRange, String)> {
        let time_range = resolve_time_range(range.from.as_deref(), range.to.as_deref())?;
        let granularity = self.resolve_granularity(range.granularity.as_deref()).await?;
        Ok((time_range, granularity))
    }

    /// Metric keys with observation counts.
    ///
    /// Locally a non-system `key` lists that key's value paths instead.
    pub async fn list_metrics(&self, request: &SeriesRequest) -> MetricsResult<MetricsListing> {
        let (range, granularity) = self.resolve(&request.range).await?;

        let paths = match &self.backend {
            Backend::Remote(client) => {
                let response = client
                    .get_metrics(&[
                        ("from", range.from.as_str()),
                        ("to", range.to.as_str()),
                        ("granularity", granularity.as_str()),
                    ])
                    .await?;
                let values = response.get("data").and_then(|data| data.get("values"));
                summary::summarize_remote_values(values)
            }
            Backend::Local(local) => {
                let key = request.key.as_deref().unwrap_or(SYSTEM_KEY);
                let series = self.fetch_local(local, key, &range, &granularity, true).await?;
                if key == SYSTEM_KEY {
                    summary::summarize_system_keys(&series.values)
                } else {
                    summary::summarize_value_paths(&series.values)
                }
            }
        };

        Ok(MetricsListing {
            status: STATUS_OK,
            timeframe: Timeframe::new(&range, &granularity),
            total_paths: paths.len(),
            paths,
        })
    }

    /// Raw series for a key (the system key when none is given).
    pub async fn fetch_series(&self, request: &SeriesRequest) -> MetricsResult<SeriesPayload> {
        let (range, granularity) = self.resolve(&request.range).await?;
        let key = request.key.clone();

        let data = match &self.backend {
            Backend::Remote(client) => {
                let mut params = vec![
                    ("from", range.from.as_str()),
                    ("to", range.to.as_str()),
                    ("granularity", granularity.as_str()),
                ];
                if let Some(key) = key.as_deref() {
                    params.push(("key", key));
                }
                if request.skip_blanks {
                    params.push(("skip_blanks", "true"));
                }
                let mut response = client.get_metrics(&params).await?;
                response
                    .get_mut("data")
                    .map(Value::take)
                    .unwrap_or(Value::Null)
            }
            Backend::Local(local) => {
                let key = key.as_deref().unwrap_or(SYSTEM_KEY);
                self.fetch_local(local, key, &range, &granularity, request.skip_blanks)
                    .await?
                    .to_json()
            }
        };

        Ok(SeriesPayload {
            status: STATUS_OK,
            metric_key: key.unwrap_or_else(|| SYSTEM_KEY.to_string()),
            timeframe: Timeframe::new(&range, &granularity),
            data,
        })
    }

    /// Aggregate, timeline or category query over one value path.
    pub async fn run_query(&self, request: &QueryRequest) -> MetricsResult<QueryResult> {
        if request.key.is_empty() {
            return Err(MetricsError::invalid("key is required"));
        }
        if request.value_path.is_empty() {
            return Err(MetricsError::invalid("value_path is required"));
        }
        if !self.is_remote() {
            ensure_no_wildcards(&request.value_path)?;
        }

        let aggregator = match request.mode {
            QueryMode::Aggregate => {
                let name = request
                    .aggregator
                    .as_deref()
                    .ok_or_else(|| MetricsError::invalid("aggregator is required"))?;
                let parsed = Aggregator::from_str(name).ok_or_else(|| {
                    MetricsError::invalid(format!(
                        "unsupported aggregator {:?}",
                        name.trim().to_lowercase()
                    ))
                })?;
                Some(parsed)
            }
            _ => None,
        };

        let (range, granularity) = self.resolve(&request.range).await?;
        debug!(
            mode = request.mode.as_str(),
            key = %request.key,
            value_path = %request.value_path,
            granularity = %granularity,
            "run query"
        );

        match &self.backend {
            Backend::Remote(client) => {
                self.query_remote(client, request, aggregator, &range, &granularity)
                    .await
            }
            Backend::Local(local) => {
                let series = self
                    .fetch_local(local, &request.key, &range, &granularity, false)
                    .await?;
                self.shape_local(&series, request, aggregator, &range, &granularity)
            }
        }
    }

    async fn query_remote(
        &self,
        client: &RemoteClient,
        request: &QueryRequest,
        aggregator: Option<Aggregator>,
        range: &TimeRange,
        granularity: &str,
    ) -> MetricsResult<QueryResult> {
        let body = QueryBody {
            mode: request.mode.as_str().to_string(),
            key: request.key.clone(),
            value_path: request.value_path.clone(),
            from: range.from.clone(),
            to: range.to.clone(),
            granularity: granularity.to_string(),
            aggregator: aggregator.map(|a| a.as_str().to_string()),
            slices: request.slice_count(),
        };
        let data = client.query_metrics(&body).await?;
        Ok(QueryResult::Remote(normalize_remote_paths(
            data,
            &request.value_path,
        )?))
    }

    fn shape_local(
        &self,
        series: &Series,
        request: &QueryRequest,
        aggregator: Option<Aggregator>,
        range: &TimeRange,
        granularity: &str,
    ) -> MetricsResult<QueryResult> {
        let path = request.value_path.as_str();
        let slices = request.slice_count();
        let available = series.available_paths();

        match (request.mode, aggregator) {
            (QueryMode::Aggregate, Some(aggregator)) => {
                if available.is_empty() {
                    return Err(MetricsError::NoData {
                        path: path.to_string(),
                    });
                }
                if !available.iter().any(|p| p == path) {
                    return Err(MetricsError::UnknownPath(path.to_string()));
                }

                let values: Vec<Value> = series
                    .aggregate(path, aggregator, slices)
                    .into_iter()
                    .flatten()
                    .map(normalize_number)
                    .collect();
                if values.is_empty() {
                    return Err(MetricsError::NoData {
                        path: path.to_string(),
                    });
                }

                let value = if slices == 1 {
                    values.first().cloned()
                } else {
                    None
                };
                let matched = vec![path.to_string()];

                Ok(QueryResult::Aggregate(AggregatePayload {
                    status: STATUS_OK,
                    aggregator: aggregator.as_str().to_string(),
                    metric_key: request.key.clone(),
                    value_path: path.to_string(),
                    slices,
                    count: values.len(),
                    values,
                    timeframe: Timeframe::labelled(range, granularity),
                    table: series.table(&matched),
                    available_paths: available,
                    matched_paths: matched,
                    value,
                }))
            }
            (QueryMode::Aggregate, None) => Err(MetricsError::invalid("aggregator is required")),
            (mode, _) => {
                let (result, keys) = match mode {
                    QueryMode::Timeline => {
                        let timeline = series.format_timeline(path, slices);
                        let keys: Vec<String> = timeline.keys().cloned().collect();
                        (FormattedView::Timeline(timeline), keys)
                    }
                    _ => {
                        let category = series.format_category(path, slices);
                        let keys = category.keys();
                        (FormattedView::Category(category), keys)
                    }
                };

                let matched = filter_available(&keys, &available);
                if matched.is_empty() {
                    return Err(MetricsError::NoMatchingData {
                        path: path.to_string(),
                    });
                }

                Ok(QueryResult::Formatted(FormattedPayload {
                    status: STATUS_OK,
                    formatter: mode.as_str(),
                    metric_key: request.key.clone(),
                    value_path: path.to_string(),
                    slices,
                    timeframe: Timeframe::labelled(range, granularity),
                    result,
                    table: series.table(&matched),
                    available_paths: available,
                    matched_paths: matched,
                }))
            }
        }
    }

    /// Record one event; `at` defaults to now.
    pub async fn write_metric(&self, request: &WriteRequest) -> MetricsResult<WriteResult> {
        if request.key.is_empty() {
            return Err(MetricsError::invalid("key is required"));
        }
        let values = match &request.values {
            None | Some(Value::Null) => return Err(MetricsError::invalid("values is required")),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(MetricsError::invalid("values must be a JSON object")),
        };

        let at = match request.at.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(at) => at.to_string(),
            None => now_rfc3339(),
        };
        let at_time = validate_timestamp("at", &at)?;

        match &self.backend {
            Backend::Remote(client) => {
                let body = json!({
                    "key": request.key,
                    "at": at,
                    "values": values,
                });
                Ok(WriteResult::Remote(client.post_metrics(&body).await?))
            }
            Backend::Local(local) => {
                local.write(request.mode, &request.key, at_time, &values).await?;
                debug!(key = %request.key, mode = request.mode.as_str(), "metric written");
                Ok(WriteResult::Local {
                    data: WrittenMetric {
                        key: request.key.clone(),
                        at,
                        values,
                    },
                })
            }
        }
    }

    /// Default and available granularities of the active source.
    pub async fn source_info(&self) -> MetricsResult<SourcePayload> {
        let data = match &self.backend {
            Backend::Remote(client) => client.get_source().await?,
            Backend::Local(local) => SourceInfo {
                default_granularity: Some(local.resolve_granularity(None)?),
                available_granularities: local.effective_granularities(),
            },
        };
        Ok(SourcePayload { data })
    }

    fn remote(&self) -> MetricsResult<&RemoteClient> {
        match &self.backend {
            Backend::Remote(client) => Ok(client),
            Backend::Local(_) => Err(MetricsError::UnsupportedForDriver(
                TRANSPONDERS_REMOTE_ONLY.to_string(),
            )),
        }
    }

    pub async fn list_transponders(&self) -> MetricsResult<Value> {
        self.remote()?.list_transponders().await
    }

    pub async fn create_transponder(&self, payload: Option<Value>) -> MetricsResult<Value> {
        let client = self.remote()?;
        let payload = ensure_object_payload(payload)?;
        client.create_transponder(&payload).await
    }

    pub async fn update_transponder(&self, id: &str, payload: Option<Value>) -> MetricsResult<Value> {
        let client = self.remote()?;
        let id = required_id(id)?;
        let payload = ensure_object_payload(payload)?;
        client.update_transponder(id, &payload).await
    }

    pub async fn delete_transponder(&self, id: &str) -> MetricsResult<Value> {
        let client = self.remote()?;
        client.delete_transponder(required_id(id)?).await
    }

    /// Provision local storage; returns a confirmation line.
    pub async fn setup(&self) -> MetricsResult<String> {
        let local = match &self.backend {
            Backend::Local(local) => local,
            Backend::Remote(_) => {
                return Err(MetricsError::UnsupportedForDriver(SETUP_LOCAL_ONLY.to_string()))
            }
        };
        local.setup().await?;

        let target = local.target();
        let target = match target.trim() {
            "" => "(default)",
            value => value,
        };
        Ok(format!("{} setup complete for {}", local.kind().title(), target))
    }

    /// Write out buffered local operations.
    pub async fn flush(&self) -> MetricsResult<()> {
        self.backend.flush().await
    }

    async fn fetch_local(
        &self,
        local: &LocalBackend,
        key: &str,
        range: &TimeRange,
        granularity: &str,
        skip_blanks: bool,
    ) -> MetricsResult<Series> {
        local
            .fetch_values(key, range.from_at(), range.to_at(), granularity, skip_blanks)
            .await
    }
}

fn required_id(id: &str) -> MetricsResult<&str> {
    match id.trim() {
        "" => Err(MetricsError::invalid("id is required")),
        value => Ok(value),
    }
}

fn ensure_object_payload(payload: Option<Value>) -> MetricsResult<Value> {
    match payload {
        Some(Value::Object(map)) => Ok(Value::Object(map)),
        _ => Err(MetricsError::invalid("payload must be a JSON object")),
    }
}
