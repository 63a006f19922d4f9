//! Component A — Metric Source Adapter.
//!
//! A single operation, `query_instant`, executes an instant PromQL-style
//! query and returns a scalar. Transport failures are the caller's
//! problem to treat as a missing sample, not a budget violation — this
//! module never turns a transport error into anything but `Ok(0.0)`'s
//! sibling: an explicit `Err` the caller chooses how to swallow.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum MetricSourceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("query deadline exceeded")]
    Timeout,
    #[error("malformed response envelope: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn query_instant(
        &self,
        expr: &str,
        labels: &HashMap<String, String>,
    ) -> Result<f64, MetricSourceError>;
}

/// `{status: "success"|"error", data: {result: [{value: [ts, "str"]}]}}`.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    value: (f64, String),
}

pub struct PrometheusMetricSource {
    client: reqwest::Client,
    base_url: String,
    query_deadline: Duration,
}

impl PrometheusMetricSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            query_deadline: Duration::from_secs(5),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.query_deadline = deadline;
        self
    }

    fn build_query(expr: &str, labels: &HashMap<String, String>) -> String {
        if labels.is_empty() {
            return expr.to_string();
        }
        let selector = labels
            .iter()
            .map(|(k, v)| format!(r#"{}="{}""#, k, v))
            .collect::<Vec<_>>()
            .join(",");
        format!("{expr}{{{selector}}}")
    }
}

#[async_trait]
impl MetricSource for PrometheusMetricSource {
    async fn query_instant(
        &self,
        expr: &str,
        labels: &HashMap<String, String>,
    ) -> Result<f64, MetricSourceError> {
        let query = Self::build_query(expr, labels);
        let url = format!("{}/api/v1/query", self.base_url);

        let send = self
            .client
            .get(&url)
            .query(&[("query", query.as_str())])
            .send();

        let response = tokio::time::timeout(self.query_deadline, send)
            .await
            .map_err(|_| MetricSourceError::Timeout)??;

        let body: QueryResponse = response.json().await?;

        if body.status != "success" {
            return Err(MetricSourceError::Malformed(format!(
                "query status was '{}'",
                body.status
            )));
        }

        let Some(data) = body.data else {
            debug!(query = %query, "empty result set, returning 0");
            return Ok(0.0);
        };

        let Some(first) = data.result.into_iter().next() else {
            return Ok(0.0);
        };

        let value = first.value.1.parse::<f64>().unwrap_or(f64::NAN);
        if value.is_nan() {
            warn!(query = %query, raw = %first.value.1, "non-numeric sample, treating as 0");
            return Ok(0.0);
        }
        Ok(value)
    }
}

/// In-memory stand-in for tests: a fixed table of `expr -> value`.
#[derive(Default, Clone)]
pub struct StubMetricSource {
    pub values: std::sync::Arc<tokio::sync::RwLock<HashMap<String, f64>>>,
}

impl StubMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, expr: &str, value: f64) {
        self.values.write().await.insert(expr.to_string(), value);
    }
}

#[async_trait]
impl MetricSource for StubMetricSource {
    async fn query_instant(
        &self,
        expr: &str,
        _labels: &HashMap<String, String>,
    ) -> Result<f64, MetricSourceError> {
        Ok(*self.values.read().await.get(expr).unwrap_or(&0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_returns_zero_for_missing_series() {
        let source = StubMetricSource::new();
        let v = source
            .query_instant("request_count", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(v, 0.0);
    }

    #[tokio::test]
    async fn stub_returns_configured_value() {
        let source = StubMetricSource::new();
        source.set("error_count", 42.0).await;
        let v = source
            .query_instant("error_count", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(v, 42.0);
    }

    #[test]
    fn query_selector_formatting() {
        let mut labels = HashMap::new();
        labels.insert("service".to_string(), "api".to_string());
        let q = PrometheusMetricSource::build_query("request_count", &labels);
        assert_eq!(q, r#"request_count{service="api"}"#);
    }
}
