use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimension or metadata field map. Ordered so equal content always hashes
/// and serializes the same way.
pub type Fields = BTreeMap<String, String>;

/// One reporting interval of one view, as handed over by the instrumentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Unit of the underlying measure. Empty when dimensionless.
    #[serde(default)]
    pub unit: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub tags: Vec<Tag>,
    pub data: AggregationData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregationData {
    Count(i64),
    Sum(f64),
    LastValue(f64),
    Distribution(DistributionData),
    /// An aggregation this exporter has no mapping for. Translates to no metrics.
    Unsupported { kind: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionData {
    pub count: i64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sum_of_squared_dev: f64,
    #[serde(default)]
    pub count_per_bucket: Vec<i64>,
}

/// Entity record: who a set of metrics is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub timestamp: i64,
    pub dimensions: Fields,
    pub metadata_fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub metric: String,
    pub timestamp: i64,
    pub value: f64,
    pub dimensions: Fields,
    pub metadata_fields: Fields,
}

/// Output of translating a view or a row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub models: Vec<Model>,
    pub metrics: Vec<Metric>,
}

impl Data {
    pub fn add_model(&mut self, model: Model) {
        self.models.push(model);
    }

    pub fn add_metric(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    pub fn extend(&mut self, other: Data) {
        self.models.extend(other.models);
        self.metrics.extend(other.metrics);
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.metrics.is_empty()
    }
}
