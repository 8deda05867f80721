pub mod bundler;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod exporter;
pub mod fields;
pub mod freshness;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod proto;
pub mod translator;

pub use client::{DataReceiver, GrpcDataReceiver};
pub use config::ExporterConfig;
pub use error::{ExporterError, Result};
pub use exporter::{Exporter, ExporterBuilder};
pub use models::{AggregationData, Data, DistributionData, Metric, Model, Row, Tag, ViewData};
pub use translator::{DefaultTranslator, Translator};
