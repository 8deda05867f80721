use std::env;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::bundler::{
    BundlerOptions, DEFAULT_BUFFERED_LIMIT, DEFAULT_COUNT_THRESHOLD, DEFAULT_DELAY_THRESHOLD,
};
use crate::error::{ExporterError, Result};
use crate::models::Fields;

pub const DEFAULT_ADDRESS: &str = "api.zenoss.io:443";
pub const DEFAULT_SOURCE_TYPE: &str = "zenoss/rust-exporter-zenoss";
pub const DEFAULT_FRESHNESS_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Exporter settings. Zero numeric values mean "use the default".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub address: String,
    pub api_key: Option<String>,
    /// Added as dimensions to every model and metric.
    pub global_dimensions: Fields,
    /// Added as metadata to every model and metric.
    pub global_metadata_fields: Fields,
    /// Row tags promoted to dimensions, in display-name order.
    pub model_dimension_tags: Vec<String>,
    /// Views whose name matches any of these patterns are not exported.
    pub ignored_metric_names: Vec<String>,
    pub bundle_count_threshold: usize,
    pub bundle_delay_threshold_ms: u64,
    pub bundle_buffered_limit: usize,
    pub freshness_ttl_secs: u64,
    pub send_timeout_secs: u64,
    pub source_type: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            api_key: None,
            global_dimensions: Fields::new(),
            global_metadata_fields: Fields::new(),
            model_dimension_tags: Vec::new(),
            ignored_metric_names: Vec::new(),
            bundle_count_threshold: DEFAULT_COUNT_THRESHOLD,
            bundle_delay_threshold_ms: DEFAULT_DELAY_THRESHOLD.as_millis() as u64,
            bundle_buffered_limit: DEFAULT_BUFFERED_LIMIT,
            freshness_ttl_secs: DEFAULT_FRESHNESS_TTL.as_secs(),
            send_timeout_secs: DEFAULT_SEND_TIMEOUT.as_secs(),
            source_type: DEFAULT_SOURCE_TYPE.to_string(),
        }
    }
}

impl ExporterConfig {
    /// Defaults overridden by any `ZENOSS_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(address) = env_var("ZENOSS_ADDRESS") {
            config.address = address;
        }
        config.api_key = env_var("ZENOSS_API_KEY");
        if let Some(dims) = env_var("ZENOSS_GLOBAL_DIMENSIONS") {
            config.global_dimensions = parse_fields(&dims)?;
        }
        if let Some(meta) = env_var("ZENOSS_GLOBAL_METADATA") {
            config.global_metadata_fields = parse_fields(&meta)?;
        }
        if let Some(tags) = env_var("ZENOSS_MODEL_DIMENSION_TAGS") {
            config.model_dimension_tags = parse_list(&tags);
        }
        if let Some(names) = env_var("ZENOSS_IGNORED_METRIC_NAMES") {
            config.ignored_metric_names = parse_list(&names);
        }
        if let Some(v) = env_number("ZENOSS_BUNDLE_COUNT_THRESHOLD")? {
            config.bundle_count_threshold = v;
        }
        if let Some(v) = env_number("ZENOSS_BUNDLE_DELAY_MS")? {
            config.bundle_delay_threshold_ms = v;
        }
        if let Some(v) = env_number("ZENOSS_BUNDLE_BUFFERED_LIMIT")? {
            config.bundle_buffered_limit = v;
        }
        if let Some(v) = env_number("ZENOSS_FRESHNESS_TTL_SECONDS")? {
            config.freshness_ttl_secs = v;
        }
        if let Some(v) = env_number("ZENOSS_SEND_TIMEOUT_SECONDS")? {
            config.send_timeout_secs = v;
        }
        if let Some(source_type) = env_var("ZENOSS_SOURCE_TYPE") {
            config.source_type = source_type;
        }

        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ExporterError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(ExporterError::Config("address must not be empty".into()));
        }

        let host_port = self
            .address
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        let port_ok = host_port
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !port_ok {
            return Err(ExporterError::Config(format!(
                "address {:?} must be host:port",
                self.address
            )));
        }

        let bundler = self.bundler_options();
        if bundler.buffered_limit < bundler.count_threshold {
            return Err(ExporterError::Config(format!(
                "bundle buffered limit {} is below the count threshold {}",
                bundler.buffered_limit, bundler.count_threshold
            )));
        }

        self.ignored_metric_patterns()?;
        Ok(())
    }

    pub fn ignored_metric_patterns(&self) -> Result<Vec<Regex>> {
        self.ignored_metric_names
            .iter()
            .map(|pattern| Regex::new(pattern).map_err(ExporterError::from))
            .collect()
    }

    pub fn bundler_options(&self) -> BundlerOptions {
        BundlerOptions {
            count_threshold: or_default(self.bundle_count_threshold, DEFAULT_COUNT_THRESHOLD),
            delay_threshold: match self.bundle_delay_threshold_ms {
                0 => DEFAULT_DELAY_THRESHOLD,
                ms => Duration::from_millis(ms),
            },
            buffered_limit: or_default(self.bundle_buffered_limit, DEFAULT_BUFFERED_LIMIT),
        }
    }

    pub fn freshness_ttl(&self) -> Duration {
        match self.freshness_ttl_secs {
            0 => DEFAULT_FRESHNESS_TTL,
            secs => Duration::from_secs(secs),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        match self.send_timeout_secs {
            0 => DEFAULT_SEND_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }
}

fn or_default(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>> {
    env_var(name)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| ExporterError::Config(format!("{} is not a number: {:?}", name, v)))
        })
        .transpose()
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parses `k=v,k=v`.
fn parse_fields(value: &str) -> Result<Fields> {
    parse_list(value)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(ExporterError::Config(format!("expected key=value, got {:?}", pair))),
        })
        .collect()
}
