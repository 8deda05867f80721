use std::env;
use std::process;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, info};
use zenoss_exporter::{
    logging, metrics, AggregationData, DistributionData, Exporter, ExporterConfig, Row, Tag, ViewData,
};

const SERVICE_TAG: &str = "service";

#[tokio::main]
async fn main() {
    let json_logs = env::var("ZENOSS_LOG_FORMAT").is_ok_and(|v| v == "json");
    logging::init_logger("zenoss_exporter=info", json_logs);

    let Some(source) = env::var("ZENOSS_SOURCE").ok().filter(|s| !s.is_empty()) else {
        error!("ZENOSS_SOURCE environment variable must be set");
        process::exit(1);
    };

    let mut config = match ExporterConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            process::exit(1);
        }
    };
    config.global_dimensions.insert("source".into(), source);
    if config.model_dimension_tags.is_empty() {
        config.model_dimension_tags.push(SERVICE_TAG.into());
    }

    let period = env::var("ZENOSS_REPORTING_PERIOD_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(60));

    let exporter = match Exporter::new(config) {
        Ok(exporter) => exporter,
        Err(err) => {
            error!(error = %err, "failed to create exporter");
            process::exit(1);
        }
    };

    info!(?period, "recording stats");
    let mut ticker = tokio::time::interval(period);
    let mut recorder = Recorder::default();
    let mut start = Utc::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                recorder.record();
                let end = Utc::now();
                for view in recorder.views(start, end) {
                    exporter.export_view(&view).await;
                }
                start = end;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    exporter.shutdown().await;
    debug!("exporter metrics:\n{}", metrics::gather());
}

/// Produces synthetic request counts and sizes.
#[derive(Default)]
struct Recorder {
    count: i64,
    sizes: Vec<f64>,
}

impl Recorder {
    fn record(&mut self) {
        let mut rng = rand::rng();
        for _ in 0..10 {
            self.count += 1;
            self.sizes.push(f64::from(rng.random_range(0..65_536u32)));
        }
    }

    fn views(&self, start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> Vec<ViewData> {
        let tags = vec![Tag::new(SERVICE_TAG, "example")];
        vec![
            ViewData {
                name: "example.count".into(),
                description: "example count".into(),
                unit: "1".into(),
                start,
                end,
                rows: vec![Row {
                    tags: tags.clone(),
                    data: AggregationData::Count(self.count),
                }],
            },
            ViewData {
                name: "example.size".into(),
                description: "example size".into(),
                unit: "By".into(),
                start,
                end,
                rows: vec![Row {
                    tags,
                    data: AggregationData::Distribution(distribution(&self.sizes)),
                }],
            },
        ]
    }
}

fn distribution(values: &[f64]) -> DistributionData {
    if values.is_empty() {
        return DistributionData::default();
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    DistributionData {
        count: values.len() as i64,
        min: values.iter().cloned().fold(f64::INFINITY, f64::min),
        max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        mean,
        sum_of_squared_dev: values.iter().map(|v| (v - mean).powi(2)).sum(),
        count_per_bucket: Vec::new(),
    }
}
