use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bundler::{BundleHandler, Bundler};
use crate::client::{DataReceiver, GrpcDataReceiver};
use crate::config::ExporterConfig;
use crate::delivery::{self, RecordKind};
use crate::error::{ExporterError, Result};
use crate::fields::FieldMapper;
use crate::freshness::FreshnessChecker;
use crate::metrics;
use crate::models::{Data, Metric, Model, ViewData};
use crate::translator::{DefaultTranslator, Translator};

/// Sends bundles through the receiver under a per-call deadline.
struct BatchSender {
    client: Arc<dyn DataReceiver>,
    timeout: Duration,
}

#[async_trait]
impl BundleHandler<Model> for BatchSender {
    async fn handle(&self, bundle: Vec<Model>) {
        let count = bundle.len();
        let _timer = metrics::send_timer(RecordKind::Models);
        let result = tokio::time::timeout(self.timeout, self.client.put_models(bundle))
            .await
            .unwrap_or(Err(ExporterError::Timeout(self.timeout)));
        delivery::report(RecordKind::Models, count, result);
    }
}

#[async_trait]
impl BundleHandler<Metric> for BatchSender {
    async fn handle(&self, bundle: Vec<Metric>) {
        let count = bundle.len();
        let _timer = metrics::send_timer(RecordKind::Metrics);
        let result = tokio::time::timeout(self.timeout, self.client.put_metrics(bundle))
            .await
            .unwrap_or(Err(ExporterError::Timeout(self.timeout)));
        delivery::report(RecordKind::Metrics, count, result);
    }
}

pub struct ExporterBuilder {
    config: ExporterConfig,
    client: Option<Arc<dyn DataReceiver>>,
    translator: Option<Arc<dyn Translator>>,
}

impl ExporterBuilder {
    /// Sends through `client` instead of dialing `config.address`.
    pub fn client(mut self, client: Arc<dyn DataReceiver>) -> Self {
        self.client = Some(client);
        self
    }

    /// Replaces the default view translation.
    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Validates the configuration and starts the background tasks.
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<Exporter> {
        let config = self.config;
        config.validate()?;
        let ignored_metrics = config.ignored_metric_patterns()?;

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ExporterError::Config(format!("no Tokio runtime: {}", e)))?;

        let client = match self.client {
            Some(client) => client,
            None => {
                let api_key = config.api_key.as_deref().unwrap_or_default();
                Arc::new(GrpcDataReceiver::connect_lazy(
                    &config.address,
                    api_key,
                    config.send_timeout(),
                )?)
            }
        };

        let translator = self.translator.unwrap_or_else(|| {
            Arc::new(DefaultTranslator::new(FieldMapper::from_config(&config)))
        });

        let freshness = FreshnessChecker::new(config.freshness_ttl());
        let sender = Arc::new(BatchSender {
            client,
            timeout: config.send_timeout(),
        });
        let options = config.bundler_options();
        let models = Bundler::new(sender.clone() as Arc<dyn BundleHandler<Model>>, options);
        let metrics = Bundler::new(sender as Arc<dyn BundleHandler<Metric>>, options);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            freshness.spawn_eviction(&handle, shutdown_rx.clone()),
            models.spawn_delay_timer(&handle, shutdown_rx.clone()),
            metrics.spawn_delay_timer(&handle, shutdown_rx),
        ];

        info!(
            address = %config.address,
            count_threshold = options.count_threshold,
            delay_threshold = ?options.delay_threshold,
            "exporter started"
        );

        Ok(Exporter {
            ignored_metrics,
            translator,
            freshness,
            models,
            metrics,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Turns view data into models and metrics and ships them in bundles.
///
/// Safe to share between tasks. Dropping the exporter stops its background
/// tasks without sending what is still pending; call [`Exporter::shutdown`]
/// to send it first.
pub struct Exporter {
    ignored_metrics: Vec<Regex>,
    translator: Arc<dyn Translator>,
    freshness: FreshnessChecker,
    models: Bundler<Model>,
    metrics: Bundler<Metric>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Exporter {
    pub fn builder(config: ExporterConfig) -> ExporterBuilder {
        ExporterBuilder {
            config,
            client: None,
            translator: None,
        }
    }

    /// Exporter sending over gRPC to `config.address`.
    pub fn new(config: ExporterConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub async fn export_view(&self, view: &ViewData) {
        debug!(view = %view.name, "exporting view");

        if self.is_ignored(&view.name) {
            debug!(view = %view.name, "ignoring metric");
            metrics::record_ignored_view();
            return;
        }

        let data = self.translator.translate_view(view);
        let data = self.translator.process(data);
        self.bundle_data(data).await;
    }

    /// Waits until everything exported so far has been sent.
    pub async fn flush(&self) {
        self.models.flush().await;
        self.metrics.flush().await;
    }

    /// Stops accepting data, flushes, then stops the background tasks.
    pub async fn shutdown(&self) {
        self.models.close();
        self.metrics.close();
        self.flush().await;

        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "exporter task failed");
            }
        }
        info!("exporter stopped");
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignored_metrics
            .iter()
            .any(|pattern| pattern.find(name).is_some_and(|m| !m.as_str().is_empty()))
    }

    async fn bundle_data(&self, data: Data) {
        for model in data.models {
            if self.freshness.is_fresh(&model) {
                metrics::record_suppressed_model();
                continue;
            }
            if let Err(err) = self.models.add(model).await {
                log_add_error(RecordKind::Models, &err);
            }
        }

        for metric in data.metrics {
            if let Err(err) = self.metrics.add(metric).await {
                log_add_error(RecordKind::Metrics, &err);
            }
        }
    }
}

fn log_add_error(kind: RecordKind, err: &ExporterError) {
    let reason = match err {
        ExporterError::Overflow { .. } => {
            error!(kind = %kind, error = %err, "failed to send {}: buffer full", kind);
            "overflow"
        }
        ExporterError::Closed => {
            debug!(kind = %kind, "exporter is shut down, dropping {}", kind);
            "closed"
        }
        _ => {
            error!(kind = %kind, error = %err, "failed to send {}", kind);
            "error"
        }
    };
    metrics::record_dropped(kind, reason);
}
