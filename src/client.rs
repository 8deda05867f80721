use std::time::Duration;

use async_trait::async_trait;
use prost_types::{value::Kind, ListValue, Struct, Value};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::info;

use crate::delivery::PutStatus;
use crate::error::{ExporterError, Result};
use crate::fields::{IMPACT_FROM_DIMENSIONS_FIELD, IMPACT_TO_DIMENSIONS_FIELD};
use crate::models::{Fields, Metric, Model};
use crate::proto;

/// gRPC metadata key carrying the API key.
pub const API_KEY_HEADER: &str = "zenoss-api-key";

/// The two backend calls the exporter needs.
#[async_trait]
pub trait DataReceiver: Send + Sync {
    async fn put_models(&self, models: Vec<Model>) -> Result<PutStatus>;

    async fn put_metrics(&self, metrics: Vec<Metric>) -> Result<PutStatus>;
}

/// [`DataReceiver`] speaking gRPC to the backend.
#[derive(Debug, Clone)]
pub struct GrpcDataReceiver {
    client: proto::DataReceiverServiceClient,
    api_key: MetadataValue<Ascii>,
    timeout: Duration,
}

impl GrpcDataReceiver {
    /// Builds a client without dialing; the connection is made on first use.
    /// Must be called from within a Tokio runtime.
    pub fn connect_lazy(address: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        if api_key.is_empty() {
            return Err(ExporterError::Config("an API key is required".into()));
        }
        let api_key: MetadataValue<Ascii> = api_key
            .parse()
            .map_err(|_| ExporterError::Config("API key is not valid ASCII metadata".into()))?;

        let endpoint = match address.strip_prefix("http://") {
            Some(plain) => Endpoint::from_shared(format!("http://{}", plain))?,
            None => {
                let address = address.strip_prefix("https://").unwrap_or(address);
                Endpoint::from_shared(format!("https://{}", address))?
                    .tls_config(ClientTlsConfig::new().domain_name(tls_host(address)))?
            }
        };

        info!(address, "connecting to data receiver");
        let channel: Channel = endpoint.timeout(timeout).connect_lazy();

        Ok(Self {
            client: proto::DataReceiverServiceClient::new(channel),
            api_key,
            timeout,
        })
    }

    fn request<M>(&self, message: M) -> tonic::Request<M> {
        let mut request = tonic::Request::new(message);
        request
            .metadata_mut()
            .insert(API_KEY_HEADER, self.api_key.clone());
        request.set_timeout(self.timeout);
        request
    }
}

/// Host part of `host:port`, without the brackets of an IPv6 literal.
fn tls_host(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    address.rsplit_once(':').map_or(address, |(host, _)| host)
}

#[async_trait]
impl DataReceiver for GrpcDataReceiver {
    async fn put_models(&self, models: Vec<Model>) -> Result<PutStatus> {
        let request = self.request(proto::Models {
            detailed_response: true,
            models: models.into_iter().map(Into::into).collect(),
        });
        let response = self.client.clone().put_models(request).await?;
        Ok(response.into_inner().into())
    }

    async fn put_metrics(&self, metrics: Vec<Metric>) -> Result<PutStatus> {
        let request = self.request(proto::Metrics {
            detailed_response: true,
            metrics: metrics.into_iter().map(Into::into).collect(),
        });
        let response = self.client.clone().put_metrics(request).await?;
        Ok(response.into_inner().into())
    }
}

impl From<Model> for proto::Model {
    fn from(model: Model) -> Self {
        proto::Model {
            timestamp: model.timestamp,
            dimensions: model.dimensions.into_iter().collect(),
            metadata_fields: Some(metadata_struct(model.metadata_fields)),
        }
    }
}

impl From<Metric> for proto::Metric {
    fn from(metric: Metric) -> Self {
        proto::Metric {
            metric: metric.metric,
            timestamp: metric.timestamp,
            value: metric.value,
            dimensions: metric.dimensions.into_iter().collect(),
            metadata_fields: Some(metadata_struct(metric.metadata_fields)),
        }
    }
}

impl From<proto::StatusResult> for PutStatus {
    fn from(status: proto::StatusResult) -> Self {
        PutStatus {
            succeeded: status.succeeded.max(0) as u64,
            failed: status.failed.max(0) as u64,
            message: status.message,
        }
    }
}

/// Impact fields go out as single-element lists, everything else as strings.
fn metadata_struct(fields: Fields) -> Struct {
    let fields = fields
        .into_iter()
        .map(|(k, v)| {
            let value = if k == IMPACT_FROM_DIMENSIONS_FIELD || k == IMPACT_TO_DIMENSIONS_FIELD {
                Value {
                    kind: Some(Kind::ListValue(ListValue {
                        values: vec![string_value(v)],
                    })),
                }
            } else {
                string_value(v)
            };
            (k, value)
        })
        .collect();
    Struct { fields }
}

fn string_value(s: String) -> Value {
    Value {
        kind: Some(Kind::StringValue(s)),
    }
}
