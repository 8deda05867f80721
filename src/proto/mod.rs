// Messages and client for the backend's data receiver service, written by
// hand instead of generated so the build does not need protoc.
// Field numbers follow the backend's data_receiver.proto.

use std::collections::HashMap;

use tonic::codegen::http;
use tonic::transport::Channel;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Metric {
    #[prost(string, tag = "1")]
    pub metric: String,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(double, tag = "3")]
    pub value: f64,
    #[prost(map = "string, string", tag = "4")]
    pub dimensions: HashMap<String, String>,
    #[prost(message, optional, tag = "5")]
    pub metadata_fields: Option<prost_types::Struct>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Metrics {
    #[prost(bool, tag = "1")]
    pub detailed_response: bool,
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Model {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(map = "string, string", tag = "2")]
    pub dimensions: HashMap<String, String>,
    #[prost(message, optional, tag = "3")]
    pub metadata_fields: Option<prost_types::Struct>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Models {
    #[prost(bool, tag = "1")]
    pub detailed_response: bool,
    #[prost(message, repeated, tag = "2")]
    pub models: Vec<Model>,
}

/// Reply to both `PutMetrics` and `PutModels`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StatusResult {
    #[prost(int32, tag = "1")]
    pub failed: i32,
    #[prost(int32, tag = "2")]
    pub succeeded: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DataReceiverServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl DataReceiverServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn put_metrics(
        &mut self,
        request: tonic::Request<Metrics>,
    ) -> Result<tonic::Response<StatusResult>, tonic::Status> {
        self.unary(request, "/zenoss.cloud.DataReceiverService/PutMetrics")
            .await
    }

    pub async fn put_models(
        &mut self,
        request: tonic::Request<Models>,
    ) -> Result<tonic::Response<StatusResult>, tonic::Status> {
        self.unary(request, "/zenoss.cloud.DataReceiverService/PutModels")
            .await
    }

    async fn unary<M>(
        &mut self,
        request: tonic::Request<M>,
        path: &'static str,
    ) -> Result<tonic::Response<StatusResult>, tonic::Status>
    where
        M: prost::Message + Send + Sync + 'static,
    {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::new(
                tonic::Code::Unknown,
                format!("Service was not ready: {}", e),
            )
        })?;
        let codec = tonic::codec::ProstCodec::<M, StatusResult>::default();
        let path = http::uri::PathAndQuery::from_static(path);
        self.inner.unary(request, path, codec).await
    }
}
