//! Datasource bridge: the host-side client and the plugin-side gRPC service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::contracts::{Datasource, VersionExchange};
use crate::forward::{StreamTasks, open_stream};
use crate::transport;
use laniakea_config::LaniakeaConfig;
use laniakea_core::{DEFAULT_STREAM_CAPACITY, Empty, Frame, FrameStream, Result, VersionNumber};
use laniakea_proto::{DatasourceClient, DatasourceServer, DatasourceService};

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── Host side ──────────────────────────────────────────────────

/// Host-side handle to a remote Datasource plugin.
///
/// Implements [`Datasource`] by issuing the matching RPC. Errors reported by
/// the plugin come back as [`laniakea_core::LaniakeaError::Rpc`] carrying the
/// plugin's status code and message unchanged.
#[derive(Debug, Clone)]
pub struct GrpcDatasourceClient {
    client: DatasourceClient<Channel>,
    stream_capacity: usize,
    request_timeout: Option<Duration>,
    stream_deadline: Option<Duration>,
}

impl GrpcDatasourceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: DatasourceClient::new(channel),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            request_timeout: None,
            stream_deadline: None,
        }
    }

    pub async fn connect(addr: &str) -> Result<Self> {
        Ok(Self::new(transport::connect_channel(addr).await?))
    }

    /// Apply buffer size, message size limit and unary timeout from `config`.
    pub fn configured(self, config: &LaniakeaConfig) -> Self {
        self.with_stream_capacity(config.stream.buffer)
            .with_max_message_size(config.stream.max_message_bytes)
            .with_request_timeout(config.client.request_timeout())
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    /// Deadline for unary calls.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Deadline for `StartRecord`, covering the whole stream. Unset by
    /// default, so recordings may run indefinitely.
    pub fn with_stream_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.stream_deadline = deadline;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.client = self
            .client
            .max_decoding_message_size(bytes)
            .max_encoding_message_size(bytes);
        self
    }

    fn request<T>(&self, message: T) -> Request<T> {
        transport::request(message, self.request_timeout)
    }

    fn stream_request<T>(&self, message: T) -> Request<T> {
        transport::request(message, self.stream_deadline)
    }
}

#[async_trait]
impl VersionExchange for GrpcDatasourceClient {
    async fn push_version(&self, host_version: &str) -> Result<()> {
        self.client
            .clone()
            .push_version(self.request(VersionNumber::new(host_version)))
            .await?;
        Ok(())
    }

    async fn get_version(&self) -> Result<String> {
        let response = self.client.clone().get_version(self.request(Empty {})).await?;
        Ok(response.into_inner().version)
    }
}

#[async_trait]
impl Datasource for GrpcDatasourceClient {
    async fn start_record(&self) -> Result<FrameStream> {
        let response = self
            .client
            .clone()
            .start_record(self.stream_request(Empty {}))
            .await?;
        open_stream(response.into_inner(), self.stream_capacity).await
    }

    async fn stop_record(&self) -> Result<()> {
        self.client.clone().stop_record(self.request(Empty {})).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.client.clone().stop(self.request(Empty {})).await?;
        Ok(())
    }
}

// ── Plugin side ────────────────────────────────────────────────

/// Serves a [`Datasource`] implementation over gRPC.
pub struct GrpcDatasourceServer<T: Datasource> {
    inner: Arc<T>,
    tasks: StreamTasks,
}

impl<T: Datasource> GrpcDatasourceServer<T> {
    pub fn new(inner: T) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_arc(inner: Arc<T>) -> Self {
        Self {
            inner,
            tasks: StreamTasks::new(DEFAULT_STREAM_CAPACITY, DEFAULT_SHUTDOWN_GRACE),
        }
    }

    /// Apply buffer size and shutdown grace period from `config`.
    pub fn configured(self, config: &LaniakeaConfig) -> Self {
        self.with_stream_capacity(config.stream.buffer)
            .with_shutdown_grace(config.server.shutdown_grace())
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.tasks.set_capacity(capacity);
        self
    }

    /// How long `Stop` waits for in-flight streams before cancelling them.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.tasks.set_grace(grace);
        self
    }

    pub fn logic(&self) -> &Arc<T> {
        &self.inner
    }

    /// Number of streams currently being forwarded.
    pub fn active_streams(&self) -> usize {
        self.tasks.active()
    }

    /// Stop the plugin logic, then wait for forwarding tasks to finish.
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.inner.stop().await;
        if let Err(e) = &result {
            warn!(error = %e, "datasource stop failed");
        }
        self.tasks.drain().await;
        result
    }

    /// Wrap a shared bridge in the tonic service, with message size limits.
    pub fn into_service(self: Arc<Self>, max_message_bytes: usize) -> DatasourceServer<Self> {
        DatasourceServer::from_arc(self)
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes)
    }
}

#[async_trait]
impl<T: Datasource> DatasourceService for GrpcDatasourceServer<T> {
    type StartRecordStream = ReceiverStream<std::result::Result<Frame, Status>>;

    async fn start_record(
        &self,
        request: Request<Empty>,
    ) -> std::result::Result<Response<Self::StartRecordStream>, Status> {
        let ctx = self.tasks.context_for(&request)?;
        let frames = self.inner.start_record().await.map_err(|e| {
            debug!(error = %e, "start_record rejected");
            Status::from(e)
        })?;
        info!("recording started");
        Ok(Response::new(self.tasks.forward("StartRecord", frames, ctx)))
    }

    async fn stop_record(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<Empty>, Status> {
        self.inner.stop_record().await?;
        info!("recording stopped");
        Ok(Response::new(Empty {}))
    }

    async fn stop(&self, _request: Request<Empty>) -> std::result::Result<Response<Empty>, Status> {
        self.shutdown().await?;
        Ok(Response::new(Empty {}))
    }

    async fn push_version(
        &self,
        request: Request<VersionNumber>,
    ) -> std::result::Result<Response<Empty>, Status> {
        self.inner.push_version(&request.into_inner().version).await?;
        Ok(Response::new(Empty {}))
    }

    async fn get_version(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<VersionNumber>, Status> {
        let version = self.inner.get_version().await?;
        Ok(Response::new(VersionNumber { version }))
    }
}
