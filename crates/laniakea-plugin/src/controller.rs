//! Controller bridge: the host-side client and the plugin-side gRPC service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::contracts::{Controller, VersionExchange};
use crate::forward::{StreamTasks, open_stream};
use crate::transport;
use laniakea_config::LaniakeaConfig;
use laniakea_core::{DEFAULT_STREAM_CAPACITY, Empty, Frame, FrameStream, Result, VersionNumber};
use laniakea_proto::{ControllerClient, ControllerServer, ControllerService};

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Host-side handle to a remote Controller plugin.
#[derive(Debug, Clone)]
pub struct GrpcControllerClient {
    client: ControllerClient<Channel>,
    stream_capacity: usize,
    request_timeout: Option<Duration>,
    stream_deadline: Option<Duration>,
}

impl GrpcControllerClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: ControllerClient::new(channel),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            request_timeout: None,
            stream_deadline: None,
        }
    }

    pub async fn connect(addr: &str) -> Result<Self> {
        Ok(Self::new(transport::connect_channel(addr).await?))
    }

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

    /// Deadline for `Command`, covering the whole reply stream.
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
impl VersionExchange for GrpcControllerClient {
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
impl Controller for GrpcControllerClient {
    async fn command(&self, frame: Frame) -> Result<FrameStream> {
        let response = self.client.clone().command(self.stream_request(frame)).await?;
        open_stream(response.into_inner(), self.stream_capacity).await
    }

    async fn stop(&self) -> Result<()> {
        self.client.clone().stop(self.request(Empty {})).await?;
        Ok(())
    }
}

/// Serves a [`Controller`] implementation over gRPC.
///
/// Each `Command` call gets its own forwarding task; commands may run
/// concurrently and their streams are independent.
pub struct GrpcControllerServer<T: Controller> {
    inner: Arc<T>,
    tasks: StreamTasks,
}

impl<T: Controller> GrpcControllerServer<T> {
    pub fn new(inner: T) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_arc(inner: Arc<T>) -> Self {
        Self {
            inner,
            tasks: StreamTasks::new(DEFAULT_STREAM_CAPACITY, DEFAULT_SHUTDOWN_GRACE),
        }
    }

    pub fn configured(self, config: &LaniakeaConfig) -> Self {
        self.with_stream_capacity(config.stream.buffer)
            .with_shutdown_grace(config.server.shutdown_grace())
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.tasks.set_capacity(capacity);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.tasks.set_grace(grace);
        self
    }

    pub fn logic(&self) -> &Arc<T> {
        &self.inner
    }

    pub fn active_streams(&self) -> usize {
        self.tasks.active()
    }

    /// Stop the plugin logic, then wait for forwarding tasks to finish.
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.inner.stop().await;
        if let Err(e) = &result {
            warn!(error = %e, "controller stop failed");
        }
        self.tasks.drain().await;
        result
    }

    pub fn into_service(self: Arc<Self>, max_message_bytes: usize) -> ControllerServer<Self> {
        ControllerServer::from_arc(self)
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes)
    }
}

#[async_trait]
impl<T: Controller> ControllerService for GrpcControllerServer<T> {
    type CommandStream = ReceiverStream<std::result::Result<Frame, Status>>;

    async fn stop(&self, _request: Request<Empty>) -> std::result::Result<Response<Empty>, Status> {
        self.shutdown().await?;
        Ok(Response::new(Empty {}))
    }

    async fn command(
        &self,
        request: Request<Frame>,
    ) -> std::result::Result<Response<Self::CommandStream>, Status> {
        let ctx = self.tasks.context_for(&request)?;
        let frame = request.into_inner();
        debug!(source = %frame.source, content_type = %frame.content_type(), "command received");
        let frames = self.inner.command(frame).await.map_err(|e| {
            debug!(error = %e, "command rejected");
            Status::from(e)
        })?;
        Ok(Response::new(self.tasks.forward("Command", frames, ctx)))
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
