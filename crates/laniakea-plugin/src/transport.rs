use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use laniakea_core::Result;

/// Connect to a plugin listening at `addr` (`host:port` or a full URI).
pub async fn connect_channel(addr: &str) -> Result<Channel> {
    let uri = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    debug!(%uri, "connecting to plugin");
    let channel = Endpoint::from_shared(uri)?.connect().await?;
    Ok(channel)
}

/// Wrap `message` in a request carrying `timeout` as its `grpc-timeout`.
pub(crate) fn request<T>(message: T, timeout: Option<Duration>) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    request
}
