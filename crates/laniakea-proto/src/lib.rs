//! # laniakea-proto
//!
//! Wire schema shared by the Laniakea host and its plugins. The message and
//! service definitions live in `proto/plugin.proto`; the Rust code under
//! `src/generated` is produced from it by `tonic-build` and checked in so
//! that building the workspace does not require `protoc`.
//!
//! Three messages travel over both services:
//!
//! - [`Empty`]: no fields
//! - [`Frame`]: `source`, `type`, `timestamp` (ms since epoch), `payload`
//! - [`VersionNumber`]: a single semantic-version string

#[allow(clippy::all)]
#[allow(missing_docs)]
mod generated {
    include!("generated/proto.rs");
}

pub use generated::controller_client::ControllerClient;
pub use generated::controller_server::{Controller as ControllerService, ControllerServer};
pub use generated::datasource_client::DatasourceClient;
pub use generated::datasource_server::{Datasource as DatasourceService, DatasourceServer};
pub use generated::{Empty, Frame, VersionNumber};

/// Fully-qualified gRPC service names.
pub const DATASOURCE_SERVICE: &str = generated::datasource_server::SERVICE_NAME;
pub const CONTROLLER_SERVICE: &str = generated::controller_server::SERVICE_NAME;

impl Frame {
    /// Build a frame stamped with the current wall-clock time in milliseconds.
    pub fn new(
        source: impl Into<String>,
        content_type: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            source: source.into(),
            r#type: content_type.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            payload: payload.into(),
        }
    }

    /// Override the producer-assigned timestamp.
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }

    /// The MIME-like tag the receiver uses to pick a payload decoder.
    pub fn content_type(&self) -> &str {
        &self.r#type
    }
}

impl VersionNumber {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}
