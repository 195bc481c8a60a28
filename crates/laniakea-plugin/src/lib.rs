//! # laniakea-plugin
//!
//! Bridges Laniakea plugins over gRPC. Plugin logic implements one of two
//! capability traits and the bridge takes care of the network:
//!
//! - [`Datasource`]: produces a stream of frames between `start_record` and
//!   `stop_record`
//! - [`Controller`]: answers each command frame with a stream of frames
//!
//! Both also implement [`VersionExchange`] so the host can push its version
//! and read the plugin's. Types holding a [`laniakea_core::VersionGate`] get
//! that for free by implementing [`Versioned`].
//!
//! ## Plugin side
//!
//! ```no_run
//! # use laniakea_plugin::*;
//! # async fn run(logic: impl Datasource) -> laniakea_core::Result<()> {
//! let config = laniakea_config::LaniakeaConfig::default();
//! serve_datasource(logic, &config).await
//! # }
//! ```
//!
//! ## Host side
//!
//! ```no_run
//! # use laniakea_plugin::*;
//! # async fn run() -> laniakea_core::Result<()> {
//! let plugin = GrpcDatasourceClient::connect("127.0.0.1:1234").await?;
//! plugin.push_version("0.2.0").await?;
//! let mut frames = plugin.start_record().await?;
//! while let Some(frame) = frames.recv().await {
//!     println!("{} bytes from {}", frame.payload.len(), frame.source);
//! }
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod contracts;
pub mod controller;
pub mod datasource;
pub mod forward;
pub mod serve;
pub mod transport;

pub use context::CallContext;
pub use contracts::{Controller, Datasource, VersionExchange, Versioned};
pub use controller::{GrpcControllerClient, GrpcControllerServer};
pub use datasource::{GrpcDatasourceClient, GrpcDatasourceServer};
pub use forward::{ChannelSink, FrameSink, open_stream, pump_stream};
pub use serve::{HEALTH_SERVICE_NAME, serve_controller, serve_datasource};
pub use transport::connect_channel;
