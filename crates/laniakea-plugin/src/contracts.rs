use async_trait::async_trait;

use laniakea_core::{Frame, FrameStream, Result, VersionGate};

/// Version exchange between host and plugin, required of every plugin shape.
#[async_trait]
pub trait VersionExchange: Send + Sync {
    /// Push the host's version to the plugin. Fails if the plugin does not
    /// accept it.
    async fn push_version(&self, host_version: &str) -> Result<()>;

    /// The plugin's own release version.
    async fn get_version(&self) -> Result<String>;
}

/// Implemented by plugin logic that keeps its versions in a [`VersionGate`].
/// Such types get [`VersionExchange`] without further code.
pub trait Versioned: Send + Sync {
    fn version_gate(&self) -> &VersionGate;
}

#[async_trait]
impl<T: Versioned> VersionExchange for T {
    async fn push_version(&self, host_version: &str) -> Result<()> {
        self.version_gate().push_version(host_version)
    }

    async fn get_version(&self) -> Result<String> {
        self.version_gate().get_version()
    }
}

impl Versioned for VersionGate {
    fn version_gate(&self) -> &VersionGate {
        self
    }
}

/// A plugin that produces frames on its own once recording starts.
#[async_trait]
pub trait Datasource: VersionExchange + 'static {
    /// Begin producing frames. Fails if a recording is already active.
    ///
    /// The returned stream ends when the plugin closes its sender, e.g.
    /// after `stop_record`. Every frame queued before that is delivered.
    async fn start_record(&self) -> Result<FrameStream>;

    /// Halt the active recording without stopping the plugin.
    /// Fails with `NotRecording` if nothing is recording.
    async fn stop_record(&self) -> Result<()>;

    /// Halt any active recording and release resources. Must not return
    /// until every background producer has finished.
    async fn stop(&self) -> Result<()>;
}

/// A plugin that answers each command frame with zero or more frames.
///
/// Whether a command starts or ends continuous production is up to the
/// plugin; the bridge only forwards the streams.
#[async_trait]
pub trait Controller: VersionExchange + 'static {
    /// Handle one command. Fails if the frame is not a command this plugin
    /// understands.
    async fn command(&self, frame: Frame) -> Result<FrameStream>;

    /// Halt all activity and release resources.
    async fn stop(&self) -> Result<()>;
}
