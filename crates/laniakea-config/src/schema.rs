use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use laniakea_core::VersionGate;
use laniakea_core::version::{parse_constraint, parse_version};

/// Root configuration, mapped to `laniakea-plugin.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaniakeaConfig {
    pub plugin: PluginConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

// ── Plugin ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Logical source name stamped on emitted frames.
    pub name: String,
    /// The plugin's own release version.
    pub version: String,
    /// Host versions this plugin accepts, e.g. ">= 0.2.0". None = any.
    pub host_version_constraint: Option<String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: "laniakea-plugin".into(),
            version: "0.1.0".into(),
            host_version_constraint: None,
        }
    }
}

impl PluginConfig {
    /// Build the plugin's version gate from `version` and `host_version_constraint`.
    pub fn version_gate(&self) -> laniakea_core::Result<VersionGate> {
        let gate = VersionGate::new();
        gate.set_plugin_version(self.version.as_str());
        if let Some(constraint) = &self.host_version_constraint {
            gate.set_version_constraint(constraint)?;
        }
        Ok(gate)
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the plugin's gRPC server binds. Port 0 picks a free port.
    pub listen: String,
    /// How long `Stop` waits for in-flight streams to drain before cancelling them.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:0".into(),
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ── Client ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for unary calls from the host. None = no timeout.
    /// Streaming calls ignore it; see `with_stream_deadline` on the clients.
    pub request_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

// ── Stream ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frames buffered between producer and consumer before the producer blocks.
    pub buffer: usize,
    /// Largest encoded message accepted or sent, in bytes.
    pub max_message_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer: laniakea_core::DEFAULT_STREAM_CAPACITY,
            max_message_bytes: 16 * 1024 * 1024,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

impl LaniakeaConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all error messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Plugin identity ───
        if self.plugin.name.is_empty() {
            warnings.push(ConfigWarning {
                field: "plugin.name".into(),
                message: "name is empty; frames will carry no source".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 'test_datasource'".into()),
            });
        }
        if let Err(e) = parse_version(&self.plugin.version) {
            warnings.push(ConfigWarning {
                field: "plugin.version".into(),
                message: e.to_string(),
                severity: WarningSeverity::Error,
                hint: Some("Use a semantic version such as '0.1.0'".into()),
            });
        }
        match &self.plugin.host_version_constraint {
            Some(expr) => {
                if let Err(e) = parse_constraint(expr) {
                    warnings.push(ConfigWarning {
                        field: "plugin.host_version_constraint".into(),
                        message: e.to_string(),
                        severity: WarningSeverity::Error,
                        hint: Some("Use comma-separated clauses such as '>= 0.2.0, < 2.0.0' or '~> 1.2'".into()),
                    });
                }
            }
            None => {
                warnings.push(ConfigWarning {
                    field: "plugin.host_version_constraint".into(),
                    message: "no constraint; any host version will be accepted".into(),
                    severity: WarningSeverity::Warning,
                    hint: None,
                });
            }
        }

        // ── Server ───
        if self.server.listen.parse::<SocketAddr>().is_err() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: format!("'{}' is not a socket address", self.server.listen),
                severity: WarningSeverity::Error,
                hint: Some("Use host:port, e.g. '127.0.0.1:1234'".into()),
            });
        }

        // ── Stream ───
        if self.stream.buffer == 0 {
            warnings.push(ConfigWarning {
                field: "stream.buffer".into(),
                message: "buffer is 0; frames could never be queued".into(),
                severity: WarningSeverity::Error,
                hint: Some(format!(
                    "Set to e.g. {}",
                    laniakea_core::DEFAULT_STREAM_CAPACITY
                )),
            });
        }
        if self.stream.max_message_bytes < 4 * 1024 {
            warnings.push(ConfigWarning {
                field: "stream.max_message_bytes".into(),
                message: format!(
                    "{} bytes is too small for most frames",
                    self.stream.max_message_bytes
                ),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Logging ───
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown format '{}', falling back to pretty", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some("Use 'pretty' or 'json'".into()),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }
        Ok(warnings)
    }
}
