use thiserror::Error;
use tonic::{Code, Status};

/// Unified error type for the plugin bridge.
#[derive(Error, Debug)]
pub enum LaniakeaError {
    // ── Version negotiation ────────────────────────────────────
    #[error("plugin version not set")]
    VersionNotSet,

    #[error("invalid version constraint '{expr}': {reason}")]
    InvalidConstraintSyntax { expr: String, reason: String },

    #[error("invalid version string '{version}': {reason}")]
    InvalidVersionSyntax { version: String, reason: String },

    #[error("plugin requires a different version of laniakea: {version} does not satisfy {constraint}")]
    VersionMismatch { version: String, constraint: String },

    // ── Streams ────────────────────────────────────────────────
    #[error("stream ended before the first frame")]
    EndOfStream,

    #[error("frame stream closed")]
    StreamClosed,

    #[error("call deadline exceeded")]
    DeadlineExceeded,

    // ── Plugin logic ───────────────────────────────────────────
    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("plugin stopped")]
    Stopped,

    #[error("plugin error: {plugin}: {reason}")]
    Plugin { plugin: String, reason: String },

    // ── Transport ──────────────────────────────────────────────
    #[error("rpc error: {}: {}", .0.code(), .0.message())]
    Rpc(#[from] Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    // ── Config ─────────────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LaniakeaError>;

impl LaniakeaError {
    /// The gRPC status code this error is reported with.
    pub fn code(&self) -> Code {
        match self {
            LaniakeaError::VersionNotSet
            | LaniakeaError::VersionMismatch { .. }
            | LaniakeaError::NotRecording => Code::FailedPrecondition,
            LaniakeaError::InvalidConstraintSyntax { .. }
            | LaniakeaError::InvalidVersionSyntax { .. }
            | LaniakeaError::InvalidCommand(_) => Code::InvalidArgument,
            LaniakeaError::AlreadyRecording => Code::AlreadyExists,
            LaniakeaError::EndOfStream | LaniakeaError::StreamClosed => Code::Aborted,
            LaniakeaError::DeadlineExceeded => Code::DeadlineExceeded,
            LaniakeaError::Rpc(status) => status.code(),
            LaniakeaError::Transport(_) | LaniakeaError::Stopped => Code::Unavailable,
            LaniakeaError::Plugin { .. }
            | LaniakeaError::Config(_)
            | LaniakeaError::Io(_)
            | LaniakeaError::Serialization(_)
            | LaniakeaError::Other(_) => Code::Internal,
        }
    }
}

impl From<LaniakeaError> for Status {
    fn from(err: LaniakeaError) -> Self {
        match err {
            // Remote statuses pass through verbatim.
            LaniakeaError::Rpc(status) => status,
            other => Status::new(other.code(), other.to_string()),
        }
    }
}
