//! # laniakea-core
//!
//! Shared vocabulary for the Laniakea plugin bridge: the unified error type,
//! the single-producer/single-consumer [`FrameStream`] that carries frames
//! between plugin logic, the bridge and host code, and the [`VersionGate`]
//! that plugins use to refuse incompatible hosts.

pub mod error;
pub mod handshake;
pub mod stream;
pub mod version;

pub use error::{LaniakeaError, Result};
pub use handshake::HandshakeConfig;
pub use laniakea_proto::{Empty, Frame, VersionNumber};
pub use stream::{DEFAULT_STREAM_CAPACITY, FrameSender, FrameStream};
pub use version::{Constraint, VersionGate};
