//! # laniakea-config
//!
//! Plugin-side configuration. Reads `laniakea-plugin.toml`, then applies
//! environment variable overrides and CLI overrides, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{ConfigWarning, LaniakeaConfig, WarningSeverity};
