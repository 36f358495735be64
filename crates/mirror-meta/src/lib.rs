//! Configuration management for Mirror Manager.
//!
//! One typed struct per configuration section, deserialised once from a
//! TOML file and validated up front so that a bad configuration stops the
//! run before any mirror is touched.

pub mod config;
pub mod defaults;
pub mod error;

pub use config::{Config, DefaultsConfig, MirrorConfig, MirrorsConfig, SummaryConfig};
pub use error::{Error, Result};
