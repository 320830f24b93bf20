// src/config/mod.rs

//! Task file loading.
//!
//! - [`model`] mirrors the TOML layout.
//! - [`validate`] turns it into run settings plus a validated task graph.
//! - [`loader`] reads files.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, DEFAULT_CONFIG_FILE};
pub use model::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};
