//! # Configuration
//!
//! Client configuration: endpoints, limits, and logging.

pub mod client;

pub use client::{ClientConfig, ConfigError, DEFAULT_MAX_IMAGE_BYTES, LogFormat};
