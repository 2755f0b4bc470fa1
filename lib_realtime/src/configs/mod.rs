//! # Configuration Modules
//!
//! Option records for the transport client and their JSON loaders.

/// Recognized client options, defaults, loading and validation.
pub mod config_realtime;
