//! Site configuration for torqueinfo.
//!
//! This crate handles the provider configuration file, the optional status
//! probe that disables publishing, and the BDII LDIF files that map share
//! identifiers to local queue names.

pub mod config;
pub mod ldif;
pub mod probe;

pub use config::{Config, ConfigError, OutputFormat};
pub use ldif::{BdiiConfig, Glue2Mapping, LdifError, glue1_queue_map, glue2_queue_map};
pub use probe::interface_is_off;
