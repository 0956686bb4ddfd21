//! # netfab-common
//!
//! Shared types for the netfab crates:
//! - The error taxonomy every fabricator, prober and mutator operation returns
//! - Fabricator configuration loaded from TOML

#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::FabricConfig;
pub use error::{NetfabError, NetfabResult};
