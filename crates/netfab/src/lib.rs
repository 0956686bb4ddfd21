//! # netfab
//!
//! Command line access to the netfab fabricator, prober and route mutator.
//! Cluster lifecycle stays with the provisioning tool; `netfab exec` hands
//! it a network explicitly instead of through the parent environment.

#![warn(missing_docs)]

pub mod cli;
