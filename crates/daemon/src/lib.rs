#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Discovery daemon: fetches cluster snapshots and keeps the configured
//! backends (the builtin record table and the service catalog) in step with
//! them.

pub mod agent;
pub mod apply;
pub mod backend;
pub mod builtin;
pub mod catalog;
pub mod config;
pub mod consul;
pub mod leader;
pub mod memory;
pub mod scheduler;
pub mod snapshot;
