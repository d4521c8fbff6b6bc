#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Cluster topology model and the pure half of catalog reconciliation:
//! record derivation, health-check templating and generation diffing.
//!
//! Nothing in this crate performs I/O. The daemon fetches snapshots and
//! check definitions, feeds them through here, and applies the resulting
//! deltas against remote agents.

pub mod address;
pub mod derive;
pub mod diff;
pub mod generation;
pub mod index;
pub mod model;
pub mod refresh;
pub mod template;

mod util;

pub use util::{now_ms, sanitize_name, short_hostname};
