//! # codejson-harvester core
//!
//! Runtime-free logic for the harvester: data models, delay and retry
//! math, cache freshness, snapshot merging, and the snapshot store trait.
//!
//! This crate contains no tokio, HTTP client, filesystem I/O, or logging.
//! Everything here is deterministic given its inputs, which is what the
//! application crate's tests lean on.

pub mod delay;
pub mod freshness;
pub mod merge;
pub mod models;
pub mod retry;
pub mod store;
