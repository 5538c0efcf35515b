//! Domain types shared by every crate in the pipeline.
//!
//! This crate has zero internal dependencies so it can be used by the
//! store, queue, provider, worker, and API layers alike.

pub mod backoff;
pub mod channels;
pub mod config;
pub mod error;
pub mod job;
pub mod job_events;
pub mod outcome;
pub mod types;
