//! Best-effort pub/sub fan-out of job events to subscribed clients.
//!
//! The notifier is a convenience layer, never the source of truth: a
//! client that misses an event recovers by re-reading the job store.

pub mod bus;

pub use bus::{JobEvent, Notifier};
