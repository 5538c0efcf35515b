//! Atelier ingress API.
//!
//! A thin HTTP/WebSocket surface over the pipeline: submit jobs, read their
//! state, request cancellation, receive provider callbacks, and stream
//! lifecycle events. All pipeline semantics live behind the injected seams
//! in [`state::AppState`]; the API itself holds no job logic.

pub mod config;
pub mod error;
pub mod extract;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
