//! Client abstraction over the external generation provider.
//!
//! The pipeline talks to the provider only through the
//! [`client::GenerationProvider`] trait: create a request, poll it, cancel
//! it. [`http::HttpProvider`] is the production implementation;
//! [`limiter::RateLimited`] caps concurrent outbound calls independently of
//! worker concurrency.

pub mod client;
pub mod http;
pub mod limiter;

pub use client::{Artifact, GenerationProvider, PollOutcome, ProviderError, ProviderRef};
