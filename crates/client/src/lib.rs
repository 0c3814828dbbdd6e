//! Typed HTTP client for the proxy's REST surface.
//!
//! Wraps the public task endpoints (create, result, user snapshot,
//! voting) and the internal admin endpoints (token minting, task
//! listing, cleanup, work stealing, fleet metrics, rating analytics)
//! using [`reqwest`].

pub mod api;
pub mod responses;

pub use api::{ApiError, ProxyClient};
