//! HTTP surface for the Skiff broker.
//!
//! The routes map broker sentinels onto transport-level failures:
//! out-of-bounds and unknown topics become 404, conflicts 409, malformed
//! parameters 400, a missing or wrong API key 401, and a fired deadline 408.
//! Batches travel in the record-batch wire format on both directions, so the
//! HTTP layer adds no encoding of its own.

pub mod auth;
pub mod routes;

pub use routes::{router, AppState};
