//! HTTP primitives: buffered request/response snapshots and the network seam.

mod client;
mod types;

pub use client::{HttpNetwork, Network, NetworkError};
pub use types::{Headers, Method, Request, RequestKey, Response};
