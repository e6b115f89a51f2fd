//! Upstream access: the HTTP client, the bundled model table, and the
//! credential-rotating retry loop.

mod client;
mod generate;
pub mod models;

pub use client::UpstreamClient;
pub use generate::UpstreamEngine;
