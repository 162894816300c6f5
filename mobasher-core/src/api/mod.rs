//! Read API: axum routes over the persistence layer, a
//! Prometheus registry shared with the rest of the process, and the
//! per-request metrics middleware.

pub mod metrics;
pub mod routes;
pub mod server;

pub use server::{ApiServerConfig, serve};
