//! Token lifecycle authority for the QR handoff.
//!
//! Serves the `/api/qr` endpoints over a [`store::TokenStore`], which is
//! either in-process or Redis-backed.

pub mod config;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod store;
pub mod store_redis;
pub mod telemetry;
