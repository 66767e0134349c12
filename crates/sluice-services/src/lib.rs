//! # sluice-services
//!
//! Request boundary for the sluice ingestion layer: an axum router that
//! enforces per-endpoint rate limits, drives [`StreamIngestor`] for
//! generation requests and exposes circuit-breaker state.
//!
//! [`StreamIngestor`]: sluice_core::StreamIngestor

pub mod api;

pub use api::{ApiState, build_router};
