//! HTTP API handlers for faq-pipeline
//!
//! Admin review surface, ingestion endpoints for the sync services, and the
//! SSE event stream.

pub mod health;
pub mod ingest;
pub mod review;
pub mod sse;

pub use health::health_routes;
pub use ingest::ingest_routes;
pub use review::{flagged_routes, review_routes};
pub use sse::event_stream;
