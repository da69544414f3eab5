//! Rowlift Server Library
//!
//! HTTP boundary for the rowlift ingestion pipeline.
//!
//! # Overview
//!
//! The server exposes a small REST API over the upload coordinator:
//!
//! - **Upload Endpoints**: obtain an upload id, post a CSV or ZIP of CSVs,
//!   cancel a running upload
//! - **Progress Stream**: server-sent events relaying pipeline progress
//! - **Database Management**: PostgreSQL staging and master tables via SQLx
//! - **Configuration**: environment-based configuration management
//!
//! # Framework Stack
//!
//! - **Axum**: web framework and multipart extraction
//! - **SQLx**: PostgreSQL pool, transactions and migrations
//! - **Tower**: middleware (tracing, CORS)

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

// Re-export commonly used types
pub use config::Config;
pub use error::ApiError;
pub use routes::{api_router, AppState};
