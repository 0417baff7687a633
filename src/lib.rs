//! Chunked video storage with a metadata catalog and HTTP range streaming.
//!
//! Payload bytes live as fixed-size chunk files described by manifests
//! ([`services::chunk_store`]); descriptive records live in the catalog
//! ([`services::catalog_service`]) and point at exactly one manifest.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
