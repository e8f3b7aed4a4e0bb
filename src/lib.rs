//! Streaming file storage server.
//!
//! Accepts multipart uploads, optionally encrypts them in flight, stores the
//! bytes on local disk or an S3-compatible object store, and records one
//! SQLite row per file. Downloads reverse the path.
//!
//! - `services`: transfer pipeline, cipher, size guard, backends, metadata, coordinators
//! - `handlers` / `routes`: axum surface
//! - `config`: environment + CLI configuration

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
