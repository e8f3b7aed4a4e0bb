//! Core data models for the file storage service.
//!
//! `StoredObject` is the only durable entity. It maps to the `files` table via
//! `sqlx::FromRow` and serializes as JSON via `serde`.

pub mod file;
