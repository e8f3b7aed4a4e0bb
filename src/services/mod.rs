//! Streaming transfer core and the storage it talks to.

pub mod backend;
pub mod cipher;
pub mod error;
pub mod file_service;
pub mod metadata;
pub mod pipeline;
pub mod size_guard;
