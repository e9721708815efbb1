//! # Baobab Core
//!
//! Runtime-agnostic logic for Baobab Reader: the ebook model, the local and
//! remote store traits (with in-memory backends), the metadata-extractor
//! contract, and the sync agent that reconciles the two stores.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O.

pub mod extract;
pub mod models;
pub mod store;
pub mod sync;
