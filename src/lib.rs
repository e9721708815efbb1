//! # Baobab Reader
//!
//! A PDF ebook catalog with a local-first client cache that synchronizes to
//! a server of record.
//!
//! Every client write lands in the local store first and is marked
//! `pending`. Loading the catalog spawns one independent sync task per
//! record that needs one; each task pushes its record to the remote store
//! and records `synced` or `error`. Without connectivity, records simply
//! stay `pending` until the next attempt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  save   ┌──────────────┐  sync tasks  ┌──────────────┐
//! │  CLI / API   │────────▶│ Local store  │─────────────▶│ Remote store │
//! │  (catalog)   │         │ (SQLite)     │  upsert over │ (SQLite via  │
//! └──────────────┘         └──────────────┘  HTTP or DB  │  server)     │
//!                                                        └──────┬───────┘
//!                                                               │
//!                                                        ┌──────┴───────┐
//!                                                        │ HTTP server  │
//!                                                        │ upload/list/ │
//!                                                        │ sync/delete  │
//!                                                        └──────────────┘
//! ```
//!
//! The data model, store traits, in-memory stores and the sync agent live in
//! the `baobab-core` crate; this crate adds the SQLite backends, the PDF
//! extractor, the server, the HTTP client and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection pools |
//! | [`migrate`] | Schema creation for both databases |
//! | [`local_store`] | SQLite client cache |
//! | [`remote_store`] | SQLite server of record |
//! | [`extract`] | PDF metadata extraction |
//! | [`catalog`] | Local-first catalog operations and sync fan-out |
//! | [`remote_client`] | HTTP remote store and connectivity probe |
//! | [`server`] | HTTP server of record |
//! | [`commands`] | CLI command implementations |

pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod extract;
pub mod local_store;
pub mod migrate;
pub mod remote_client;
pub mod remote_store;
pub mod server;
