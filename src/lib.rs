//! # card-ingest
//!
//! Ingests camera cards into deduplicated sessions and publishes one
//! private, progressively updated gallery link per session.
//!
//! ## Core Guarantees
//! - **Content is ingested once** - SHA-256 dedup across every run ever made
//! - **Crashes are resumable** - copies are atomic, hashes are committed only once safe
//! - **Uploads are idempotent** - identical bytes are never sent twice to a key
//! - **The link never goes backwards** - published items stay published
//!
//! ## Architecture
//! - `core` - scanner, dedup, sessions, derivation, remote store, gallery, pipeline
//! - `config` - tunables for a run
//! - `events` - progress reporting over crossbeam channels
//! - `error` - error types with recovery hints

pub mod config;
pub mod core;
pub mod error;
pub mod events;

pub use config::IngestConfig;
pub use error::{IngestError, Result};

/// Initialize tracing for the library
///
/// Reads `RUST_LOG`. Called by the binary; a second call is a no-op.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}
