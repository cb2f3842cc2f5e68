//! # Pipeline Module
//!
//! Orchestrates one ingest of a volume.
//!
//! ## Pipeline Stages
//! 1. **Scan** - Discover media on the volume and pair RAW+JPEG
//! 2. **Hash** - Drop content ingested by any earlier run
//! 3. **Copy** - Land new originals in a session, then commit their hashes
//! 4. **Process** - Derive and upload concurrently, republishing the gallery
//! 5. **Publish** - Bundle, final gallery, permanent share link
//!
//! ## Parallelism
//! rayon pools for hashing and presigning; two scoped thread pools joined by
//! a bounded channel for derive and upload.

mod executor;
mod overlap;

pub use executor::{IngestOutcome, IngestPipeline, IngestPipelineBuilder, SessionReport};
pub use overlap::{run_overlapped, DeriveTask, OverlapContext, OverlapReport, StageAbort};
