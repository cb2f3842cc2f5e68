//! # Remote Module
//!
//! The private object store the session's artifacts and gallery live in.
//!
//! The store is a capability ([`ObjectStore`]): put, exists, presign, list.
//! - [`LocalObjectStore`] - a directory-backed bucket with signed `file://` URLs
//! - [`MemoryObjectStore`] - in-process store with fault injection, for tests
//! - [`RetryingStore`] - wraps any store with the transport retry policy
//!
//! Keys for one session come from [`SessionKeys`].

mod keys;
mod local;
mod memory;
mod retry;
mod traits;

pub use keys::SessionKeys;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use retry::{RetryPolicy, RetryingStore};
pub use traits::{validate_key, ObjectStore};
