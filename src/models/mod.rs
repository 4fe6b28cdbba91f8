//! # Operation Models
//!
//! Result structures for the operations the backend exposes to its
//! upstream callers (the HTTP layer lives outside this service).
//! These are separate from database models to allow caller-specific
//! formatting.
//!
//! ## Serialization
//!
//! All models use Serde; field names are converted to camelCase for
//! JavaScript clients.

pub mod responses;

pub use responses::*;
