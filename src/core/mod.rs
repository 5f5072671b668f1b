//! In-memory authoritative entity store and reverse-reference index.

/// Reverse-reference index.
pub mod indices;
/// Authoritative keyed record store.
pub mod store;
