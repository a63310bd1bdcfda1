//! In-memory authoritative store and geo/text lookup helpers.

/// Geo-radius predicate and name-similarity scoring.
pub mod geo;
/// Authoritative element store and lifecycle queries.
pub mod store;
