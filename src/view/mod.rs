//! Denormalized JSON view materialization.

/// View materializer deriving the five JSON projections.
pub mod materializer;
/// Taxonomy/configuration and link-resolver collaborator contracts.
pub mod taxonomy;
