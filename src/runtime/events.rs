//! Runtime event stream payloads.

use crate::{moderation::actions::ResolveOutcome, types::ElementId};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementEvent {
    /// An element was created or mutated.
    Committed {
        /// Committed element id.
        id: ElementId,
    },
    /// A pending add or pending edit was resolved.
    Resolved {
        /// Resolved element id.
        id: ElementId,
        /// Whether this call did the resolution.
        outcome: ResolveOutcome,
    },
    /// Dirty state up to the latest command is on disk.
    Durable,
}
