//! Shared identifiers, status enums, and their wire-integer mappings.

use serde::{Deserialize, Serialize};

/// Opaque element identifier (alphanumeric).
pub type ElementId = String;
/// Taxonomy option identifier.
pub type OptionId = u64;
/// Webhook post identifier.
pub type WebhookPostId = u64;
/// Webhook target identifier.
pub type WebhookId = u64;

/// Publication/moderation status of an element.
///
/// The integer lattice is preserved for range queries and wire
/// compatibility; use [`ElementStatus::as_int`] only at serialization
/// boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementStatus {
    /// Removed because merged into a duplicate cluster.
    Duplicate,
    /// Shadow copy of a published element awaiting moderation. Never
    /// independently visible.
    ModifiedPendingVersion,
    /// Removed because invalid.
    Deleted,
    /// Refused by collaborative vote.
    CollaborativeRefused,
    /// Refused by an admin.
    AdminRefused,
    /// Published element with a pending shadow edit.
    PendingModification,
    /// Newly submitted, not yet validated.
    PendingAdd,
    /// Validated by an admin.
    AdminValidate,
    /// Validated by collaborative vote.
    CollaborativeValidate,
    /// Created directly by an admin (or import).
    AddedByAdmin,
    /// Edited by an admin.
    ModifiedByAdmin,
    /// Edited by the element owner.
    ModifiedByOwner,
    /// Edited through a direct-moderation hash link.
    ModifiedFromHash,
}

impl ElementStatus {
    /// Wire integer for range comparisons and persisted rows.
    pub fn as_int(self) -> i32 {
        match self {
            Self::Duplicate => -6,
            Self::ModifiedPendingVersion => -5,
            Self::Deleted => -4,
            Self::CollaborativeRefused => -3,
            Self::AdminRefused => -2,
            Self::PendingModification => -1,
            Self::PendingAdd => 0,
            Self::AdminValidate => 1,
            Self::CollaborativeValidate => 2,
            Self::AddedByAdmin => 3,
            Self::ModifiedByAdmin => 4,
            Self::ModifiedByOwner => 5,
            Self::ModifiedFromHash => 6,
        }
    }

    /// Inverse of [`as_int`](Self::as_int).
    pub fn from_int(value: i32) -> Option<Self> {
        Some(match value {
            -6 => Self::Duplicate,
            -5 => Self::ModifiedPendingVersion,
            -4 => Self::Deleted,
            -3 => Self::CollaborativeRefused,
            -2 => Self::AdminRefused,
            -1 => Self::PendingModification,
            0 => Self::PendingAdd,
            1 => Self::AdminValidate,
            2 => Self::CollaborativeValidate,
            3 => Self::AddedByAdmin,
            4 => Self::ModifiedByAdmin,
            5 => Self::ModifiedByOwner,
            6 => Self::ModifiedFromHash,
            _ => return None,
        })
    }

    /// True for statuses awaiting moderation (add or shadowed edit).
    pub fn is_pending(self) -> bool {
        matches!(self, Self::PendingAdd | Self::PendingModification)
    }

    /// True for `status >= PendingModification`: potentially visible in
    /// standard listings.
    pub fn is_visible(self) -> bool {
        self.as_int() >= Self::PendingModification.as_int()
    }

    /// True for `status > PendingAdd`: published.
    pub fn is_published(self) -> bool {
        self.as_int() > Self::PendingAdd.as_int()
    }
}

/// Orthogonal flag tracking whether an element needs human review,
/// independent of publication status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModerationState {
    /// Nothing to review.
    #[default]
    NotNeeded,
    /// At least one unresolved report.
    ReportsSubmitted,
    /// Collaborative votes disagree.
    VotesConflicts,
    /// Flagged as a probable duplicate of another element.
    PotentialDuplicate,
    /// Coordinates missing or unresolvable.
    GeolocError,
    /// No taxonomy option assigned.
    NoOptionProvided,
}

impl ModerationState {
    /// Wire integer.
    pub fn as_int(self) -> i32 {
        match self {
            Self::NotNeeded => 0,
            Self::ReportsSubmitted => 1,
            Self::VotesConflicts => 2,
            Self::PotentialDuplicate => 3,
            Self::GeolocError => 4,
            Self::NoOptionProvided => 5,
        }
    }

    /// Inverse of [`as_int`](Self::as_int).
    pub fn from_int(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::NotNeeded,
            1 => Self::ReportsSubmitted,
            2 => Self::VotesConflicts,
            3 => Self::PotentialDuplicate,
            4 => Self::GeolocError,
            5 => Self::NoOptionProvided,
            _ => return None,
        })
    }
}

/// Kind of interaction recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionKind {
    /// Element deletion.
    Deleted,
    /// Element creation.
    Add,
    /// Element edit.
    Edit,
    /// Vote on a pending change.
    Vote,
    /// Problem report.
    Report,
    /// Import from an external source.
    Import,
    /// Deletion reversal.
    Restored,
    /// Moderation flag cleared without touching record content.
    ModerationResolved,
}

impl InteractionKind {
    /// Wire integer.
    pub fn as_int(self) -> i32 {
        match self {
            Self::Deleted => -1,
            Self::Add => 0,
            Self::Edit => 1,
            Self::Vote => 2,
            Self::Report => 3,
            Self::Import => 4,
            Self::Restored => 5,
            Self::ModerationResolved => 6,
        }
    }
}

/// Who validated or refused a pending element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationType {
    /// Decided by an admin.
    Admin,
    /// Decided by collaborative votes.
    Collaborative,
}

/// Webhook dispatch state carried on each contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WebhookDispatchStatus {
    /// Dispatch not yet attempted.
    #[default]
    Pending,
    /// Delivered to all targets.
    Dispatched,
    /// Superseded by a newer contribution before dispatch.
    Cancelled,
}

/// Delivery state of a queued webhook post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PostStatus {
    /// Created, not yet attempted.
    #[default]
    Queued,
    /// Delivered (terminal).
    Dispatched,
    /// Last attempt failed; retried until the attempt cap.
    Failed,
}
