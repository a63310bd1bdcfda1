//! Element domain records: the canonical entity, its embedded
//! sub-entities, and the draft/patch payloads used to mutate it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{
    ElementId, ElementStatus, InteractionKind, ModerationState, OptionId, WebhookDispatchStatus,
};

/// Resolved geolocation. Required before any JSON materialization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// Postal address, with the department code derived from the postal
/// code prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    /// Street line.
    pub street_address: Option<String>,
    /// Postal code.
    pub postal_code: Option<String>,
    /// City name.
    pub address_locality: Option<String>,
}

impl Address {
    /// Two-digit department code derived from the postal code.
    pub fn department_code(&self) -> Option<&str> {
        self.postal_code.as_deref().and_then(|pc| pc.get(0..2))
    }
}

/// Taxonomy assignment: one option with a display index and an
/// optional free-text description. Unique per option id on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    /// Referenced taxonomy option.
    pub option_id: OptionId,
    /// Display ordering index.
    pub index: u32,
    /// Optional description shown alongside the category.
    pub description: Option<String>,
}

/// Admin-applied stamp (badge) on an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    /// Stamp identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
}

/// Immutable audit entry describing one accepted change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// What happened.
    pub kind: InteractionKind,
    /// Moderator/submitter message, if any.
    pub message: Option<String>,
    /// Author identity (display name or email).
    pub author: String,
    /// Status the element ended up in as a result of this change.
    pub status: ElementStatus,
    /// Creation timestamp, epoch milliseconds.
    pub created_at_ms: u64,
    /// Whether the outbound webhook for this change fired.
    pub webhook_dispatch_status: WebhookDispatchStatus,
}

impl Contribution {
    /// Admin-review JSON shape.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "type": self.kind.as_int(),
            "message": self.message,
            "author": self.author,
            "status": self.status.as_int(),
            "createdAt": crate::element::format_timestamp(self.created_at_ms),
        })
    }
}

/// A report or vote attached to an element. Resolvable exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInteraction {
    /// Report or Vote.
    pub kind: InteractionKind,
    /// Vote value (ignored for reports).
    pub value: i32,
    /// Free-text body.
    pub message: Option<String>,
    /// Author identity.
    pub author: String,
    /// Creation timestamp, epoch milliseconds.
    pub created_at_ms: u64,
    /// Whether a moderator resolved this interaction.
    pub is_resolved: bool,
    /// Resolution message.
    pub resolved_message: Option<String>,
    /// Resolving actor.
    pub resolved_by: Option<String>,
}

impl UserInteraction {
    /// Creates an unresolved report.
    pub fn report(author: impl Into<String>, message: Option<String>, now_ms: u64) -> Self {
        Self {
            kind: InteractionKind::Report,
            value: 0,
            message,
            author: author.into(),
            created_at_ms: now_ms,
            is_resolved: false,
            resolved_message: None,
            resolved_by: None,
        }
    }

    /// Creates a vote supporting (positive) or opposing (negative) a
    /// pending change.
    pub fn vote(author: impl Into<String>, value: i32, message: Option<String>, now_ms: u64) -> Self {
        Self {
            kind: InteractionKind::Vote,
            value,
            message,
            author: author.into(),
            created_at_ms: now_ms,
            is_resolved: false,
            resolved_message: None,
            resolved_by: None,
        }
    }

    /// Marks the interaction resolved. Subsequent calls are no-ops.
    pub fn resolve(&mut self, message: &str, resolved_by: &str) {
        if self.is_resolved {
            return;
        }
        self.is_resolved = true;
        self.resolved_message = Some(message.to_string());
        self.resolved_by = Some(resolved_by.to_string());
    }

    /// Admin-review JSON shape.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "type": self.kind.as_int(),
            "value": self.value,
            "message": self.message,
            "author": self.author,
            "createdAt": format_timestamp(self.created_at_ms),
            "isResolved": self.is_resolved,
            "resolvedMessage": self.resolved_message,
            "resolvedBy": self.resolved_by,
        })
    }
}

/// Canonical geolocated directory record.
///
/// Owns its embedded contributions, reports, votes, option values and
/// pending shadow; duplicate-cluster links are id back-references
/// resolved through the store, never live graph edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    /// Stable identifier. Empty string until first persisted.
    pub id: ElementId,
    /// Publication status. Mutated only by the moderation actions.
    pub status: ElementStatus,
    /// Review flag, orthogonal to `status`.
    pub moderation_state: ModerationState,
    /// Display name.
    pub name: String,
    /// Resolved geolocation; materialization is a no-op without it.
    pub coordinates: Option<Coordinates>,
    /// Postal address.
    pub address: Address,
    /// Free-text description.
    pub description: Option<String>,
    /// Contact telephone.
    pub telephone: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// Website URL.
    pub website: Option<String>,
    /// Opening hours, opaque pre-structured payload.
    pub open_hours: Option<Value>,
    /// Free-text complement to the opening hours.
    pub open_hours_extra: Option<String>,
    /// Taxonomy assignment, unique per option id.
    pub option_values: Vec<OptionValue>,
    /// Public custom form-data fields.
    pub custom_data: Map<String, Value>,
    /// Private custom form-data fields.
    pub custom_private_data: Map<String, Value>,
    /// Admin stamps.
    pub stamps: Vec<Stamp>,
    /// Image URLs.
    pub images: Vec<String>,
    /// File URLs.
    pub files: Vec<String>,
    /// Append-only audit trail.
    pub contributions: Vec<Contribution>,
    /// Problem reports.
    pub reports: Vec<UserInteraction>,
    /// Votes on the active pending change.
    pub votes: Vec<UserInteraction>,
    /// Pending shadow copy awaiting moderation. Exactly one level of
    /// nesting: a shadow never owns another shadow.
    pub modified_element: Option<Box<ElementRecord>>,
    /// Ids of elements flagged as probable duplicates of this one.
    pub potential_duplicate_ids: Vec<ElementId>,
    /// Ids a human confirmed as NOT duplicates of this one.
    pub non_duplicate_ids: Vec<ElementId>,
    /// True when this record is the representative of its duplicate
    /// cluster.
    pub is_duplicate_node: bool,
    /// Bulk-scan claim: workers skip this record until the timestamp.
    pub lock_until_ms: u64,
    /// Owner account email, when claimed.
    pub user_owner_email: Option<String>,
    /// Email of the last non-registered contributor.
    pub contributor_email: Option<String>,
    /// Creation timestamp, immutable after creation.
    pub created_at_ms: u64,
    /// Bumped on every committed mutation.
    pub updated_at_ms: u64,
    /// Comma-joined resolved category names, refreshed with the views.
    pub options_string: Option<String>,
    /// Materialized map-marker view.
    pub compact_json: Option<String>,
    /// Materialized full public view.
    pub base_json: Option<String>,
    /// Materialized private view.
    pub private_json: Option<String>,
    /// Materialized admin view.
    pub admin_json: Option<String>,
    /// Materialized JSON-LD view.
    pub semantic_json: Option<String>,
    /// Guard ensuring at most one materialization per logical mutation.
    #[serde(default, skip_serializing)]
    pub prevent_json_update: bool,
}

impl ElementRecord {
    /// Creates a record from a draft. The id stays empty until the
    /// store assigns one.
    pub fn from_draft(draft: ElementDraft, now_ms: u64) -> Self {
        Self {
            id: String::new(),
            status: ElementStatus::PendingAdd,
            moderation_state: ModerationState::NotNeeded,
            name: draft.name,
            coordinates: draft.coordinates,
            address: draft.address,
            description: draft.description,
            telephone: draft.telephone,
            email: draft.email,
            website: draft.website,
            open_hours: draft.open_hours,
            open_hours_extra: draft.open_hours_extra,
            option_values: draft.option_values,
            custom_data: draft.custom_data,
            custom_private_data: draft.custom_private_data,
            stamps: Vec::new(),
            images: draft.images,
            files: draft.files,
            contributions: Vec::new(),
            reports: Vec::new(),
            votes: Vec::new(),
            modified_element: None,
            potential_duplicate_ids: Vec::new(),
            non_duplicate_ids: Vec::new(),
            is_duplicate_node: false,
            lock_until_ms: 0,
            user_owner_email: draft.user_owner_email,
            contributor_email: draft.contributor_email,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            options_string: None,
            compact_json: None,
            base_json: None,
            private_json: None,
            admin_json: None,
            semantic_json: None,
            prevent_json_update: false,
        }
    }

    /// True while awaiting moderation (pending add or shadowed edit).
    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    /// True when flagged as a probable duplicate of another element.
    pub fn is_potential_duplicate(&self) -> bool {
        self.moderation_state == ModerationState::PotentialDuplicate
    }

    /// Unresolved reports, oldest first.
    pub fn unresolved_reports(&self) -> impl Iterator<Item = &UserInteraction> {
        self.reports.iter().filter(|r| !r.is_resolved)
    }

    /// Adds a report and flags the record for review.
    pub fn add_report(&mut self, report: UserInteraction) {
        self.reports.push(report);
        self.moderation_state = ModerationState::ReportsSubmitted;
    }

    /// Adds or replaces the option value for its option id, keeping the
    /// set unique per option.
    pub fn add_option_value(&mut self, value: OptionValue) {
        if let Some(existing) = self
            .option_values
            .iter_mut()
            .find(|v| v.option_id == value.option_id)
        {
            *existing = value;
        } else {
            self.option_values.push(value);
        }
    }

    /// Option values sorted by display index.
    pub fn sorted_option_values(&self) -> Vec<&OptionValue> {
        let mut sorted: Vec<&OptionValue> = self.option_values.iter().collect();
        sorted.sort_by_key(|v| (v.index, v.option_id));
        sorted
    }

    /// Most recent contribution, if any.
    pub fn current_contribution(&self) -> Option<&Contribution> {
        self.contributions.last()
    }

    /// Bumps the mutation timestamp, never backwards.
    pub fn touch(&mut self, now_ms: u64) {
        self.updated_at_ms = self.updated_at_ms.max(now_ms);
    }

    /// Recomputes review flags that depend on record content, before
    /// materialization: missing geolocation and missing taxonomy take
    /// precedence, and a stale ReportsSubmitted flag is cleared once
    /// every report is resolved.
    pub fn check_moderation_still_needed(&mut self) {
        match self.moderation_state {
            ModerationState::GeolocError if self.coordinates.is_some() => {
                self.moderation_state = ModerationState::NotNeeded;
            }
            ModerationState::NoOptionProvided if !self.option_values.is_empty() => {
                self.moderation_state = ModerationState::NotNeeded;
            }
            ModerationState::ReportsSubmitted if self.unresolved_reports().next().is_none() => {
                self.moderation_state = ModerationState::NotNeeded;
            }
            _ => {}
        }

        if self.moderation_state == ModerationState::NotNeeded {
            if self.coordinates.is_none() {
                self.moderation_state = ModerationState::GeolocError;
            } else if self.option_values.is_empty() {
                self.moderation_state = ModerationState::NoOptionProvided;
            }
        }
    }

    /// Copies content fields (not lifecycle state) from `other`. Used
    /// when a pending shadow is promoted onto its original.
    pub fn absorb_content(&mut self, other: &ElementRecord) {
        self.name = other.name.clone();
        self.coordinates = other.coordinates;
        self.address = other.address.clone();
        self.description = other.description.clone();
        self.telephone = other.telephone.clone();
        self.email = other.email.clone();
        self.website = other.website.clone();
        self.open_hours = other.open_hours.clone();
        self.open_hours_extra = other.open_hours_extra.clone();
        self.option_values = other.option_values.clone();
        self.custom_data = other.custom_data.clone();
        self.custom_private_data = other.custom_private_data.clone();
        self.images = other.images.clone();
        self.files = other.files.clone();
    }
}

/// Insert payload used to create a new [`ElementRecord`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementDraft {
    /// Display name.
    pub name: String,
    /// Resolved geolocation.
    pub coordinates: Option<Coordinates>,
    /// Postal address.
    pub address: Address,
    /// Free-text description.
    pub description: Option<String>,
    /// Contact telephone.
    pub telephone: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// Website URL.
    pub website: Option<String>,
    /// Opening hours payload.
    pub open_hours: Option<Value>,
    /// Free-text complement to the opening hours.
    pub open_hours_extra: Option<String>,
    /// Taxonomy assignment.
    pub option_values: Vec<OptionValue>,
    /// Public custom fields.
    pub custom_data: Map<String, Value>,
    /// Private custom fields.
    pub custom_private_data: Map<String, Value>,
    /// Image URLs.
    pub images: Vec<String>,
    /// File URLs.
    pub files: Vec<String>,
    /// Owner account email.
    pub user_owner_email: Option<String>,
    /// Contributor email.
    pub contributor_email: Option<String>,
}

/// Sparse edit where each `Some` field overwrites the record value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementPatch {
    /// Optional replacement for the name.
    pub name: Option<String>,
    /// Optional replacement for the coordinates.
    pub coordinates: Option<Coordinates>,
    /// Optional replacement for the address.
    pub address: Option<Address>,
    /// Optional replacement for the description.
    pub description: Option<String>,
    /// Optional replacement for the telephone.
    pub telephone: Option<String>,
    /// Optional replacement for the email.
    pub email: Option<String>,
    /// Optional replacement for the website.
    pub website: Option<String>,
    /// Optional replacement for the opening hours.
    pub open_hours: Option<Value>,
    /// Optional replacement for the opening-hours complement.
    pub open_hours_extra: Option<String>,
    /// Optional replacement for the taxonomy assignment.
    pub option_values: Option<Vec<OptionValue>>,
    /// Optional replacement for the public custom fields.
    pub custom_data: Option<Map<String, Value>>,
    /// Optional replacement for the private custom fields.
    pub custom_private_data: Option<Map<String, Value>>,
    /// Optional replacement for the image URLs.
    pub images: Option<Vec<String>>,
    /// Optional replacement for the file URLs.
    pub files: Option<Vec<String>>,
}

impl ElementPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut ElementRecord) {
        if let Some(v) = &self.name {
            rec.name = v.clone();
        }
        if let Some(v) = self.coordinates {
            rec.coordinates = Some(v);
        }
        if let Some(v) = &self.address {
            rec.address = v.clone();
        }
        if let Some(v) = &self.description {
            rec.description = Some(v.clone());
        }
        if let Some(v) = &self.telephone {
            rec.telephone = Some(v.clone());
        }
        if let Some(v) = &self.email {
            rec.email = Some(v.clone());
        }
        if let Some(v) = &self.website {
            rec.website = Some(v.clone());
        }
        if let Some(v) = &self.open_hours {
            rec.open_hours = Some(v.clone());
        }
        if let Some(v) = &self.open_hours_extra {
            rec.open_hours_extra = Some(v.clone());
        }
        if let Some(v) = &self.option_values {
            rec.option_values = v.clone();
        }
        if let Some(v) = &self.custom_data {
            rec.custom_data = v.clone();
        }
        if let Some(v) = &self.custom_private_data {
            rec.custom_private_data = v.clone();
        }
        if let Some(v) = &self.images {
            rec.images = v.clone();
        }
        if let Some(v) = &self.files {
            rec.files = v.clone();
        }
    }
}

/// Formats an epoch-milliseconds timestamp the way the JSON views
/// expose dates: `dd/mm/yyyy à HH:MM`.
pub fn format_timestamp(ms: u64) -> String {
    use chrono::TimeZone;

    match chrono::Utc.timestamp_millis_opt(ms as i64) {
        chrono::LocalResult::Single(dt) => dt.format("%d/%m/%Y à %H:%M").to_string(),
        _ => String::new(),
    }
}
