//! Pending lifecycle: submissions held as `PendingAdd` records,
//! shadowed edits held inside the original, and the single resolution
//! path that promotes or discards them.

use crate::{
    core::store::{ElementStore, StoreError},
    element::{ElementPatch, ElementRecord},
    moderation::actions::{ActionContext, ActionError, ModerationEngine, ResolveOutcome},
    notify::MailTemplate,
    types::{ElementId, ElementStatus, InteractionKind, ValidationType},
    webhook::WebhookQueue,
};

impl ModerationEngine {
    /// Stores a submission as `PendingAdd`, invisible on the public map
    /// until resolved.
    pub fn create_pending_add(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        mut rec: ElementRecord,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<ElementId, ActionError> {
        let added = self.add_contribution(
            &mut rec,
            message,
            InteractionKind::Add,
            ElementStatus::PendingAdd,
            ctx,
        );
        rec.status = ElementStatus::PendingAdd;
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(id)
    }

    /// Records a non-privileged edit as a pending shadow on the
    /// original. The original keeps serving its published content with
    /// status `PendingModification`; the shadow holds the proposed
    /// content under a fresh id with status `ModifiedPendingVersion`.
    ///
    /// A second pending edit replaces the first shadow wholesale, and
    /// votes on the superseded proposal are discarded.
    pub fn create_pending_edit(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        patch: &ElementPatch,
        submitter_email: Option<&str>,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<ElementId, ActionError> {
        let mut rec = store
            .get_cloned(id)
            .ok_or_else(|| StoreError::MissingElement(id.to_string()))?;

        let mut shadow = rec.clone();
        shadow.id = store.assign_id();
        shadow.status = ElementStatus::ModifiedPendingVersion;
        shadow.moderation_state = Default::default();
        shadow.contributions = Vec::new();
        shadow.reports = Vec::new();
        shadow.votes = Vec::new();
        shadow.modified_element = None;
        shadow.potential_duplicate_ids = Vec::new();
        shadow.non_duplicate_ids = Vec::new();
        shadow.is_duplicate_node = false;
        shadow.lock_until_ms = 0;
        shadow.options_string = None;
        shadow.compact_json = None;
        shadow.base_json = None;
        shadow.private_json = None;
        shadow.admin_json = None;
        shadow.semantic_json = None;
        shadow.contributor_email = submitter_email.map(str::to_string);
        patch.apply_to(&mut shadow);
        shadow.touch(ctx.now_ms);

        let added = self.add_contribution(
            &mut rec,
            message,
            InteractionKind::Edit,
            ElementStatus::PendingModification,
            ctx,
        );
        rec.status = ElementStatus::PendingModification;
        rec.modified_element = Some(Box::new(shadow));
        rec.votes.clear();
        if let Some(email) = submitter_email {
            rec.contributor_email = Some(email.to_string());
        }
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(id)
    }

    /// Resolves a pending record: accepts or refuses a `PendingAdd`, or
    /// promotes or discards the shadow of a `PendingModification`.
    ///
    /// Tolerant by design: a missing record or an already-resolved one
    /// returns [`ResolveOutcome::AlreadyResolved`] so racing moderators
    /// and batch jobs cannot fail each other.
    pub fn resolve(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        accepted: bool,
        validation_type: ValidationType,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<ResolveOutcome, ActionError> {
        let Some(mut rec) = store.get_cloned(id) else {
            tracing::warn!(id = %id, "resolve on a missing element, ignoring");
            return Ok(ResolveOutcome::AlreadyResolved);
        };
        if !rec.is_pending() {
            return Ok(ResolveOutcome::AlreadyResolved);
        }

        let was_modification = rec.status == ElementStatus::PendingModification;
        if was_modification {
            match rec.modified_element.take() {
                Some(shadow) if accepted => rec.absorb_content(&shadow),
                Some(_) => {}
                None => {
                    tracing::warn!(id = %rec.id, "pending modification without a shadow, keeping current content");
                }
            }
        }

        let status = match (accepted, was_modification, validation_type) {
            (true, false, ValidationType::Admin) => ElementStatus::AdminValidate,
            (true, true, ValidationType::Admin) => ElementStatus::ModifiedByAdmin,
            (true, _, ValidationType::Collaborative) => ElementStatus::CollaborativeValidate,
            (false, false, ValidationType::Admin) => ElementStatus::AdminRefused,
            (false, false, ValidationType::Collaborative) => ElementStatus::CollaborativeRefused,
            // A refused edit leaves the original published as validated.
            (false, true, ValidationType::Admin) => ElementStatus::AdminValidate,
            (false, true, ValidationType::Collaborative) => ElementStatus::CollaborativeValidate,
        };

        let added = self.add_contribution(&mut rec, message, InteractionKind::Edit, status, ctx);
        rec.status = status;
        rec.votes.clear();
        self.resolve_reports_in_place(store, &mut rec, message, false, ctx)?;
        if accepted {
            self.notify(MailTemplate::Edit, &rec, message, None);
        }
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(ResolveOutcome::Resolved)
    }
}
