//! Moderation actions: every status transition on an element goes
//! through here. Each successful operation appends exactly one
//! contribution (unless suppressed), bumps `updated_at`, refreshes the
//! JSON views through the store commit, and queues the outbound
//! webhook for the newest contribution only.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    core::store::{ElementStore, StoreError},
    element::{Contribution, ElementRecord, UserInteraction},
    notify::{MailTemplate, NotificationService},
    types::{ElementId, ElementStatus, InteractionKind, ModerationState, WebhookDispatchStatus},
    view::materializer::ViewMaterializer,
    webhook::{WebhookQueue, WebhookTarget},
};

/// Per-call actor and policy context.
///
/// Contribution suppression is a per-call option, not engine state, so
/// bulk/system operations stay safe under concurrent use.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Acting user identity, recorded on contributions and resolutions.
    pub actor: String,
    /// Skip contribution recording (bulk/system operations). Status
    /// changes, notifications, and timestamps still apply.
    pub suppress_contributions: bool,
    /// Operation timestamp, epoch milliseconds.
    pub now_ms: u64,
}

impl ActionContext {
    /// Context for `actor` at the current wall-clock time.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            suppress_contributions: false,
            now_ms: now_ms(),
        }
    }

    /// Same context with contribution recording suppressed.
    pub fn suppressed(mut self) -> Self {
        self.suppress_contributions = true;
        self
    }

    /// Same context pinned at an explicit timestamp.
    pub fn at(mut self, now_ms: u64) -> Self {
        self.now_ms = now_ms;
        self
    }
}

/// Moderation action failure.
#[derive(Debug)]
pub enum ActionError {
    /// Store-level failure, propagated unmodified.
    Store(StoreError),
}

impl From<StoreError> for ActionError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Outcome of a [`ModerationEngine::resolve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The pending record was promoted or discarded by this call.
    Resolved,
    /// Nothing was pending (double resolution tolerated as a no-op).
    AlreadyResolved,
}

/// The moderation state machine.
pub struct ModerationEngine {
    pub(crate) materializer: ViewMaterializer,
    pub(crate) notifier: Arc<dyn NotificationService>,
    pub(crate) webhooks: Vec<WebhookTarget>,
}

impl ModerationEngine {
    /// Engine over the given collaborators. `webhooks` lists the
    /// targets notified after each recorded contribution.
    pub fn new(
        materializer: ViewMaterializer,
        notifier: Arc<dyn NotificationService>,
        webhooks: Vec<WebhookTarget>,
    ) -> Self {
        Self {
            materializer,
            notifier,
            webhooks,
        }
    }

    /// View materializer used on every commit.
    pub fn materializer(&self) -> &ViewMaterializer {
        &self.materializer
    }

    /// Imports a record, defaulting to `AddedByAdmin`.
    pub fn import(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        mut rec: ElementRecord,
        status: Option<ElementStatus>,
        notify: bool,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<ElementId, ActionError> {
        let status = status.unwrap_or(ElementStatus::AddedByAdmin);
        let added = self.add_contribution(&mut rec, message, InteractionKind::Import, status, ctx);
        rec.status = status;
        if notify {
            self.notify(MailTemplate::Add, &rec, message, None);
        }
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(id)
    }

    /// Creates a record directly as `AddedByAdmin`.
    pub fn add(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        mut rec: ElementRecord,
        notify: bool,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<ElementId, ActionError> {
        let added = self.add_contribution(
            &mut rec,
            message,
            InteractionKind::Add,
            ElementStatus::AddedByAdmin,
            ctx,
        );
        rec.status = ElementStatus::AddedByAdmin;
        if notify {
            self.notify(MailTemplate::Add, &rec, message, None);
        }
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(id)
    }

    /// Edits a record. When `id` names a pending shadow, the shadow is
    /// first promoted onto its original (resolution as accepted) and
    /// the edit continues on the original.
    ///
    /// Resulting status: `ModifiedByOwner` when `by_owner`, else
    /// `ModifiedFromHash` when `via_hash`, else `ModifiedByAdmin`.
    /// Unless edited by the owner, open reports are resolved too.
    #[allow(clippy::too_many_arguments)]
    pub fn edit(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        patch: Option<&crate::element::ElementPatch>,
        notify: bool,
        by_owner: bool,
        via_hash: bool,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<ElementId, ActionError> {
        let (target_id, promoted) = if store.contains(id) {
            (id.to_string(), false)
        } else if let Some(original) = store.find_original_of_shadow(id) {
            let original_id = original.id.clone();
            self.resolve(
                store,
                queue,
                &original_id,
                true,
                crate::types::ValidationType::Admin,
                message,
                ctx,
            )?;
            (original_id, true)
        } else {
            return Err(StoreError::MissingElement(id.to_string()).into());
        };

        let mut rec = store
            .get_cloned(&target_id)
            .ok_or_else(|| StoreError::MissingElement(target_id.clone()))?;

        if let Some(patch) = patch {
            patch.apply_to(&mut rec);
        }

        let status = if by_owner {
            ElementStatus::ModifiedByOwner
        } else if via_hash {
            ElementStatus::ModifiedFromHash
        } else {
            ElementStatus::ModifiedByAdmin
        };
        let added = self.add_contribution(&mut rec, message, InteractionKind::Edit, status, ctx);
        rec.status = status;

        if !by_owner {
            self.resolve_reports_in_place(store, &mut rec, message, false, ctx)?;
        }
        if notify && !promoted {
            self.notify(MailTemplate::Edit, &rec, message, None);
        }
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(id)
    }

    /// Deletes a record. A member of an unresolved duplicate cluster
    /// becomes `Duplicate` rather than `Deleted`, preserving the
    /// "removed because merged" distinction.
    pub fn delete(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        notify: bool,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let mut rec = store
            .get_cloned(id)
            .ok_or_else(|| StoreError::MissingElement(id.to_string()))?;
        if notify {
            self.notify(MailTemplate::Delete, &rec, message, None);
        }
        let added = self.add_contribution(
            &mut rec,
            message,
            InteractionKind::Deleted,
            ElementStatus::Deleted,
            ctx,
        );
        rec.status = if rec.is_potential_duplicate() {
            ElementStatus::Duplicate
        } else {
            ElementStatus::Deleted
        };
        self.resolve_reports_in_place(store, &mut rec, message, false, ctx)?;
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(())
    }

    /// Reverses a delete, back to `AddedByAdmin`.
    pub fn restore(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        notify: bool,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let mut rec = store
            .get_cloned(id)
            .ok_or_else(|| StoreError::MissingElement(id.to_string()))?;
        let added = self.add_contribution(
            &mut rec,
            message,
            InteractionKind::Restored,
            ElementStatus::AddedByAdmin,
            ctx,
        );
        rec.status = ElementStatus::AddedByAdmin;
        self.resolve_reports_in_place(store, &mut rec, message, false, ctx)?;
        if notify {
            self.notify(MailTemplate::Add, &rec, message, None);
        }
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(())
    }

    /// Resolves every open report and clears the review flag. With no
    /// open reports and `add_contribution_if_none`, a single
    /// `ModerationResolved` contribution is recorded instead, and its
    /// webhook posts are queued like any other mutation.
    pub fn resolve_reports(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        message: Option<&str>,
        add_contribution_if_none: bool,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let mut rec = store
            .get_cloned(id)
            .ok_or_else(|| StoreError::MissingElement(id.to_string()))?;
        let added =
            self.resolve_reports_in_place(store, &mut rec, message, add_contribution_if_none, ctx)?;
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(())
    }

    /// Files a problem report against a record.
    pub fn report(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        author: &str,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let mut rec = store
            .get_cloned(id)
            .ok_or_else(|| StoreError::MissingElement(id.to_string()))?;
        rec.add_report(UserInteraction::report(
            author,
            message.map(str::to_string),
            ctx.now_ms,
        ));
        let status = rec.status;
        let added = self.add_contribution(&mut rec, message, InteractionKind::Report, status, ctx);
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(())
    }

    /// Records a vote on the active pending change. Mixed positive and
    /// negative votes flag the record for review.
    #[allow(clippy::too_many_arguments)]
    pub fn vote(
        &self,
        store: &mut ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        author: &str,
        value: i32,
        message: Option<&str>,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let mut rec = store
            .get_cloned(id)
            .ok_or_else(|| StoreError::MissingElement(id.to_string()))?;
        rec.votes.push(UserInteraction::vote(
            author,
            value,
            message.map(str::to_string),
            ctx.now_ms,
        ));
        let has_for = rec.votes.iter().any(|v| v.value > 0);
        let has_against = rec.votes.iter().any(|v| v.value < 0);
        if has_for && has_against {
            rec.moderation_state = ModerationState::VotesConflicts;
        }
        let status = rec.status;
        let added = self.add_contribution(&mut rec, message, InteractionKind::Vote, status, ctx);
        rec.touch(ctx.now_ms);
        let id = store.commit(rec, &self.materializer)?;
        self.enqueue_webhooks(store, queue, &id, added, ctx);
        Ok(())
    }

    /// Resolves open reports in place and clears review flags,
    /// including duplicate-cluster teardown. Leaves `moderation_state`
    /// at `NotNeeded`. Returns whether a contribution was recorded so
    /// the caller can fan out the webhook posts.
    pub(crate) fn resolve_reports_in_place(
        &self,
        store: &mut ElementStore,
        rec: &mut ElementRecord,
        message: Option<&str>,
        add_contribution_if_none: bool,
        ctx: &ActionContext,
    ) -> Result<bool, ActionError> {
        let mut added = false;
        let msg = message.unwrap_or("");
        let open: Vec<usize> = rec
            .reports
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_resolved)
            .map(|(i, _)| i)
            .collect();

        if open.is_empty() {
            if add_contribution_if_none {
                let status = rec.status;
                added = self.add_contribution(
                    rec,
                    message,
                    InteractionKind::ModerationResolved,
                    status,
                    ctx,
                );
            }
        } else {
            for &i in &open {
                rec.reports[i].resolve(msg, &ctx.actor);
            }
            for &i in &open {
                self.notify(MailTemplate::Report, rec, message, Some(&rec.reports[i]));
            }
        }

        if rec.moderation_state == ModerationState::PotentialDuplicate {
            if rec.is_duplicate_node {
                rec.is_duplicate_node = false;
                rec.potential_duplicate_ids.clear();
            } else {
                for owner_id in store.find_potential_duplicate_owners(&rec.id) {
                    match store.get_cloned(&owner_id) {
                        Some(mut owner) => {
                            owner.potential_duplicate_ids.retain(|d| d != &rec.id);
                            store.commit(owner, &self.materializer)?;
                        }
                        None => {
                            tracing::warn!(
                                id = %owner_id,
                                "potential duplicate owner missing, skipping detach"
                            );
                        }
                    }
                }
            }
        }

        rec.touch(ctx.now_ms);
        rec.moderation_state = ModerationState::NotNeeded;
        Ok(added)
    }

    /// Appends a contribution unless suppressed. Any prior
    /// contribution still pending webhook dispatch is cancelled first;
    /// only the newest contribution's webhook ever fires.
    pub(crate) fn add_contribution(
        &self,
        rec: &mut ElementRecord,
        message: Option<&str>,
        kind: InteractionKind,
        status: ElementStatus,
        ctx: &ActionContext,
    ) -> bool {
        if ctx.suppress_contributions {
            return false;
        }
        for contribution in &mut rec.contributions {
            if contribution.webhook_dispatch_status == WebhookDispatchStatus::Pending {
                contribution.webhook_dispatch_status = WebhookDispatchStatus::Cancelled;
            }
        }
        rec.contributions.push(Contribution {
            kind,
            message: message.map(str::to_string),
            author: ctx.actor.clone(),
            status,
            created_at_ms: ctx.now_ms,
            webhook_dispatch_status: WebhookDispatchStatus::Pending,
        });
        true
    }

    /// Queues one webhook post per configured target for the committed
    /// record's newest contribution. The payload carries the
    /// contribution's creation time so a delivery confirmation can find
    /// it even after later mutations.
    pub(crate) fn enqueue_webhooks(
        &self,
        store: &ElementStore,
        queue: &mut WebhookQueue,
        id: &str,
        contribution_added: bool,
        ctx: &ActionContext,
    ) {
        if !contribution_added || self.webhooks.is_empty() {
            return;
        }
        let Some(rec) = store.get(id) else {
            return;
        };
        let Some(contribution) = rec.current_contribution() else {
            return;
        };
        let data: serde_json::Value = rec
            .base_json
            .as_deref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or(serde_json::Value::Null);
        let payload = serde_json::json!({
            "elementId": rec.id,
            "action": contribution.kind.as_int(),
            "status": contribution.status.as_int(),
            "contributedAt": contribution.created_at_ms,
            "data": data,
        })
        .to_string();
        for target in &self.webhooks {
            queue.enqueue(target, payload.clone(), ctx.now_ms);
        }
    }

    /// Fire-and-forget notification; failures are logged, never
    /// propagated.
    pub(crate) fn notify(
        &self,
        template: MailTemplate,
        rec: &ElementRecord,
        message: Option<&str>,
        report: Option<&UserInteraction>,
    ) {
        if let Err(err) = self
            .notifier
            .send_automated_mail(template, rec, message, report)
        {
            tracing::warn!(element_id = %rec.id, error = %err, "notification send failed");
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
