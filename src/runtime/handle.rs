use std::sync::Arc;

use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    core::store::{ElementStore, StoreError},
    dedupe::DuplicateDetector,
    element::{ElementDraft, ElementPatch, ElementRecord},
    moderation::actions::{ActionContext, ActionError, ModerationEngine, ResolveOutcome},
    persist::{ElementSink, PersistError},
    types::{ElementId, ElementStatus, ModerationState, ValidationType, WebhookDispatchStatus,
        WebhookPostId},
    webhook::{QueueError, WebhookPost, WebhookQueue},
};

use super::events::ElementEvent;

/// Failure surfaced through the runtime handle.
#[derive(Debug)]
pub enum RuntimeError {
    /// Moderation action failure.
    Action(ActionError),
    /// Store-level failure.
    Store(StoreError),
    /// Webhook queue failure.
    Queue(QueueError),
    /// Persistence failure, surfaced on flush and shutdown.
    Persist(PersistError),
    /// The runtime loop is gone.
    ChannelClosed,
}

impl From<ActionError> for RuntimeError {
    fn from(value: ActionError) -> Self {
        Self::Action(value)
    }
}

impl From<StoreError> for RuntimeError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<QueueError> for RuntimeError {
    fn from(value: QueueError) -> Self {
        Self::Queue(value)
    }
}

impl From<PersistError> for RuntimeError {
    fn from(value: PersistError) -> Self {
        Self::Persist(value)
    }
}

/// Tuning knobs for the runtime loop and its persistence worker.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Rows buffered before the persistence worker flushes early.
    pub batch_max_records: usize,
    /// Longest a buffered row waits before a flush.
    pub batch_max_latency_ms: u64,
    /// Bound of the channel feeding the persistence worker.
    pub persist_queue_bound: usize,
    /// Lease granted to a webhook dispatch worker per claimed batch.
    pub webhook_lease_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_max_records: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            webhook_lease_ms: 60_000,
        }
    }
}

/// Cloneable async handle to the single-writer loop.
pub struct PlacelogHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<ElementEvent>,
}

impl Clone for PlacelogHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

enum Command {
    Import {
        rec: ElementRecord,
        status: Option<ElementStatus>,
        notify: bool,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<ElementId, RuntimeError>>,
    },
    Add {
        draft: ElementDraft,
        notify: bool,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<ElementId, RuntimeError>>,
    },
    Edit {
        id: ElementId,
        patch: ElementPatch,
        notify: bool,
        by_owner: bool,
        via_hash: bool,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<ElementId, RuntimeError>>,
    },
    CreatePendingAdd {
        draft: ElementDraft,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<ElementId, RuntimeError>>,
    },
    CreatePendingEdit {
        id: ElementId,
        patch: ElementPatch,
        submitter_email: Option<String>,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<ElementId, RuntimeError>>,
    },
    Resolve {
        id: ElementId,
        accepted: bool,
        validation_type: ValidationType,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<ResolveOutcome, RuntimeError>>,
    },
    Delete {
        id: ElementId,
        notify: bool,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Restore {
        id: ElementId,
        notify: bool,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    ResolveReports {
        id: ElementId,
        message: Option<String>,
        add_contribution_if_none: bool,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Report {
        id: ElementId,
        author: String,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Vote {
        id: ElementId,
        author: String,
        value: i32,
        message: Option<String>,
        ctx: ActionContext,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Get {
        id: ElementId,
        resp: oneshot::Sender<Option<ElementRecord>>,
    },
    Pendings {
        resp: oneshot::Sender<Vec<ElementRecord>>,
    },
    ModerationNeeded {
        state: Option<ModerationState>,
        resp: oneshot::Sender<Vec<ElementRecord>>,
    },
    OwnedBy {
        email: String,
        resp: oneshot::Sender<Vec<ElementRecord>>,
    },
    FindDuplicates {
        id: ElementId,
        resp: oneshot::Sender<Result<Vec<ElementId>, RuntimeError>>,
    },
    ClaimWebhookBatch {
        limit: usize,
        now_ms: u64,
        resp: oneshot::Sender<Vec<WebhookPost>>,
    },
    WebhookSucceeded {
        id: WebhookPostId,
        now_ms: u64,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    WebhookFailed {
        id: WebhookPostId,
        now_ms: u64,
        resp: oneshot::Sender<Result<u32, RuntimeError>>,
    },
    Flush {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Batch {
        records: Vec<ElementRecord>,
        posts: Vec<WebhookPost>,
        next_id_seq: u64,
        next_post_id: u64,
    },
    Flush {
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Spawns the single-writer loop owning the store, the webhook queue,
/// the moderation engine, and the detector. All mutation flows through
/// the returned handle; dirty rows stream to the sink off the hot path.
pub fn spawn_placelog(
    store: ElementStore,
    queue: WebhookQueue,
    engine: ModerationEngine,
    detector: DuplicateDetector,
    sink: Option<Box<dyn ElementSink>>,
    config: RuntimeConfig,
) -> PlacelogHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<ElementEvent>(1024);

    let persist_tx = sink.map(|sink| {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        spawn_persistence_worker(sink, persist_rx, config.clone());
        persist_tx
    });

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut store = store;
        let mut queue = queue;

        while let Some(cmd) = cmd_rx.recv().await {
            let done = handle_command(
                cmd,
                &mut store,
                &mut queue,
                &engine,
                &detector,
                &events_tx_loop,
                persist_tx.as_ref(),
                &config,
            )
            .await;
            if done {
                break;
            }
        }
    });

    PlacelogHandle { cmd_tx, events_tx }
}

impl PlacelogHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ElementEvent> {
        self.events_tx.subscribe()
    }

    pub async fn import(
        &self,
        rec: ElementRecord,
        status: Option<ElementStatus>,
        notify: bool,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<ElementId, RuntimeError> {
        self.call(|resp| Command::Import {
            rec,
            status,
            notify,
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn add(
        &self,
        draft: ElementDraft,
        notify: bool,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<ElementId, RuntimeError> {
        self.call(|resp| Command::Add {
            draft,
            notify,
            message,
            ctx,
            resp,
        })
        .await?
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn edit(
        &self,
        id: impl Into<ElementId>,
        patch: ElementPatch,
        notify: bool,
        by_owner: bool,
        via_hash: bool,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<ElementId, RuntimeError> {
        self.call(|resp| Command::Edit {
            id: id.into(),
            patch,
            notify,
            by_owner,
            via_hash,
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn create_pending_add(
        &self,
        draft: ElementDraft,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<ElementId, RuntimeError> {
        self.call(|resp| Command::CreatePendingAdd {
            draft,
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn create_pending_edit(
        &self,
        id: impl Into<ElementId>,
        patch: ElementPatch,
        submitter_email: Option<String>,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<ElementId, RuntimeError> {
        self.call(|resp| Command::CreatePendingEdit {
            id: id.into(),
            patch,
            submitter_email,
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn resolve(
        &self,
        id: impl Into<ElementId>,
        accepted: bool,
        validation_type: ValidationType,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<ResolveOutcome, RuntimeError> {
        self.call(|resp| Command::Resolve {
            id: id.into(),
            accepted,
            validation_type,
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn delete(
        &self,
        id: impl Into<ElementId>,
        notify: bool,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Delete {
            id: id.into(),
            notify,
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn restore(
        &self,
        id: impl Into<ElementId>,
        notify: bool,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Restore {
            id: id.into(),
            notify,
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn resolve_reports(
        &self,
        id: impl Into<ElementId>,
        message: Option<String>,
        add_contribution_if_none: bool,
        ctx: ActionContext,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::ResolveReports {
            id: id.into(),
            message,
            add_contribution_if_none,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn report(
        &self,
        id: impl Into<ElementId>,
        author: impl Into<String>,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Report {
            id: id.into(),
            author: author.into(),
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn vote(
        &self,
        id: impl Into<ElementId>,
        author: impl Into<String>,
        value: i32,
        message: Option<String>,
        ctx: ActionContext,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Vote {
            id: id.into(),
            author: author.into(),
            value,
            message,
            ctx,
            resp,
        })
        .await?
    }

    pub async fn get(&self, id: impl Into<ElementId>) -> Result<Option<ElementRecord>, RuntimeError> {
        self.call(|resp| Command::Get { id: id.into(), resp }).await
    }

    pub async fn pendings(&self) -> Result<Vec<ElementRecord>, RuntimeError> {
        self.call(|resp| Command::Pendings { resp }).await
    }

    pub async fn moderation_needed(
        &self,
        state: Option<ModerationState>,
    ) -> Result<Vec<ElementRecord>, RuntimeError> {
        self.call(|resp| Command::ModerationNeeded { state, resp })
            .await
    }

    pub async fn owned_by(
        &self,
        email: impl Into<String>,
    ) -> Result<Vec<ElementRecord>, RuntimeError> {
        self.call(|resp| Command::OwnedBy {
            email: email.into(),
            resp,
        })
        .await
    }

    pub async fn find_duplicates(
        &self,
        id: impl Into<ElementId>,
    ) -> Result<Vec<ElementId>, RuntimeError> {
        self.call(|resp| Command::FindDuplicates { id: id.into(), resp })
            .await?
    }

    /// Claims up to `limit` due webhook posts for one dispatch worker.
    pub async fn claim_webhook_batch(
        &self,
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<WebhookPost>, RuntimeError> {
        self.call(|resp| Command::ClaimWebhookBatch {
            limit,
            now_ms,
            resp,
        })
        .await
    }

    pub async fn webhook_succeeded(
        &self,
        id: WebhookPostId,
        now_ms: u64,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::WebhookSucceeded { id, now_ms, resp })
            .await?
    }

    pub async fn webhook_failed(&self, id: WebhookPostId, now_ms: u64) -> Result<u32, RuntimeError> {
        self.call(|resp| Command::WebhookFailed { id, now_ms, resp })
            .await?
    }

    pub async fn flush(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Flush { resp }).await?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Shutdown { resp }).await?
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_command(
    cmd: Command,
    store: &mut ElementStore,
    queue: &mut WebhookQueue,
    engine: &ModerationEngine,
    detector: &DuplicateDetector,
    events_tx: &broadcast::Sender<ElementEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
) -> bool {
    match cmd {
        Command::Import {
            rec,
            status,
            notify,
            message,
            ctx,
            resp,
        } => {
            let res = engine
                .import(store, queue, rec, status, notify, message.as_deref(), &ctx)
                .map_err(RuntimeError::from);
            finish_mutation(&res, store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Add {
            draft,
            notify,
            message,
            ctx,
            resp,
        } => {
            let rec = ElementRecord::from_draft(draft, ctx.now_ms);
            let res = engine
                .add(store, queue, rec, notify, message.as_deref(), &ctx)
                .map_err(RuntimeError::from);
            finish_mutation(&res, store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Edit {
            id,
            patch,
            notify,
            by_owner,
            via_hash,
            message,
            ctx,
            resp,
        } => {
            let res = engine
                .edit(
                    store,
                    queue,
                    &id,
                    Some(&patch),
                    notify,
                    by_owner,
                    via_hash,
                    message.as_deref(),
                    &ctx,
                )
                .map_err(RuntimeError::from);
            finish_mutation(&res, store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::CreatePendingAdd {
            draft,
            message,
            ctx,
            resp,
        } => {
            let rec = ElementRecord::from_draft(draft, ctx.now_ms);
            let res = engine
                .create_pending_add(store, queue, rec, message.as_deref(), &ctx)
                .map_err(RuntimeError::from);
            finish_mutation(&res, store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::CreatePendingEdit {
            id,
            patch,
            submitter_email,
            message,
            ctx,
            resp,
        } => {
            let res = engine
                .create_pending_edit(
                    store,
                    queue,
                    &id,
                    &patch,
                    submitter_email.as_deref(),
                    message.as_deref(),
                    &ctx,
                )
                .map_err(RuntimeError::from);
            finish_mutation(&res, store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Resolve {
            id,
            accepted,
            validation_type,
            message,
            ctx,
            resp,
        } => {
            let res = engine
                .resolve(
                    store,
                    queue,
                    &id,
                    accepted,
                    validation_type,
                    message.as_deref(),
                    &ctx,
                )
                .map_err(RuntimeError::from);
            if let Ok(outcome) = &res {
                let _ = events_tx.send(ElementEvent::Resolved {
                    id: id.clone(),
                    outcome: *outcome,
                });
            }
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Delete {
            id,
            notify,
            message,
            ctx,
            resp,
        } => {
            let res = engine
                .delete(store, queue, &id, notify, message.as_deref(), &ctx)
                .map_err(RuntimeError::from);
            if res.is_ok() {
                let _ = events_tx.send(ElementEvent::Committed { id });
            }
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Restore {
            id,
            notify,
            message,
            ctx,
            resp,
        } => {
            let res = engine
                .restore(store, queue, &id, notify, message.as_deref(), &ctx)
                .map_err(RuntimeError::from);
            if res.is_ok() {
                let _ = events_tx.send(ElementEvent::Committed { id });
            }
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::ResolveReports {
            id,
            message,
            add_contribution_if_none,
            ctx,
            resp,
        } => {
            let res = engine
                .resolve_reports(
                    store,
                    queue,
                    &id,
                    message.as_deref(),
                    add_contribution_if_none,
                    &ctx,
                )
                .map_err(RuntimeError::from);
            if res.is_ok() {
                let _ = events_tx.send(ElementEvent::Committed { id });
            }
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Report {
            id,
            author,
            message,
            ctx,
            resp,
        } => {
            let res = engine
                .report(store, queue, &id, &author, message.as_deref(), &ctx)
                .map_err(RuntimeError::from);
            if res.is_ok() {
                let _ = events_tx.send(ElementEvent::Committed { id });
            }
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Vote {
            id,
            author,
            value,
            message,
            ctx,
            resp,
        } => {
            let res = engine
                .vote(store, queue, &id, &author, value, message.as_deref(), &ctx)
                .map_err(RuntimeError::from);
            if res.is_ok() {
                let _ = events_tx.send(ElementEvent::Committed { id });
            }
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Get { id, resp } => {
            let _ = resp.send(store.get_cloned(&id));
        }
        Command::Pendings { resp } => {
            let _ = resp.send(store.find_pendings().into_iter().cloned().collect());
        }
        Command::ModerationNeeded { state, resp } => {
            let _ = resp.send(
                store
                    .find_moderation_needed(state)
                    .into_iter()
                    .cloned()
                    .collect(),
            );
        }
        Command::OwnedBy { email, resp } => {
            let _ = resp.send(
                store
                    .find_elements_owned_by(&email)
                    .into_iter()
                    .cloned()
                    .collect(),
            );
        }
        Command::FindDuplicates { id, resp } => {
            let res = match store.get_cloned(&id) {
                Some(rec) => Ok(detector.find_duplicates_for(store, &rec)),
                None => Err(RuntimeError::Store(StoreError::MissingElement(id))),
            };
            let _ = resp.send(res);
        }
        Command::ClaimWebhookBatch {
            limit,
            now_ms,
            resp,
        } => {
            let ids: Vec<WebhookPostId> = queue
                .find_pending_deliveries(Some(limit), now_ms)
                .into_iter()
                .map(|post| post.id)
                .collect();
            let mut claimed = Vec::new();
            for id in ids {
                if let Ok(post) = queue.claim(id, now_ms, config.webhook_lease_ms) {
                    claimed.push(post);
                }
            }
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(claimed);
        }
        Command::WebhookSucceeded { id, now_ms, resp } => {
            let res = queue
                .record_success(id, now_ms)
                .map_err(RuntimeError::from)
                .map(|()| {
                    if let Some(post) = queue.get(id) {
                        mark_contribution_dispatched(store, engine, &post.payload.clone());
                    }
                });
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::WebhookFailed { id, now_ms, resp } => {
            let res = queue.record_failure(id, now_ms).map_err(RuntimeError::from);
            forward_dirty(store, queue, events_tx, persist_tx);
            let _ = resp.send(res);
        }
        Command::Flush { resp } => {
            forward_dirty(store, queue, events_tx, persist_tx);
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            forward_dirty(store, queue, events_tx, persist_tx);
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

fn finish_mutation(
    res: &Result<ElementId, RuntimeError>,
    store: &mut ElementStore,
    queue: &mut WebhookQueue,
    events_tx: &broadcast::Sender<ElementEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) {
    if let Ok(id) = res {
        let _ = events_tx.send(ElementEvent::Committed { id: id.clone() });
    }
    forward_dirty(store, queue, events_tx, persist_tx);
}

/// Ships everything the last command dirtied to the persistence
/// worker. With no sink the dirty lists still drain, keeping memory
/// bounded.
fn forward_dirty(
    store: &mut ElementStore,
    queue: &mut WebhookQueue,
    events_tx: &broadcast::Sender<ElementEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) {
    let record_ids = store.drain_dirty();
    let post_ids = queue.drain_dirty();
    if record_ids.is_empty() && post_ids.is_empty() {
        return;
    }

    let Some(tx) = persist_tx else {
        let _ = events_tx.send(ElementEvent::Durable);
        return;
    };

    let records: Vec<ElementRecord> = record_ids
        .iter()
        .filter_map(|id| store.get_cloned(id))
        .collect();
    let posts: Vec<WebhookPost> = post_ids
        .iter()
        .filter_map(|id| queue.get(*id).cloned())
        .collect();
    let next_id_seq = store.next_id_seq();
    let next_post_id = queue.next_post_id();

    if let Err(err) = tx.try_send(PersistMsg::Batch {
        records,
        posts,
        next_id_seq,
        next_post_id,
    }) {
        tracing::warn!(?err, "persist queue full, dropping batch until next flush");
    }
}

/// Marks the element contribution behind a delivered post as
/// dispatched. The payload carries the contribution's creation time,
/// so a confirmation arriving after later mutations still lands on the
/// contribution that was actually delivered, not the newest one.
fn mark_contribution_dispatched(
    store: &mut ElementStore,
    engine: &ModerationEngine,
    payload: &str,
) {
    let Ok(payload) = serde_json::from_str::<serde_json::Value>(payload) else {
        return;
    };
    let Some(element_id) = payload
        .get("elementId")
        .and_then(|id| id.as_str().map(String::from))
    else {
        return;
    };
    let contributed_at = payload.get("contributedAt").and_then(|t| t.as_u64());
    let Some(mut rec) = store.get_cloned(&element_id) else {
        return;
    };
    let contribution = match contributed_at {
        Some(ts) => rec
            .contributions
            .iter_mut()
            .rev()
            .find(|c| c.created_at_ms == ts),
        None => rec
            .contributions
            .iter_mut()
            .rev()
            .find(|c| c.webhook_dispatch_status == WebhookDispatchStatus::Pending),
    };
    let Some(contribution) = contribution else {
        return;
    };
    if contribution.webhook_dispatch_status == WebhookDispatchStatus::Dispatched {
        return;
    }
    contribution.webhook_dispatch_status = WebhookDispatchStatus::Dispatched;
    if let Err(err) = store.commit(rec, engine.materializer()) {
        tracing::warn!(id = %element_id, ?err, "dispatch-status commit failed");
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn ElementSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut records = Vec::<ElementRecord>::new();
        let mut posts = Vec::<WebhookPost>::new();
        let mut seqs: Option<(u64, u64)> = None;
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut records, &mut posts, &mut seqs, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Batch { records: recs, posts: ps, next_id_seq, next_post_id } => {
                            records.extend(recs);
                            posts.extend(ps);
                            seqs = Some((next_id_seq, next_post_id));

                            if records.len() + posts.len() >= config.batch_max_records {
                                let _ = flush_buf(&sink, &mut records, &mut posts, &mut seqs, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut records, &mut posts, &mut seqs, true).await;
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut records, &mut posts, &mut seqs, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !records.is_empty() || !posts.is_empty() => {
                    let _ = flush_buf(&sink, &mut records, &mut posts, &mut seqs, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn ElementSink>>>,
    records: &mut Vec<ElementRecord>,
    posts: &mut Vec<WebhookPost>,
    seqs: &mut Option<(u64, u64)>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if records.is_empty() && posts.is_empty() && seqs.is_none() {
        return Ok(());
    }

    let records = std::mem::take(records);
    let posts = std::mem::take(posts);
    let seqs = seqs.take();
    let sink_ref = Arc::clone(sink);

    let result = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        sink.upsert_elements(&records)?;
        sink.upsert_posts(&posts)?;
        if let Some((next_id_seq, next_post_id)) = seqs {
            sink.save_id_sequences(next_id_seq, next_post_id)?;
        }
        if call_flush {
            sink.flush()?;
        }
        Ok::<(), PersistError>(())
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    if let Err(err) = &result {
        tracing::warn!(?err, "persistence flush failed");
    }
    result
}
