//! Outbound webhook posts and the dispatch queue with bounded
//! retry/backoff.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::{PostStatus, WebhookId, WebhookPostId};

/// Attempt cap: after this many failures a post is never selected
/// again, but stays queued for audit (soft-terminal).
pub const MAX_ATTEMPTS: u32 = 5;

/// Configured webhook target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTarget {
    /// Target identifier.
    pub id: WebhookId,
    /// Delivery URL.
    pub url: String,
}

/// One queued outbound notification job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPost {
    /// Post identifier.
    pub id: WebhookPostId,
    /// Target webhook.
    pub webhook_id: WebhookId,
    /// Delivery URL, denormalized from the target.
    pub url: String,
    /// Serialized notification payload.
    pub payload: String,
    /// Failed attempts so far.
    pub num_attempts: u32,
    /// Earliest retry time after a failure, epoch milliseconds.
    pub next_attempt_at_ms: u64,
    /// Delivery state.
    pub status: PostStatus,
    /// Exclusive claim held by a dispatch worker until this time.
    pub lease_until_ms: u64,
    /// Creation time, epoch milliseconds.
    pub created_at_ms: u64,
}

impl WebhookPost {
    /// True when the post should be offered to a dispatch worker.
    fn is_due(&self, now_ms: u64) -> bool {
        if self.status == PostStatus::Dispatched || self.lease_until_ms > now_ms {
            return false;
        }
        if self.num_attempts == 0 {
            return true;
        }
        self.num_attempts < MAX_ATTEMPTS && now_ms >= self.next_attempt_at_ms
    }
}

/// Queue-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// No post under this id.
    MissingPost(WebhookPostId),
    /// Another dispatch worker holds the lease.
    ClaimConflict(WebhookPostId),
}

/// Serializable full-queue snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshotV1 {
    /// Next value of the post id sequence.
    pub next_post_id: WebhookPostId,
    /// Every queued post, in insertion order.
    pub posts: Vec<WebhookPost>,
}

/// Durable-queue view of pending webhook deliveries.
#[derive(Debug, Default)]
pub struct WebhookQueue {
    posts: HashMap<WebhookPostId, WebhookPost>,
    order: Vec<WebhookPostId>,
    dirty: Vec<WebhookPostId>,
    next_post_id: WebhookPostId,
}

impl WebhookQueue {
    pub fn new() -> Self {
        Self {
            next_post_id: 1,
            ..Self::default()
        }
    }

    pub fn from_snapshot(snapshot: QueueSnapshotV1) -> Self {
        let mut queue = Self {
            next_post_id: snapshot.next_post_id,
            ..Self::default()
        };
        for post in snapshot.posts {
            queue.order.push(post.id);
            queue.posts.insert(post.id, post);
        }
        queue
    }

    pub fn export_snapshot(&self) -> QueueSnapshotV1 {
        QueueSnapshotV1 {
            next_post_id: self.next_post_id,
            posts: self
                .order
                .iter()
                .filter_map(|id| self.posts.get(id).cloned())
                .collect(),
        }
    }

    /// Next value of the post id sequence, without cloning any state.
    pub fn next_post_id(&self) -> WebhookPostId {
        self.next_post_id
    }

    /// Queues one delivery job for `target`.
    pub fn enqueue(&mut self, target: &WebhookTarget, payload: String, now_ms: u64) -> WebhookPostId {
        let id = self.next_post_id;
        self.next_post_id += 1;
        self.posts.insert(
            id,
            WebhookPost {
                id,
                webhook_id: target.id,
                url: target.url.clone(),
                payload,
                num_attempts: 0,
                next_attempt_at_ms: 0,
                status: PostStatus::Queued,
                lease_until_ms: 0,
                created_at_ms: now_ms,
            },
        );
        self.order.push(id);
        self.dirty.push(id);
        id
    }

    pub fn get(&self, id: WebhookPostId) -> Option<&WebhookPost> {
        self.posts.get(&id)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Posts due for a delivery attempt: never attempted, or failed
    /// fewer than [`MAX_ATTEMPTS`] times with the backoff elapsed.
    /// Leased and dispatched posts are excluded.
    pub fn find_pending_deliveries(&self, limit: Option<usize>, now_ms: u64) -> Vec<&WebhookPost> {
        let mut due: Vec<&WebhookPost> = self
            .order
            .iter()
            .filter_map(|id| self.posts.get(id))
            .filter(|post| post.is_due(now_ms))
            .collect();
        if let Some(limit) = limit {
            due.truncate(limit);
        }
        due
    }

    /// Takes an exclusive claim on a post before attempting delivery.
    /// Compare-and-set on the lease so two workers never share a post.
    pub fn claim(
        &mut self,
        id: WebhookPostId,
        now_ms: u64,
        lease_ms: u64,
    ) -> Result<WebhookPost, QueueError> {
        let post = self.posts.get_mut(&id).ok_or(QueueError::MissingPost(id))?;
        if post.lease_until_ms > now_ms {
            return Err(QueueError::ClaimConflict(id));
        }
        post.lease_until_ms = now_ms + lease_ms;
        self.dirty.push(id);
        Ok(post.clone())
    }

    /// Marks a delivery as succeeded (terminal).
    pub fn record_success(&mut self, id: WebhookPostId, _now_ms: u64) -> Result<(), QueueError> {
        let post = self.posts.get_mut(&id).ok_or(QueueError::MissingPost(id))?;
        post.status = PostStatus::Dispatched;
        post.lease_until_ms = 0;
        self.dirty.push(id);
        Ok(())
    }

    /// Records a failed attempt and schedules the retry:
    /// `next_attempt_at = now + 5^attempts minutes`, i.e. 5m, 25m,
    /// ~2h, ~10h, ~2d after attempts 1-5. The fifth failure is the
    /// last; the post stays for audit but is never selected again.
    pub fn record_failure(&mut self, id: WebhookPostId, now_ms: u64) -> Result<u32, QueueError> {
        let post = self.posts.get_mut(&id).ok_or(QueueError::MissingPost(id))?;
        post.num_attempts += 1;
        post.status = PostStatus::Failed;
        post.lease_until_ms = 0;
        post.next_attempt_at_ms = now_ms + backoff_ms(post.num_attempts);
        self.dirty.push(id);
        if post.num_attempts >= MAX_ATTEMPTS {
            tracing::warn!(post_id = id, url = %post.url, "webhook post exhausted its retries");
        }
        Ok(post.num_attempts)
    }

    /// Ids touched since the last drain, for incremental persistence.
    pub fn drain_dirty(&mut self) -> Vec<WebhookPostId> {
        let mut ids = std::mem::take(&mut self.dirty);
        ids.dedup();
        ids
    }
}

/// Exponential backoff after `attempts` failures: `5^attempts` minutes.
fn backoff_ms(attempts: u32) -> u64 {
    5u64.pow(attempts) * 60_000
}
