//! SQLite-backed element and webhook-post sink.
//!
//! The payload column carries the full serialized record; the scalar
//! columns are query projections so recovery tooling and the SQL claim
//! mirrors can work without decoding payloads.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    core::store::{ElementStore, StoreSnapshotV1},
    element::ElementRecord,
    types::{PostStatus, WebhookPostId},
    webhook::{QueueSnapshotV1, WebhookPost, WebhookQueue},
};

use super::{ElementSink, PersistError, PersistResult};

/// SQLite implementation of [`crate::persist::ElementSink`].
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the in-memory store from the persisted rows, preserving
    /// insertion order.
    pub fn load_store(&self) -> PersistResult<ElementStore> {
        let next_id_seq = self.load_meta_u64("next_id_seq")?.unwrap_or(1);

        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM elements ORDER BY ord ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        let mut records: Vec<ElementRecord> = Vec::new();
        for row in rows {
            records.push(serde_json::from_slice(&row?)?);
        }
        let order = records.iter().map(|rec| rec.id.clone()).collect();
        Ok(ElementStore::from_snapshot(StoreSnapshotV1 {
            next_id_seq,
            order,
            records,
        }))
    }

    /// Rebuilds the webhook queue from the persisted rows.
    pub fn load_queue(&self) -> PersistResult<WebhookQueue> {
        let next_post_id = self.load_meta_u64("next_post_id")?.unwrap_or(1);

        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM webhook_posts ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        let mut posts: Vec<WebhookPost> = Vec::new();
        for row in rows {
            posts.push(serde_json::from_slice(&row?)?);
        }
        Ok(WebhookQueue::from_snapshot(QueueSnapshotV1 {
            next_post_id,
            posts,
        }))
    }

    /// SQL mirror of the in-memory due-post selection, for recovery
    /// tooling running against the database alone.
    pub fn find_pending_delivery_ids(
        &self,
        limit: usize,
        now_ms: u64,
    ) -> PersistResult<Vec<WebhookPostId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM webhook_posts
             WHERE status != ?1 AND lease_until_ms <= ?2
               AND (num_attempts = 0 OR (num_attempts < ?3 AND next_attempt_at_ms <= ?2))
             ORDER BY id ASC LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                post_status_int(PostStatus::Dispatched),
                now_ms as i64,
                crate::webhook::MAX_ATTEMPTS,
                limit as i64
            ],
            |row| row.get::<_, i64>(0),
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row? as WebhookPostId);
        }
        Ok(out)
    }

    /// SQL compare-and-set claim on a duplicate node, matching the
    /// in-memory lease semantics. Returns false when another worker
    /// holds the lock.
    pub fn claim_duplicate_node(
        &mut self,
        id: &str,
        now_ms: u64,
        lease_ms: u64,
    ) -> PersistResult<bool> {
        let changed = self.conn.execute(
            "UPDATE elements SET lock_until_ms = ?1
             WHERE id = ?2 AND is_duplicate_node = 1 AND lock_until_ms <= ?3",
            params![(now_ms + lease_ms) as i64, id, now_ms as i64],
        )?;
        Ok(changed == 1)
    }

    fn load_meta_u64(&self, key: &str) -> PersistResult<Option<u64>> {
        let value: Option<String> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        match value {
            Some(v) => v
                .parse::<u64>()
                .map(Some)
                .map_err(|e| PersistError::Message(format!("bad meta value for {key}: {e}"))),
            None => Ok(None),
        }
    }
}

impl ElementSink for SqliteSink {
    fn upsert_elements(&mut self, records: &[ElementRecord]) -> PersistResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO elements(id, ord, status, moderation_state, name, lat, lng,
                                      user_owner_email, is_duplicate_node, lock_until_ms,
                                      updated_at_ms, payload)
                 VALUES (?1, (SELECT COALESCE(MAX(ord), 0) + 1 FROM elements),
                         ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     moderation_state = excluded.moderation_state,
                     name = excluded.name,
                     lat = excluded.lat,
                     lng = excluded.lng,
                     user_owner_email = excluded.user_owner_email,
                     is_duplicate_node = excluded.is_duplicate_node,
                     lock_until_ms = excluded.lock_until_ms,
                     updated_at_ms = excluded.updated_at_ms,
                     payload = excluded.payload",
            )?;
            for rec in records {
                let payload = serde_json::to_vec(rec)?;
                stmt.execute(params![
                    rec.id,
                    rec.status.as_int(),
                    rec.moderation_state.as_int(),
                    rec.name,
                    rec.coordinates.map(|c| c.lat),
                    rec.coordinates.map(|c| c.lng),
                    rec.user_owner_email,
                    rec.is_duplicate_node as i64,
                    rec.lock_until_ms as i64,
                    rec.updated_at_ms as i64,
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_posts(&mut self, posts: &[WebhookPost]) -> PersistResult<()> {
        if posts.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO webhook_posts(id, webhook_id, status, num_attempts,
                                           next_attempt_at_ms, lease_until_ms,
                                           created_at_ms, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     num_attempts = excluded.num_attempts,
                     next_attempt_at_ms = excluded.next_attempt_at_ms,
                     lease_until_ms = excluded.lease_until_ms,
                     payload = excluded.payload",
            )?;
            for post in posts {
                let payload = serde_json::to_vec(post)?;
                stmt.execute(params![
                    post.id as i64,
                    post.webhook_id as i64,
                    post_status_int(post.status),
                    post.num_attempts,
                    post.next_attempt_at_ms as i64,
                    post.lease_until_ms as i64,
                    post.created_at_ms as i64,
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn save_id_sequences(&mut self, next_id_seq: u64, next_post_id: u64) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO meta(key, value) VALUES ('next_id_seq', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![next_id_seq.to_string()],
        )?;
        tx.execute(
            "INSERT INTO meta(key, value) VALUES ('next_post_id', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![next_post_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn post_status_int(status: PostStatus) -> i64 {
    match status {
        PostStatus::Queued => 0,
        PostStatus::Dispatched => 1,
        PostStatus::Failed => 2,
    }
}
