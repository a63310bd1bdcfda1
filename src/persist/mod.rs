pub mod sqlite;

use crate::{element::ElementRecord, webhook::WebhookPost};

#[derive(Debug)]
pub enum PersistError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    Message(String),
}

impl From<rusqlite::Error> for PersistError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<crate::core::store::StoreError> for PersistError {
    fn from(value: crate::core::store::StoreError) -> Self {
        Self::Message(format!("store error: {value:?}"))
    }
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Durable sink for dirty elements and webhook posts. The runtime
/// forwards changed rows after each command; implementations upsert
/// them without interpreting the payloads.
pub trait ElementSink: Send {
    fn upsert_elements(&mut self, records: &[ElementRecord]) -> PersistResult<()>;
    fn upsert_posts(&mut self, posts: &[WebhookPost]) -> PersistResult<()>;
    fn save_id_sequences(&mut self, next_id_seq: u64, next_post_id: u64) -> PersistResult<()>;
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}
