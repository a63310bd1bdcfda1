use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    core::geo,
    element::{Coordinates, ElementRecord},
    types::{ElementId, ElementStatus, ModerationState},
    view::materializer::ViewMaterializer,
};

/// Store-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record under this id.
    MissingElement(ElementId),
    /// A record under this id already exists.
    AlreadyExists(ElementId),
    /// Another worker holds the duplicate-node lease.
    ClaimConflict(ElementId),
}

/// Serializable full-store snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    /// Next value of the id sequence.
    pub next_id_seq: u64,
    /// Insertion order of the record ids.
    pub order: Vec<ElementId>,
    /// Every stored record, in insertion order.
    pub records: Vec<ElementRecord>,
}

/// Authoritative in-memory element store.
///
/// Shadows (status `ModifiedPendingVersion`) are never stored at the
/// top level; they live embedded in their original's `modified_element`
/// slot and are reached through [`ElementStore::find_original_of_shadow`].
#[derive(Debug, Default)]
pub struct ElementStore {
    records: HashMap<ElementId, ElementRecord>,
    order: Vec<ElementId>,
    by_owner: HashMap<String, Vec<ElementId>>,
    dirty: Vec<ElementId>,
    next_id_seq: u64,
}

impl ElementStore {
    pub fn new() -> Self {
        Self {
            next_id_seq: 1,
            ..Self::default()
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Self {
        let mut store = Self {
            next_id_seq: snapshot.next_id_seq,
            order: snapshot.order,
            ..Self::default()
        };
        for rec in snapshot.records {
            store.index_owner(&rec);
            store.records.insert(rec.id.clone(), rec);
        }
        store
    }

    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        let records = self
            .order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect();
        StoreSnapshotV1 {
            next_id_seq: self.next_id_seq,
            order: self.order.clone(),
            records,
        }
    }

    /// Next value of the id sequence, without cloning any state.
    pub fn next_id_seq(&self) -> u64 {
        self.next_id_seq
    }

    /// Allocates a fresh alphanumeric id without storing anything.
    /// Also used for shadow copies, which get an id but no top-level
    /// entry.
    pub fn assign_id(&mut self) -> ElementId {
        let seq = self.next_id_seq;
        self.next_id_seq += 1;
        alnum_id(seq)
    }

    /// Commits a record: recomputes content-derived review flags,
    /// refreshes the JSON views exactly once, and writes the record
    /// back. Assigns an id when the record has none.
    pub fn commit(
        &mut self,
        mut rec: ElementRecord,
        materializer: &ViewMaterializer,
    ) -> Result<ElementId, StoreError> {
        if rec.id.is_empty() {
            rec.id = self.assign_id();
        }
        rec.check_moderation_still_needed();
        materializer.refresh(&mut rec);
        rec.prevent_json_update = false;
        let id = rec.id.clone();

        if let Some(prev) = self.records.get(&id) {
            let prev_owner = prev.user_owner_email.clone();
            if prev_owner != rec.user_owner_email {
                if let Some(owner) = prev_owner {
                    Self::remove_from_vec_index(self.by_owner.entry(owner).or_default(), &id);
                }
                self.index_owner(&rec);
            }
        } else {
            self.order.push(id.clone());
            self.index_owner(&rec);
        }
        self.records.insert(id.clone(), rec);
        self.dirty.push(id.clone());
        Ok(id)
    }

    /// Ids committed since the last drain, for incremental persistence.
    pub fn drain_dirty(&mut self) -> Vec<ElementId> {
        let mut ids = std::mem::take(&mut self.dirty);
        ids.dedup();
        ids
    }

    pub fn get(&self, id: &str) -> Option<&ElementRecord> {
        self.records.get(id)
    }

    pub fn get_cloned(&self, id: &str) -> Option<ElementRecord> {
        self.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ordered_ids(&self) -> &[ElementId] {
        &self.order
    }

    /// Pendings and validated records, excluding those without
    /// geolocation or taxonomy.
    pub fn find_visibles(&self) -> Vec<&ElementRecord> {
        self.scan(|rec| {
            rec.status.is_visible()
                && !matches!(
                    rec.moderation_state,
                    ModerationState::GeolocError | ModerationState::NoOptionProvided
                )
        })
    }

    pub fn find_pendings(&self) -> Vec<&ElementRecord> {
        self.scan(|rec| rec.status.is_pending())
    }

    /// Records needing human review. When `state` is given, only that
    /// review flag.
    pub fn find_moderation_needed(&self, state: Option<ModerationState>) -> Vec<&ElementRecord> {
        self.scan(|rec| {
            rec.status.is_visible()
                && match state {
                    Some(wanted) => rec.moderation_state == wanted,
                    None => rec.moderation_state != ModerationState::NotNeeded,
                }
        })
    }

    /// Records owned by `email`, newest mutation first.
    pub fn find_elements_owned_by(&self, email: &str) -> Vec<&ElementRecord> {
        let mut found: Vec<&ElementRecord> = self
            .by_owner
            .get(email)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.records.get(id))
            .filter(|rec| rec.status != ElementStatus::ModifiedPendingVersion)
            .collect();
        found.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms).then(a.id.cmp(&b.id)));
        found
    }

    /// Records listing `id` among their potential duplicates.
    pub fn find_potential_duplicate_owners(&self, id: &str) -> Vec<ElementId> {
        self.scan(|rec| rec.potential_duplicate_ids.iter().any(|d| d == id))
            .into_iter()
            .map(|rec| rec.id.clone())
            .collect()
    }

    /// The record whose pending shadow carries `shadow_id`.
    pub fn find_original_of_shadow(&self, shadow_id: &str) -> Option<&ElementRecord> {
        self.order.iter().filter_map(|id| self.records.get(id)).find(|rec| {
            rec.modified_element
                .as_deref()
                .is_some_and(|shadow| shadow.id == shadow_id)
        })
    }

    /// Unclaimed duplicate-cluster representatives, up to `limit`.
    pub fn find_duplicate_nodes(&self, limit: Option<usize>, now_ms: u64) -> Vec<&ElementRecord> {
        let mut found = self.scan(|rec| rec.is_duplicate_node && rec.lock_until_ms <= now_ms);
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        found
    }

    /// Claims a duplicate node until `now_ms + lease_ms` so concurrent
    /// batch workers process disjoint sets. Compare-and-set: fails with
    /// [`StoreError::ClaimConflict`] when another worker holds the lock.
    pub fn claim_duplicate_node(
        &mut self,
        id: &str,
        now_ms: u64,
        lease_ms: u64,
    ) -> Result<(), StoreError> {
        let rec = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::MissingElement(id.to_string()))?;
        if rec.lock_until_ms > now_ms {
            return Err(StoreError::ClaimConflict(id.to_string()));
        }
        rec.lock_until_ms = now_ms + lease_ms;
        self.dirty.push(id.to_string());
        Ok(())
    }

    /// Records with coordinates inside the given radius.
    pub fn within_radius(&self, center: Coordinates, radius_km: f64) -> Vec<&ElementRecord> {
        self.scan(|rec| {
            rec.coordinates
                .is_some_and(|c| geo::within_center(center, radius_km, c))
        })
    }

    /// Name-similarity matches ranked best first; deterministic for
    /// identical data (score desc, then id).
    pub fn search_name(&self, query: &str) -> Vec<(&ElementRecord, u32)> {
        let mut scored: Vec<(&ElementRecord, u32)> = self
            .order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter_map(|rec| {
                let score = geo::name_score(query, &rec.name);
                (score > 0).then_some((rec, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.id.cmp(&b.0.id)));
        scored
    }

    fn scan<'a>(&'a self, pred: impl Fn(&ElementRecord) -> bool) -> Vec<&'a ElementRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|rec| pred(rec))
            .collect()
    }

    fn index_owner(&mut self, rec: &ElementRecord) {
        if let Some(owner) = &rec.user_owner_email {
            self.by_owner
                .entry(owner.clone())
                .or_default()
                .push(rec.id.clone());
        }
    }

    fn remove_from_vec_index(v: &mut Vec<ElementId>, id: &str) {
        if let Some(pos) = v.iter().position(|x| x == id) {
            v.remove(pos);
        }
    }
}

fn alnum_id(mut seq: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(ALPHABET[(seq % 36) as usize]);
        seq /= 36;
        if seq == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
