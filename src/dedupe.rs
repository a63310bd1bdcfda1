//! Duplicate detection: geo-radius candidate search with tiered
//! distance thresholds and name-similarity ranking.

use crate::{
    core::store::{ElementStore, StoreError},
    element::ElementRecord,
    types::{ElementId, ElementStatus, ModerationState},
    view::materializer::ViewMaterializer,
};

/// Tunable detection policy. The dense-area allowlist is configuration
/// data, not logic; the default table covers the French metros where
/// proximity alone produces too many false positives.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Radius when checking a not-yet-persisted submission (km).
    pub new_element_radius_km: f64,
    /// Baseline radius for bulk re-scans of persisted records (km).
    pub bulk_radius_km: f64,
    /// Narrowed bulk radius inside dense urban areas (km).
    pub dense_radius_km: f64,
    /// Department codes counted as dense urban areas.
    pub dense_department_codes: Vec<String>,
    /// City names (lowercase) counted as dense urban areas.
    pub dense_cities: Vec<String>,
    /// Maximum candidates returned per detection.
    pub max_results: usize,
    /// Bulk-scan claim duration on a duplicate node (ms).
    pub node_lease_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            new_element_radius_km: 1.0,
            bulk_radius_km: 0.4,
            dense_radius_km: 0.1,
            dense_department_codes: ["75", "92", "93", "94"].map(String::from).to_vec(),
            dense_cities: [
                "marseille",
                "lyon",
                "bordeaux",
                "lille",
                "montpellier",
                "strasbourg",
                "nantes",
                "nice",
            ]
            .map(String::from)
            .to_vec(),
            max_results: 6,
            node_lease_ms: 5 * 60_000,
        }
    }
}

/// Finds probable duplicates of a record among the stored elements.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    config: DetectorConfig,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl DuplicateDetector {
    /// Detector with the given policy table.
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Candidate duplicates of `record`, most relevant first, at most
    /// `max_results`. Deterministic: identical data yields the same
    /// ordered id sequence.
    ///
    /// Two modes: a record without a stored id is a fresh submission
    /// and gets the wide radius (deleted neighbours included — the
    /// submitter can just answer "no, this is new"); a stored record is
    /// a bulk re-scan and gets the narrow radius plus scope filters so
    /// the scan cannot drown moderators in candidates.
    pub fn find_duplicates_for(
        &self,
        store: &ElementStore,
        record: &ElementRecord,
    ) -> Vec<ElementId> {
        let Some(center) = record.coordinates else {
            return Vec::new();
        };
        let bulk_scan = !record.id.is_empty() && store.contains(&record.id);

        let radius_km = if bulk_scan {
            if self.is_dense_area(record) {
                self.config.dense_radius_km
            } else {
                self.config.bulk_radius_km
            }
        } else {
            self.config.new_element_radius_km
        };

        let mut candidates: Vec<&ElementRecord> = store
            .within_radius(center, radius_km)
            .into_iter()
            .filter(|c| c.id != record.id)
            .collect();

        if bulk_scan {
            candidates.retain(|c| {
                c.status.as_int() > ElementStatus::PendingModification.as_int()
                    && c.moderation_state != ModerationState::PotentialDuplicate
                    && !record.non_duplicate_ids.contains(&c.id)
            });
        }

        let mut scored: Vec<(&ElementRecord, u32)> = candidates
            .into_iter()
            .filter_map(|c| {
                let score = crate::core::geo::name_score(&record.name, &c.name);
                (score > 0).then_some((c, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.id.cmp(&b.0.id)));
        scored.truncate(self.config.max_results);
        scored.into_iter().map(|(c, _)| c.id.clone()).collect()
    }

    /// Flags a duplicate cluster found by the bulk scan: `node_id`
    /// becomes the representative holding the back-references, and
    /// every member is marked for review.
    pub fn flag_cluster(
        &self,
        store: &mut ElementStore,
        materializer: &ViewMaterializer,
        node_id: &str,
        duplicate_ids: &[ElementId],
    ) -> Result<(), StoreError> {
        let mut node = store
            .get_cloned(node_id)
            .ok_or_else(|| StoreError::MissingElement(node_id.to_string()))?;
        node.is_duplicate_node = true;
        node.moderation_state = ModerationState::PotentialDuplicate;
        for dup_id in duplicate_ids {
            if !node.potential_duplicate_ids.contains(dup_id) {
                node.potential_duplicate_ids.push(dup_id.clone());
            }
        }
        store.commit(node, materializer)?;

        for dup_id in duplicate_ids {
            let Some(mut member) = store.get_cloned(dup_id) else {
                tracing::warn!(id = %dup_id, "duplicate cluster member vanished, skipping");
                continue;
            };
            member.moderation_state = ModerationState::PotentialDuplicate;
            store.commit(member, materializer)?;
        }
        Ok(())
    }

    /// Claims up to `limit` unclaimed duplicate nodes for one bulk
    /// worker. Claimed nodes stay invisible to other workers until the
    /// lease expires.
    pub fn claim_duplicate_nodes(
        &self,
        store: &mut ElementStore,
        limit: usize,
        now_ms: u64,
    ) -> Vec<ElementId> {
        let ids: Vec<ElementId> = store
            .find_duplicate_nodes(Some(limit), now_ms)
            .into_iter()
            .map(|rec| rec.id.clone())
            .collect();

        let mut claimed = Vec::new();
        for id in ids {
            match store.claim_duplicate_node(&id, now_ms, self.config.node_lease_ms) {
                Ok(()) => claimed.push(id),
                Err(StoreError::ClaimConflict(_)) => continue,
                Err(err) => {
                    tracing::warn!(id = %id, ?err, "duplicate node claim failed");
                }
            }
        }
        claimed
    }

    fn is_dense_area(&self, record: &ElementRecord) -> bool {
        if let Some(code) = record.address.department_code() {
            if self.config.dense_department_codes.iter().any(|c| c == code) {
                return true;
            }
        }
        record
            .address
            .address_locality
            .as_deref()
            .map(str::to_lowercase)
            .is_some_and(|city| self.config.dense_cities.iter().any(|c| *c == city))
    }
}
