//! Derives the five denormalized JSON projections from an element
//! record. Runs once per committed mutation, before the record is
//! considered durable.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::{
    element::{ElementRecord, OptionValue, format_timestamp},
    types::{ElementStatus, ModerationState},
    view::taxonomy::{LinkResolver, TaxonomyProvider},
};

/// Materializes `compactJson`/`baseJson`/`privateJson`/`adminJson`/
/// `semanticJson` on a record.
///
/// Views are built as structured [`Value`] trees and serialized once;
/// no string concatenation.
pub struct ViewMaterializer {
    taxonomy: Arc<dyn TaxonomyProvider>,
    links: Arc<dyn LinkResolver>,
}

impl ViewMaterializer {
    /// Creates a materializer over the given collaborators.
    pub fn new(taxonomy: Arc<dyn TaxonomyProvider>, links: Arc<dyn LinkResolver>) -> Self {
        Self { taxonomy, links }
    }

    /// Refreshes every JSON projection on `rec`. Returns `false`
    /// without touching the record when the views were already
    /// refreshed for this mutation, or when coordinates or taxonomy
    /// are unset (incomplete pre-publication records keep their views
    /// suppressed rather than erroring).
    ///
    /// Side effect: option values whose option id no longer resolves
    /// are removed from the record, not just skipped.
    pub fn refresh(&self, rec: &mut ElementRecord) -> bool {
        if rec.prevent_json_update {
            return false;
        }
        if rec.coordinates.is_none() || rec.option_values.is_empty() {
            return false;
        }
        rec.prevent_json_update = true;

        self.prune_stale_options(rec);
        if let Some(shadow) = rec.modified_element.as_deref_mut() {
            self.prune_stale_options(shadow);
        }

        let resolved = self.resolved_options(rec);
        let names: Vec<&str> = resolved.iter().map(|(_, name)| name.as_str()).collect();
        rec.options_string = Some(names.join(","));

        let base = self.build_base(rec, &resolved);
        rec.base_json = serde_json::to_string(&base).ok();

        let private = self.build_private(rec);
        rec.private_json = serde_json::to_string(&private).ok();

        let admin = self.build_admin(rec);
        rec.admin_json = serde_json::to_string(&admin).ok();

        let compact = self.build_compact(rec, &resolved);
        rec.compact_json = serde_json::to_string(&compact).ok();

        let semantic = self.build_semantic(rec);
        rec.semantic_json = serde_json::to_string(&semantic).ok();

        true
    }

    /// Removes option values whose option no longer exists in the
    /// taxonomy. Self-healing against stale references.
    fn prune_stale_options(&self, rec: &mut ElementRecord) {
        let taxonomy = &self.taxonomy;
        rec.option_values
            .retain(|v| taxonomy.option_name(v.option_id).is_some());
    }

    fn resolved_options(&self, rec: &ElementRecord) -> Vec<(OptionValue, String)> {
        rec.sorted_option_values()
            .into_iter()
            .filter_map(|v| self.taxonomy.option_name(v.option_id).map(|n| (v.clone(), n)))
            .collect()
    }

    fn build_base(&self, rec: &ElementRecord, resolved: &[(OptionValue, String)]) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), json!(rec.id));
        obj.insert("name".into(), json!(rec.name));
        if let Some(c) = rec.coordinates {
            obj.insert("geo".into(), json!({ "latitude": c.lat, "longitude": c.lng }));
        }
        if rec.address != Default::default() {
            obj.insert(
                "address".into(),
                json!({
                    "streetAddress": rec.address.street_address,
                    "postalCode": rec.address.postal_code,
                    "addressLocality": rec.address.address_locality,
                }),
            );
        }
        if let Some(v) = &rec.description {
            obj.insert("description".into(), json!(v));
        }
        if let Some(v) = &rec.telephone {
            obj.insert("telephone".into(), json!(v));
        }
        if let Some(v) = &rec.email {
            obj.insert("email".into(), json!(v));
        }
        if let Some(v) = &rec.website {
            obj.insert("website".into(), json!(v));
        }
        if let Some(v) = &rec.open_hours {
            obj.insert("openHours".into(), v.clone());
        }
        if let Some(v) = &rec.open_hours_extra {
            obj.insert("openHoursMoreInfos".into(), json!(v));
        }

        obj.insert("createdAt".into(), json!(format_timestamp(rec.created_at_ms)));
        obj.insert("updatedAt".into(), json!(format_timestamp(rec.updated_at_ms)));

        let categories: Vec<Value> = resolved.iter().map(|(_, name)| json!(name)).collect();
        obj.insert("categories".into(), Value::Array(categories));
        let categories_full: Vec<Value> = resolved
            .iter()
            .map(|(v, name)| {
                json!({
                    "optionId": v.option_id,
                    "index": v.index,
                    "description": v.description,
                    "name": name,
                })
            })
            .collect();
        if !categories_full.is_empty() {
            obj.insert("categoriesFull".into(), Value::Array(categories_full));
        }

        for (key, value) in &rec.custom_data {
            obj.insert(key.clone(), value.clone());
        }

        if !rec.stamps.is_empty() {
            obj.insert(
                "stamps".into(),
                Value::Array(
                    rec.stamps
                        .iter()
                        .map(|s| json!({ "id": s.id, "name": s.name }))
                        .collect(),
                ),
            );
        }

        let private_props = self.taxonomy.private_properties();
        if !rec.images.is_empty() && !private_props.iter().any(|p| p == "images") {
            obj.insert("images".into(), json!(rec.images));
        }
        if !rec.files.is_empty() && !private_props.iter().any(|p| p == "files") {
            obj.insert("files".into(), json!(rec.files));
        }

        if let Some(shadow) = rec.modified_element.as_deref() {
            let shadow_resolved = self.resolved_options(shadow);
            obj.insert(
                "modifiedElement".into(),
                self.build_base(shadow, &shadow_resolved),
            );
        }

        Value::Object(obj)
    }

    fn build_private(&self, rec: &ElementRecord) -> Value {
        let mut obj = Map::new();
        obj.insert("status".into(), json!(rec.status.as_int()));
        obj.insert("moderationState".into(), json!(rec.moderation_state.as_int()));
        for (key, value) in &rec.custom_private_data {
            obj.insert(key.clone(), value.clone());
        }
        let private_props = self.taxonomy.private_properties();
        if !rec.images.is_empty() && private_props.iter().any(|p| p == "images") {
            obj.insert("images".into(), json!(rec.images));
        }
        if !rec.files.is_empty() && private_props.iter().any(|p| p == "files") {
            obj.insert("files".into(), json!(rec.files));
        }
        Value::Object(obj)
    }

    /// Shadows are shown through their parent's view; their own admin
    /// view stays empty.
    fn build_admin(&self, rec: &ElementRecord) -> Value {
        let mut obj = Map::new();
        if rec.status == ElementStatus::ModifiedPendingVersion {
            return Value::Object(obj);
        }

        let reports: Vec<Value> = rec.unresolved_reports().map(|r| r.to_json()).collect();
        if !reports.is_empty() {
            obj.insert("reports".into(), Value::Array(reports));
        }

        let mut history: Vec<Value> = rec.contributions.iter().map(|c| c.to_json()).collect();
        history.extend(
            rec.reports
                .iter()
                .filter(|r| r.is_resolved)
                .map(|r| r.to_json()),
        );
        if !history.is_empty() {
            obj.insert("contributions".into(), Value::Array(history));
        }

        if rec.is_pending() {
            let votes: Vec<Value> = rec.votes.iter().map(|v| v.to_json()).collect();
            if !votes.is_empty() {
                obj.insert("votes".into(), Value::Array(votes));
            }
            if let Some(curr) = rec.current_contribution() {
                obj.insert("pendingContribution".into(), curr.to_json());
            }
        }
        Value::Object(obj)
    }

    /// `[id, configuredFields, lat, lng, [optionIds], status?,
    /// moderationState?]` where the trailing fields appear only when
    /// non-default, to keep the per-marker payload small.
    fn build_compact(&self, rec: &ElementRecord, resolved: &[(OptionValue, String)]) -> Value {
        let mut arr = vec![json!(rec.id)];

        let fields: Vec<Value> = self
            .taxonomy
            .compact_fields()
            .iter()
            .map(|f| record_property(rec, f))
            .collect();
        arr.push(Value::Array(fields));

        let coords = rec.coordinates.unwrap_or(crate::element::Coordinates { lat: 0.0, lng: 0.0 });
        arr.push(json!(coords.lat));
        arr.push(json!(coords.lng));
        arr.push(Value::Array(
            resolved.iter().map(|(v, _)| json!(v.option_id)).collect(),
        ));

        let flagged = rec.moderation_state != ModerationState::NotNeeded;
        if rec.status.as_int() <= 0 || flagged {
            arr.push(json!(rec.status.as_int()));
        }
        if flagged {
            arr.push(json!(rec.moderation_state.as_int()));
        }
        Value::Array(arr)
    }

    /// JSON-LD-ish view: only fields explicitly mapped to a semantic
    /// vocabulary term, plus the canonical self-link.
    fn build_semantic(&self, rec: &ElementRecord) -> Value {
        let mut obj = Map::new();
        obj.insert("@id".into(), json!(self.links.element_uri(&rec.id)));
        for field in self.taxonomy.form_fields() {
            let Some(semantic) = &field.semantic else {
                continue;
            };
            if let Some(value) = rec.custom_data.get(&field.name) {
                if !value.is_null() {
                    obj.insert(semantic.clone(), value.clone());
                }
            }
        }
        Value::Object(obj)
    }
}

/// Looks up a configured compact/marker field on the record: known
/// scalar fields first, then the custom data map.
fn record_property(rec: &ElementRecord, name: &str) -> Value {
    match name {
        "name" => json!(rec.name),
        "description" => json!(rec.description),
        "telephone" => json!(rec.telephone),
        "email" => json!(rec.email),
        "website" => json!(rec.website),
        "addressLocality" => json!(rec.address.address_locality),
        _ => rec.custom_data.get(name).cloned().unwrap_or(Value::Null),
    }
}
