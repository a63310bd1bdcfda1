use std::sync::Arc;

use serde_json::Value;

use placelog::{
    element::{Coordinates, ElementDraft, ElementRecord, OptionValue},
    types::{ElementStatus, ModerationState},
    view::{
        materializer::ViewMaterializer,
        taxonomy::{BaseUrlResolver, StaticTaxonomy},
    },
};

fn materializer(taxonomy: StaticTaxonomy) -> ViewMaterializer {
    ViewMaterializer::new(
        Arc::new(taxonomy),
        Arc::new(BaseUrlResolver::new("https://example.org/")),
    )
}

fn record_with_options(options: &[u64]) -> ElementRecord {
    let draft = ElementDraft {
        name: "Corner Shop".to_string(),
        coordinates: Some(Coordinates { lat: 48.85, lng: 2.35 }),
        option_values: options
            .iter()
            .enumerate()
            .map(|(i, &id)| OptionValue {
                option_id: id,
                index: i as u32,
                description: None,
            })
            .collect(),
        ..ElementDraft::default()
    };
    let mut rec = ElementRecord::from_draft(draft, 1_000);
    rec.id = "abc".to_string();
    rec.status = ElementStatus::AddedByAdmin;
    rec
}

fn parse(json: &Option<String>) -> Value {
    serde_json::from_str(json.as_deref().expect("materialized")).expect("valid json")
}

#[test]
fn refresh_is_a_noop_without_coordinates_or_taxonomy() {
    let m = materializer(StaticTaxonomy::new().with_option(42, "Food"));

    let mut rec = record_with_options(&[42]);
    rec.coordinates = None;
    assert!(!m.refresh(&mut rec));
    assert!(rec.base_json.is_none());

    let mut rec = record_with_options(&[]);
    assert!(!m.refresh(&mut rec));
    assert!(rec.base_json.is_none());

    let mut rec = record_with_options(&[42]);
    assert!(m.refresh(&mut rec));
    assert!(rec.base_json.is_some());
}

#[test]
fn refresh_runs_once_per_mutation() {
    let m = materializer(StaticTaxonomy::new().with_option(42, "Food"));
    let mut rec = record_with_options(&[42]);

    assert!(m.refresh(&mut rec));
    assert!(!m.refresh(&mut rec), "guard holds until the next commit clears it");

    rec.prevent_json_update = false;
    assert!(m.refresh(&mut rec));
}

#[test]
fn stale_options_are_pruned_from_the_record() {
    let m = materializer(StaticTaxonomy::new().with_option(42, "Food"));
    let mut rec = record_with_options(&[42, 99]);

    assert!(m.refresh(&mut rec));

    assert_eq!(rec.option_values.len(), 1, "option 99 no longer resolves");
    assert_eq!(rec.option_values[0].option_id, 42);
    assert_eq!(rec.options_string.as_deref(), Some("Food"));

    let base = parse(&rec.base_json);
    assert_eq!(base["categories"], serde_json::json!(["Food"]));
}

#[test]
fn base_view_carries_core_fields_and_shadow() {
    let taxonomy = StaticTaxonomy::new().with_option(42, "Food");
    let m = materializer(taxonomy);

    let mut rec = record_with_options(&[42]);
    rec.description = Some("A fine shop".to_string());
    let mut shadow = record_with_options(&[42]);
    shadow.id = "shadow1".to_string();
    shadow.status = ElementStatus::ModifiedPendingVersion;
    shadow.name = "Proposed Name".to_string();
    rec.modified_element = Some(Box::new(shadow));

    assert!(m.refresh(&mut rec));
    let base = parse(&rec.base_json);
    assert_eq!(base["id"], "abc");
    assert_eq!(base["name"], "Corner Shop");
    assert_eq!(base["geo"]["latitude"], 48.85);
    assert_eq!(base["description"], "A fine shop");
    assert_eq!(base["modifiedElement"]["name"], "Proposed Name");
}

#[test]
fn private_view_holds_status_and_private_properties() {
    let taxonomy = StaticTaxonomy::new()
        .with_option(42, "Food")
        .with_private_property("images");
    let m = materializer(taxonomy);

    let mut rec = record_with_options(&[42]);
    rec.images = vec!["https://example.org/a.jpg".to_string()];
    assert!(m.refresh(&mut rec));

    let base = parse(&rec.base_json);
    assert!(base.get("images").is_none(), "private properties leave the public view");

    let private = parse(&rec.private_json);
    assert_eq!(private["status"], ElementStatus::AddedByAdmin.as_int());
    assert_eq!(private["moderationState"], 0);
    assert_eq!(private["images"][0], "https://example.org/a.jpg");
}

#[test]
fn admin_view_is_empty_for_shadows() {
    let m = materializer(StaticTaxonomy::new().with_option(42, "Food"));
    let mut shadow = record_with_options(&[42]);
    shadow.status = ElementStatus::ModifiedPendingVersion;

    assert!(m.refresh(&mut shadow));
    assert_eq!(shadow.admin_json.as_deref(), Some("{}"));
}

#[test]
fn compact_view_appends_flags_only_when_needed() {
    let m = materializer(StaticTaxonomy::new().with_option(42, "Food").with_compact_field("name"));

    // Published and unflagged: no trailing status fields.
    let mut rec = record_with_options(&[42]);
    assert!(m.refresh(&mut rec));
    let compact = parse(&rec.compact_json);
    let arr = compact.as_array().expect("array");
    assert_eq!(arr.len(), 5);
    assert_eq!(arr[0], "abc");
    assert_eq!(arr[1], serde_json::json!(["Corner Shop"]));
    assert_eq!(arr[2], 48.85);
    assert_eq!(arr[3], 2.35);
    assert_eq!(arr[4], serde_json::json!([42]));

    // Pending: the status integer is appended.
    let mut rec = record_with_options(&[42]);
    rec.status = ElementStatus::PendingAdd;
    assert!(m.refresh(&mut rec));
    let arr = parse(&rec.compact_json);
    let arr = arr.as_array().expect("array");
    assert_eq!(arr.len(), 6);
    assert_eq!(arr[5], ElementStatus::PendingAdd.as_int());

    // Flagged for review: both trailing fields are appended.
    let mut rec = record_with_options(&[42]);
    rec.moderation_state = ModerationState::ReportsSubmitted;
    assert!(m.refresh(&mut rec));
    let arr = parse(&rec.compact_json);
    let arr = arr.as_array().expect("array");
    assert_eq!(arr.len(), 7);
    assert_eq!(arr[5], ElementStatus::AddedByAdmin.as_int());
    assert_eq!(arr[6], ModerationState::ReportsSubmitted.as_int());
}

#[test]
fn semantic_view_maps_only_semantic_fields() {
    let taxonomy = StaticTaxonomy::new()
        .with_option(42, "Food")
        .with_form_field("producer", "text", Some("schema:producer"))
        .with_form_field("internal_note", "text", None);
    let m = materializer(taxonomy);

    let mut rec = record_with_options(&[42]);
    rec.custom_data
        .insert("producer".to_string(), Value::String("Local Farm".to_string()));
    rec.custom_data
        .insert("internal_note".to_string(), Value::String("hidden".to_string()));
    assert!(m.refresh(&mut rec));

    let semantic = parse(&rec.semantic_json);
    assert_eq!(semantic["@id"], "https://example.org/api/elements/abc.jsonld");
    assert_eq!(semantic["schema:producer"], "Local Farm");
    assert!(semantic.get("internal_note").is_none());
    assert!(semantic.get("schema:internal_note").is_none());
}
