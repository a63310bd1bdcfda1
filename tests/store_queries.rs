use std::sync::Arc;

use placelog::{
    core::store::ElementStore,
    element::{Coordinates, ElementDraft, ElementRecord, OptionValue},
    types::{ElementStatus, ModerationState},
    view::{
        materializer::ViewMaterializer,
        taxonomy::{BaseUrlResolver, StaticTaxonomy},
    },
};

fn materializer() -> ViewMaterializer {
    ViewMaterializer::new(
        Arc::new(StaticTaxonomy::new().with_option(1, "Food")),
        Arc::new(BaseUrlResolver::new("https://example.org")),
    )
}

fn record(name: &str, status: ElementStatus, owner: Option<&str>) -> ElementRecord {
    let mut rec = ElementRecord::from_draft(
        ElementDraft {
            name: name.to_string(),
            coordinates: Some(Coordinates { lat: 48.85, lng: 2.35 }),
            option_values: vec![OptionValue {
                option_id: 1,
                index: 0,
                description: None,
            }],
            user_owner_email: owner.map(str::to_string),
            ..ElementDraft::default()
        },
        100,
    );
    rec.status = status;
    rec
}

#[test]
fn visibles_exclude_refused_and_broken_records() {
    let m = materializer();
    let mut store = ElementStore::new();

    let visible = store
        .commit(record("Open Shop", ElementStatus::AddedByAdmin, None), &m)
        .expect("commit");
    let pending = store
        .commit(record("Pending Shop", ElementStatus::PendingAdd, None), &m)
        .expect("commit");
    store
        .commit(record("Refused Shop", ElementStatus::AdminRefused, None), &m)
        .expect("commit");
    store
        .commit(record("Deleted Shop", ElementStatus::Deleted, None), &m)
        .expect("commit");

    let mut broken = record("No Geo Shop", ElementStatus::AddedByAdmin, None);
    broken.coordinates = None;
    store.commit(broken, &m).expect("commit");

    let ids: Vec<&str> = store.find_visibles().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![visible.as_str(), pending.as_str()]);
}

#[test]
fn moderation_queue_filters_by_state() {
    let m = materializer();
    let mut store = ElementStore::new();

    store
        .commit(record("Clean Shop", ElementStatus::AddedByAdmin, None), &m)
        .expect("commit");
    let mut flagged = record("Reported Shop", ElementStatus::AddedByAdmin, None);
    flagged.add_report(placelog::element::UserInteraction::report("reporter", None, 100));
    let flagged_id = store.commit(flagged, &m).expect("commit");
    let mut broken = record("No Geo Shop", ElementStatus::AddedByAdmin, None);
    broken.coordinates = None;
    let broken_id = store.commit(broken, &m).expect("commit");

    assert_eq!(store.find_moderation_needed(None).len(), 2);
    let reported: Vec<&str> = store
        .find_moderation_needed(Some(ModerationState::ReportsSubmitted))
        .iter()
        .map(|r| r.id.as_str())
        .collect();
    assert_eq!(reported, vec![flagged_id.as_str()]);
    let geoloc: Vec<&str> = store
        .find_moderation_needed(Some(ModerationState::GeolocError))
        .iter()
        .map(|r| r.id.as_str())
        .collect();
    assert_eq!(geoloc, vec![broken_id.as_str()]);
}

#[test]
fn owned_elements_come_back_newest_first() {
    let m = materializer();
    let mut store = ElementStore::new();

    let mut older = record("Older Shop", ElementStatus::AddedByAdmin, Some("a@example.org"));
    older.updated_at_ms = 100;
    let older_id = store.commit(older, &m).expect("commit");
    let mut newer = record("Newer Shop", ElementStatus::AddedByAdmin, Some("a@example.org"));
    newer.updated_at_ms = 200;
    let newer_id = store.commit(newer, &m).expect("commit");
    store
        .commit(record("Other Shop", ElementStatus::AddedByAdmin, Some("b@example.org")), &m)
        .expect("commit");

    let ids: Vec<&str> = store
        .find_elements_owned_by("a@example.org")
        .iter()
        .map(|r| r.id.as_str())
        .collect();
    assert_eq!(ids, vec![newer_id.as_str(), older_id.as_str()]);
    assert!(store.find_elements_owned_by("nobody@example.org").is_empty());
}

#[test]
fn owner_reindexing_follows_ownership_changes() {
    let m = materializer();
    let mut store = ElementStore::new();

    let id = store
        .commit(record("Shop", ElementStatus::AddedByAdmin, Some("a@example.org")), &m)
        .expect("commit");
    let mut rec = store.get_cloned(&id).expect("stored");
    rec.user_owner_email = Some("b@example.org".to_string());
    store.commit(rec, &m).expect("commit");

    assert!(store.find_elements_owned_by("a@example.org").is_empty());
    assert_eq!(store.find_elements_owned_by("b@example.org").len(), 1);
}

#[test]
fn id_sequence_accessor_matches_the_exported_snapshot() {
    let m = materializer();
    let mut store = ElementStore::new();
    assert_eq!(store.next_id_seq(), 1);

    store
        .commit(record("Shop", ElementStatus::AddedByAdmin, None), &m)
        .expect("commit");
    assert_eq!(store.next_id_seq(), 2);
    assert_eq!(store.next_id_seq(), store.export_snapshot().next_id_seq);
}

#[test]
fn name_search_ranks_best_match_first() {
    let m = materializer();
    let mut store = ElementStore::new();

    let exact = store
        .commit(record("Corner Shop", ElementStatus::AddedByAdmin, None), &m)
        .expect("commit");
    let partial = store
        .commit(record("Shop of Wonders", ElementStatus::AddedByAdmin, None), &m)
        .expect("commit");
    store
        .commit(record("Velvet Cinema", ElementStatus::AddedByAdmin, None), &m)
        .expect("commit");

    let results: Vec<&str> = store
        .search_name("corner shop")
        .iter()
        .map(|(r, _)| r.id.as_str())
        .collect();
    assert_eq!(results, vec![exact.as_str(), partial.as_str()]);
}
