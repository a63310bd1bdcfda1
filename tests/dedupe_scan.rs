use std::sync::Arc;

use placelog::{
    core::store::ElementStore,
    dedupe::{DetectorConfig, DuplicateDetector},
    element::{Address, Coordinates, ElementDraft, ElementRecord, OptionValue},
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

fn record(name: &str, lat: f64, lng: f64) -> ElementRecord {
    let draft = ElementDraft {
        name: name.to_string(),
        coordinates: Some(Coordinates { lat, lng }),
        option_values: vec![OptionValue {
            option_id: 1,
            index: 0,
            description: None,
        }],
        ..ElementDraft::default()
    };
    let mut rec = ElementRecord::from_draft(draft, 100);
    rec.status = ElementStatus::AddedByAdmin;
    rec
}

fn insert(store: &mut ElementStore, m: &ViewMaterializer, rec: ElementRecord) -> String {
    store.commit(rec, m).expect("commit")
}

// 0.006 degrees of latitude is ~0.66 km under the flat-earth
// approximation used by the scan.
const NEARBY_OFFSET: f64 = 0.006;

#[test]
fn fresh_submission_uses_the_wide_radius() {
    let m = materializer();
    let mut store = ElementStore::new();
    let detector = DuplicateDetector::default();

    let stored_id = insert(&mut store, &m, record("Corner Shop", 48.85 + NEARBY_OFFSET, 2.35));

    // Unsaved submission: 1 km radius, neighbour found.
    let fresh = record("Corner Shop", 48.85, 2.35);
    assert_eq!(detector.find_duplicates_for(&store, &fresh), vec![stored_id.clone()]);

    // The same distance is outside the 0.4 km bulk radius.
    let probe_id = insert(&mut store, &m, record("Corner Shop", 48.85, 2.35));
    let probe = store.get_cloned(&probe_id).expect("stored");
    assert!(detector.find_duplicates_for(&store, &probe).is_empty());
}

#[test]
fn fresh_submission_sees_deleted_neighbours() {
    let m = materializer();
    let mut store = ElementStore::new();
    let detector = DuplicateDetector::default();

    let mut deleted = record("Corner Shop", 48.8501, 2.35);
    deleted.status = ElementStatus::Deleted;
    let deleted_id = insert(&mut store, &m, deleted);

    let fresh = record("Corner Shop", 48.85, 2.35);
    assert_eq!(detector.find_duplicates_for(&store, &fresh), vec![deleted_id]);
}

#[test]
fn bulk_scan_filters_out_of_scope_candidates() {
    let m = materializer();
    let mut store = ElementStore::new();
    let detector = DuplicateDetector::default();

    let probe_id = insert(&mut store, &m, record("Corner Shop", 48.85, 2.35));

    let mut deleted = record("Corner Shop Annex", 48.8501, 2.35);
    deleted.status = ElementStatus::Deleted;
    insert(&mut store, &m, deleted);

    let mut flagged = record("Corner Shop Bis", 48.8502, 2.35);
    flagged.moderation_state = ModerationState::PotentialDuplicate;
    insert(&mut store, &m, flagged);

    let confirmed_distinct_id = insert(&mut store, &m, record("Corner Shop Too", 48.8503, 2.35));
    let in_scope_id = insert(&mut store, &m, record("Corner Shop Twin", 48.8504, 2.35));

    let mut probe = store.get_cloned(&probe_id).expect("stored");
    probe.non_duplicate_ids = vec![confirmed_distinct_id];

    assert_eq!(detector.find_duplicates_for(&store, &probe), vec![in_scope_id]);
}

#[test]
fn dense_areas_use_the_narrow_radius() {
    let m = materializer();
    let mut store = ElementStore::new();
    let detector = DuplicateDetector::default();

    // ~0.22 km away: inside 0.4 km, outside 0.1 km.
    let neighbour_id = insert(&mut store, &m, record("Corner Shop", 48.852, 2.35));

    let probe_id = insert(&mut store, &m, record("Corner Shop", 48.85, 2.35));
    let mut probe = store.get_cloned(&probe_id).expect("stored");
    assert_eq!(detector.find_duplicates_for(&store, &probe), vec![neighbour_id]);

    // A Paris postal code switches the same probe to the dense radius.
    probe.address = Address {
        postal_code: Some("75011".to_string()),
        ..Address::default()
    };
    assert!(detector.find_duplicates_for(&store, &probe).is_empty());

    // A dense city name has the same effect, case-insensitively.
    probe.address = Address {
        address_locality: Some("Marseille".to_string()),
        ..Address::default()
    };
    assert!(detector.find_duplicates_for(&store, &probe).is_empty());
}

#[test]
fn results_are_deterministic_and_capped() {
    let m = materializer();
    let mut store = ElementStore::new();
    let detector = DuplicateDetector::default();

    for i in 0..8 {
        insert(
            &mut store,
            &m,
            record("Corner Shop", 48.85 + 0.0002 * f64::from(i), 2.35),
        );
    }

    let fresh = record("Corner Shop", 48.85, 2.35);
    let first = detector.find_duplicates_for(&store, &fresh);
    assert_eq!(first.len(), 6, "capped at the configured maximum");
    for _ in 0..3 {
        assert_eq!(detector.find_duplicates_for(&store, &fresh), first);
    }
}

#[test]
fn unrelated_names_never_match() {
    let m = materializer();
    let mut store = ElementStore::new();
    let detector = DuplicateDetector::default();

    insert(&mut store, &m, record("Velvet Cinema", 48.8501, 2.35));

    let fresh = record("Corner Shop", 48.85, 2.35);
    assert!(detector.find_duplicates_for(&store, &fresh).is_empty());
}

#[test]
fn claimed_nodes_are_skipped_until_the_lease_expires() {
    let m = materializer();
    let mut store = ElementStore::new();
    let config = DetectorConfig {
        node_lease_ms: 1_000,
        ..DetectorConfig::default()
    };
    let detector = DuplicateDetector::new(config);

    let node_a = insert(&mut store, &m, record("Shop A", 48.85, 2.35));
    let node_b = insert(&mut store, &m, record("Shop B", 48.86, 2.35));
    detector
        .flag_cluster(&mut store, &m, &node_a, &[])
        .expect("flag a");
    detector
        .flag_cluster(&mut store, &m, &node_b, &[])
        .expect("flag b");

    let mut claimed = detector.claim_duplicate_nodes(&mut store, 10, 100);
    claimed.sort();
    let mut expected = vec![node_a, node_b];
    expected.sort();
    assert_eq!(claimed, expected);

    assert!(
        detector.claim_duplicate_nodes(&mut store, 10, 500).is_empty(),
        "leases still held"
    );
    assert_eq!(detector.claim_duplicate_nodes(&mut store, 10, 2_000).len(), 2);
}
