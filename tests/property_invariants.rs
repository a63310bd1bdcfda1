use std::sync::Arc;

use proptest::prelude::*;

use placelog::{
    core::store::ElementStore,
    dedupe::DuplicateDetector,
    element::{Coordinates, ElementDraft, ElementRecord, OptionValue},
    moderation::actions::{ActionContext, ModerationEngine},
    notify::LogNotifier,
    types::{ElementStatus, ModerationState},
    view::{
        materializer::ViewMaterializer,
        taxonomy::{BaseUrlResolver, StaticTaxonomy},
    },
    webhook::WebhookQueue,
};

fn engine() -> ModerationEngine {
    ModerationEngine::new(
        ViewMaterializer::new(
            Arc::new(StaticTaxonomy::new().with_option(1, "Food")),
            Arc::new(BaseUrlResolver::new("https://example.org")),
        ),
        Arc::new(LogNotifier),
        Vec::new(),
    )
}

fn record(name: &str, lat: f64, lng: f64) -> ElementRecord {
    ElementRecord::from_draft(
        ElementDraft {
            name: name.to_string(),
            coordinates: Some(Coordinates { lat, lng }),
            option_values: vec![OptionValue {
                option_id: 1,
                index: 0,
                description: None,
            }],
            ..ElementDraft::default()
        },
        100,
    )
}

proptest! {
    #[test]
    fn every_action_records_exactly_one_contribution(ops in proptest::collection::vec(0u8..5, 1..25)) {
        let engine = engine();
        let mut store = ElementStore::new();
        let mut queue = WebhookQueue::new();

        let id = engine
            .add(&mut store, &mut queue, record("Shop", 48.85, 2.35), false, None, &ActionContext::new("seed").at(100))
            .expect("add");

        for (i, op) in ops.iter().enumerate() {
            let now = 200 + i as u64 * 10;
            let ctx = ActionContext::new("actor").at(now);
            let before = store.get(&id).expect("stored").clone();

            match op {
                0 => {
                    engine.edit(&mut store, &mut queue, &id, None, false, false, false, None, &ctx).expect("edit");
                }
                1 => {
                    engine.report(&mut store, &mut queue, &id, "reporter", None, &ctx).expect("report");
                }
                2 => {
                    engine.vote(&mut store, &mut queue, &id, "voter", 1, None, &ctx).expect("vote");
                }
                3 => {
                    engine.delete(&mut store, &mut queue, &id, false, None, &ctx).expect("delete");
                }
                _ => {
                    engine.restore(&mut store, &mut queue, &id, false, None, &ctx).expect("restore");
                }
            }

            let after = store.get(&id).expect("stored");
            prop_assert_eq!(after.contributions.len(), before.contributions.len() + 1);
            prop_assert!(after.updated_at_ms >= before.updated_at_ms);
            prop_assert_eq!(after.updated_at_ms, now);
        }
    }

    #[test]
    fn status_wire_integers_roundtrip(value in -10i32..10) {
        match ElementStatus::from_int(value) {
            Some(status) => prop_assert_eq!(status.as_int(), value),
            None => prop_assert!(!(-6..=6).contains(&value)),
        }
    }

    #[test]
    fn moderation_state_wire_integers_roundtrip(value in -3i32..9) {
        match ModerationState::from_int(value) {
            Some(state) => prop_assert_eq!(state.as_int(), value),
            None => prop_assert!(!(0..=5).contains(&value)),
        }
    }

    #[test]
    fn duplicate_scan_is_deterministic(
        offsets in proptest::collection::vec((-0.005f64..0.005, -0.005f64..0.005), 0..12)
    ) {
        let engine = engine();
        let detector = DuplicateDetector::default();
        let mut store = ElementStore::new();
        let mut queue = WebhookQueue::new();
        let ctx = ActionContext::new("seed").at(100);

        for (dlat, dlng) in &offsets {
            engine
                .add(&mut store, &mut queue, record("Corner Shop", 48.85 + dlat, 2.35 + dlng), false, None, &ctx)
                .expect("add");
        }

        let probe = record("Corner Shop", 48.85, 2.35);
        let first = detector.find_duplicates_for(&store, &probe);
        prop_assert!(first.len() <= 6);
        prop_assert_eq!(detector.find_duplicates_for(&store, &probe), first);
    }
}
