//! Geolocated directory elements with a full moderation lifecycle:
//! pending submissions, shadowed edits, reports and votes, duplicate
//! detection, denormalized JSON views, and webhook notifications, over
//! an authoritative in-memory store with SQLite persistence.
//!
//! # Examples
//!
//! Synchronous usage with [`core::store::ElementStore`]:
//! ```
//! use std::sync::Arc;
//! use placelog::{
//!     core::store::ElementStore,
//!     element::{Coordinates, ElementDraft, ElementRecord, OptionValue},
//!     moderation::actions::{ActionContext, ModerationEngine},
//!     notify::LogNotifier,
//!     view::{
//!         materializer::ViewMaterializer,
//!         taxonomy::{BaseUrlResolver, StaticTaxonomy},
//!     },
//!     webhook::WebhookQueue,
//! };
//!
//! let taxonomy = Arc::new(StaticTaxonomy::new().with_option(1, "Food"));
//! let links = Arc::new(BaseUrlResolver::new("https://example.org"));
//! let engine = ModerationEngine::new(
//!     ViewMaterializer::new(taxonomy, links),
//!     Arc::new(LogNotifier),
//!     Vec::new(),
//! );
//!
//! let mut store = ElementStore::new();
//! let mut queue = WebhookQueue::new();
//! let ctx = ActionContext::new("admin").at(1_000);
//! let draft = ElementDraft {
//!     name: "Corner Shop".to_string(),
//!     coordinates: Some(Coordinates { lat: 48.85, lng: 2.35 }),
//!     option_values: vec![OptionValue { option_id: 1, index: 0, description: None }],
//!     ..ElementDraft::default()
//! };
//! let id = engine
//!     .add(
//!         &mut store,
//!         &mut queue,
//!         ElementRecord::from_draft(draft, 1_000),
//!         false,
//!         None,
//!         &ctx,
//!     )
//!     .expect("add");
//! assert!(store.get(&id).expect("stored").base_json.is_some());
//! ```
//!
//! Runtime usage with a SQLite sink:
//! ```no_run
//! use std::sync::Arc;
//! use placelog::{
//!     core::store::ElementStore,
//!     dedupe::DuplicateDetector,
//!     element::ElementDraft,
//!     moderation::actions::{ActionContext, ModerationEngine},
//!     notify::LogNotifier,
//!     persist::sqlite::SqliteSink,
//!     runtime::handle::{RuntimeConfig, spawn_placelog},
//!     view::{
//!         materializer::ViewMaterializer,
//!         taxonomy::{BaseUrlResolver, StaticTaxonomy},
//!     },
//!     webhook::WebhookQueue,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let taxonomy = Arc::new(StaticTaxonomy::new().with_option(1, "Food"));
//! let links = Arc::new(BaseUrlResolver::new("https://example.org"));
//! let engine = ModerationEngine::new(
//!     ViewMaterializer::new(taxonomy, links),
//!     Arc::new(LogNotifier),
//!     Vec::new(),
//! );
//! let sink = SqliteSink::open("placelog.db").expect("open sqlite");
//! let handle = spawn_placelog(
//!     ElementStore::new(),
//!     WebhookQueue::new(),
//!     engine,
//!     DuplicateDetector::default(),
//!     Some(Box::new(sink)),
//!     RuntimeConfig::default(),
//! );
//! let _id = handle
//!     .create_pending_add(ElementDraft::default(), None, ActionContext::new("visitor"))
//!     .await
//!     .expect("pending add");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Core in-memory store and geo/name scoring helpers.
pub mod core;
/// Duplicate detection policy and bulk-scan claims.
pub mod dedupe;
/// Element domain records, drafts, and patches.
pub mod element;
/// Moderation state machine and pending lifecycle.
pub mod moderation;
/// Notification collaborator contract.
pub mod notify;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
/// JSON view materialization and taxonomy contracts.
pub mod view;
/// Outbound webhook queue with bounded retry.
pub mod webhook;
