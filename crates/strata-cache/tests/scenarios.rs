//! End-to-end scenarios for the cache layer over in-process adapters.
//!
//! These run in every `cargo test` invocation; the live-service variants
//! live in `integration.rs`.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use serde_json::{Value, json};
use strata_cache::{CacheError, CacheLayer, MemoryCache, MemoryStore, VolatileCache, keys};
use strata_types::{Entity, EntityRef, EntityType, OrderedRecord, WriteOutcome};

/// Layer over fresh in-memory adapters, with the store handle kept for seeding.
fn layer() -> (Arc<MemoryCache>, Arc<MemoryStore>, CacheLayer) {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryStore::new());
    let layer = CacheLayer::new(cache.clone(), store.clone());
    (cache, store, layer)
}

async fn seed_user(store: &MemoryStore) {
    store
        .insert("C1", Entity::new("U1", EntityType::USER).with_be_id("B1"))
        .await
        .unwrap();
}

// =============================================================================
// Ordered values
// =============================================================================

#[tokio::test]
async fn last_entry_lifecycle() {
    let (_, store, layer) = layer();
    seed_user(&store).await;
    let ordered = layer.ordered();

    let be_id = layer
        .entities()
        .be_id_of("C1", "U1", EntityType::USER)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(be_id, "B1");

    assert!(
        ordered
            .get_last_entry::<Value>("C1", &be_id)
            .await
            .unwrap()
            .is_none()
    );

    let first = ordered
        .set_last_entry("C1", &be_id, 100, json!({ "v": 1 }))
        .await
        .unwrap();
    assert_eq!(first, WriteOutcome::First);

    let stale = ordered
        .set_last_entry("C1", &be_id, 50, json!({ "v": 2 }))
        .await
        .unwrap();
    assert!(stale.is_rejected());
    assert_eq!(
        ordered.get_last_entry::<Value>("C1", &be_id).await.unwrap(),
        Some(OrderedRecord::new(100, json!({ "v": 1 })))
    );

    let newer = ordered
        .set_last_entry("C1", &be_id, 200, json!({ "v": 3 }))
        .await
        .unwrap();
    assert_eq!(newer.previous(), Some(&OrderedRecord::new(100, json!({ "v": 1 }))));
    assert_eq!(
        ordered.get_last_entry::<Value>("C1", &be_id).await.unwrap(),
        Some(OrderedRecord::new(200, json!({ "v": 3 })))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_keep_the_newest_timestamp() {
    let (_, _, layer) = layer();
    let timestamps = [17_i64, 3, 99, 42, 99, 1, 64, 8, 77, 5];

    let handles: Vec<_> = timestamps
        .iter()
        .map(|&t| {
            let ordered = layer.ordered().clone();
            tokio::spawn(async move {
                ordered
                    .set_previous_entry("C1", "B1", t, json!({ "t": t }))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = layer
        .ordered()
        .get_previous_entry::<Value>("C1", "B1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.t, 99);
}

#[tokio::test]
async fn keep_alive_is_monotonic() {
    let (_, _, layer) = layer();
    let ordered = layer.ordered();
    ordered.set_keep_alive("C1", "G1", "hb", 1_000).await.unwrap();
    assert!(
        ordered
            .set_keep_alive("C1", "G1", "hb", 900)
            .await
            .unwrap()
            .is_rejected()
    );
    assert_eq!(
        ordered.get_keep_alive("C1", "G1", "hb").await.unwrap(),
        Some(1_000)
    );
}

// =============================================================================
// Entities
// =============================================================================

#[tokio::test]
async fn both_lookup_paths_agree_on_identity() {
    let (cache, store, layer) = layer();
    seed_user(&store).await;
    let entities = layer.entities();

    let by_be_id = entities.get_by_be_id("B1").await.unwrap().unwrap();
    let by_key = entities.get("C1", "U1", EntityType::USER).await.unwrap().unwrap();
    assert_eq!(by_key, by_be_id);
    assert_eq!(
        cache.get(&keys::be_id("B1")).await.unwrap(),
        cache.get(&keys::entity("C1", "U1", EntityType::USER)).await.unwrap()
    );

    assert!(entities.remove_by_be_id("B1").await.unwrap());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn deleting_a_never_cached_entity_removes_nothing() {
    let (_, _, layer) = layer();
    assert_eq!(
        layer
            .entities()
            .delete("C1", "NEVER", EntityType::DEVICE)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn invalidated_entity_is_reloaded_from_durable() {
    let (_, store, layer) = layer();
    seed_user(&store).await;
    let entities = layer.entities();
    entities.get("C1", "U1", EntityType::USER).await.unwrap();

    store
        .insert(
            "C1",
            Entity::new("U1", EntityType::USER)
                .with_be_id("B1")
                .with_field("NAME", json!("renamed")),
        )
        .await
        .unwrap();
    entities.mark_stale("C1", "U1", EntityType::USER).await.unwrap();

    let reloaded = entities.get("C1", "U1", EntityType::USER).await.unwrap().unwrap();
    assert_eq!(reloaded.field("NAME"), Some(&json!("renamed")));
}

#[tokio::test]
async fn unready_cache_serves_entities_from_durable() {
    let (cache, store, layer) = layer();
    seed_user(&store).await;
    cache.set_ready(false);

    assert!(
        layer
            .entities()
            .get("C1", "U1", EntityType::USER)
            .await
            .unwrap()
            .is_some()
    );
    assert!(matches!(
        layer.ordered().get_last_entry::<Value>("C1", "B1").await,
        Err(CacheError::Unavailable { .. })
    ));
}

// =============================================================================
// Relations, locks, refresh
// =============================================================================

#[tokio::test]
async fn missing_relationship_is_an_empty_list() {
    let (_, _, layer) = layer();
    let relations = layer.relations();
    assert!(relations.agents_by_be_id("C1", "B404").await.unwrap().is_empty());
    assert!(
        relations
            .immediate_related_by_be_id("C1", "B404")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn related_entities_through_the_layer() {
    let (_, store, layer) = layer();
    seed_user(&store).await;
    for entity in [
        Entity::new("D1", EntityType::DEVICE).with_be_id("BD1"),
        Entity::relationship("PARENT.B1", &[EntityRef::new("D1", EntityType::DEVICE)]),
    ] {
        store.insert("C1", entity).await.unwrap();
    }
    let related = layer
        .relations()
        .immediate_related("C1", "U1", EntityType::USER)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(related, vec![EntityRef::new("D1", EntityType::DEVICE)]);
}

#[tokio::test]
async fn design_lock_release_semantics() {
    let (_, _, layer) = layer();
    let locks = layer.locks();
    locks.acquire("C1", "SD1", "U1").await.unwrap();
    locks.acquire("C1", "SD2", "U2").await.unwrap();

    assert!(matches!(
        locks.release("C1", "SD1", "U2").await,
        Err(CacheError::LockOwnerMismatch { .. })
    ));
    assert!(locks.get("C1", "SD1").await.unwrap().unwrap().is_held_by("U1"));

    locks.release("C1", "SD1", "U1").await.unwrap();
    assert!(locks.get("C1", "SD1").await.unwrap().is_none());
    assert!(locks.get("C1", "SD2").await.unwrap().is_some());
}

#[tokio::test]
async fn refresh_of_empty_customer_leaves_no_entities() {
    let (_, _, layer) = layer();
    let report = layer.refresher().refresh("C1").await.unwrap();
    assert_eq!(report.records, 0);
    assert_eq!(layer.catalog().entity_count("C1").await.unwrap(), 0);
}

#[tokio::test]
async fn refresh_populates_both_keys() {
    let (cache, store, layer) = layer();
    seed_user(&store).await;
    layer.refresher().refresh("C1").await.unwrap();

    assert!(cache.get(&keys::be_id("B1")).await.unwrap().is_some());
    assert!(
        cache
            .get(&keys::entity("C1", "U1", EntityType::USER))
            .await
            .unwrap()
            .is_some()
    );
    assert_eq!(layer.catalog().entity_count("C1").await.unwrap(), 1);
}
