//! Integration tests for bounded relationship-graph traversal.

mod common;

use common::{analyst_ctx, edge, grant, harness, harness_with_limits, object, superuser_ctx};
use intel_service::auth::context::AuthContext;
use intel_service::graph::walker::{GraphWalker, TraversalBounds};
use intel_service::models::TloType;
use intel_service::query::governor::QueryLimits;

fn chain_fixture(harness: &common::TestHarness, b_source: &str) {
    // A --Related To--> B --Related To--> C, with reciprocal back-edges.
    let mut a = object(TloType::Indicator, "a.example.com", &["osint"]);
    a.relationships.push(edge("Related To", TloType::Sample, "B"));

    let mut b = object(TloType::Sample, "dropper.exe", &[b_source]);
    b.relationships.push(edge("Related To", TloType::Indicator, "A"));
    b.relationships.push(edge("Related To", TloType::Domain, "C"));

    let mut c = object(TloType::Domain, "c2.example.net", &["osint"]);
    c.relationships.push(edge("Related To", TloType::Sample, "B"));

    harness.store.insert_object(TloType::Indicator, "A", a);
    harness.store.insert_object(TloType::Sample, "B", b);
    harness.store.insert_object(TloType::Domain, "C", c);
}

fn reader_ctx() -> AuthContext {
    analyst_ctx(&[], vec![grant("osint")])
}

#[tokio::test]
async fn depth_one_returns_direct_neighbors_only() {
    let h = harness();
    chain_fixture(&h, "osint");

    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    let results = walker
        .related_objects(&reader_ctx(), TloType::Indicator, "A", 1, 50)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "B");
    assert_eq!(results[0].tlo_type, "Sample");
    assert_eq!(results[0].display_value, "dropper.exe");
    assert_eq!(results[0].depth, 1);
}

#[tokio::test]
async fn depth_two_walks_the_chain_in_discovery_order() {
    let h = harness();
    chain_fixture(&h, "osint");

    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    let results = walker
        .related_objects(&reader_ctx(), TloType::Indicator, "A", 2, 50)
        .await
        .unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["B", "C"]);
    assert_eq!(results[0].depth, 1);
    assert_eq!(results[1].depth, 2);
}

#[tokio::test]
async fn inaccessible_intermediate_node_hides_everything_behind_it() {
    let h = harness();
    chain_fixture(&h, "restricted");

    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    // The caller can read A and C, but the only path to C runs through B.
    let results = walker
        .related_objects(&reader_ctx(), TloType::Indicator, "A", 3, 50)
        .await
        .unwrap();

    // No result and no error: B's existence is neither confirmed nor denied.
    assert!(results.is_empty());
}

#[tokio::test]
async fn superuser_sees_through_restricted_nodes() {
    let h = harness();
    chain_fixture(&h, "restricted");

    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    let results = walker
        .related_objects(&superuser_ctx(), TloType::Indicator, "A", 2, 50)
        .await
        .unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["B", "C"]);
}

#[tokio::test]
async fn inaccessible_start_node_yields_empty_list_not_error() {
    let h = harness();
    let start = object(TloType::Indicator, "hidden.example.com", &["restricted"]);
    h.store.insert_object(TloType::Indicator, "A", start);

    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    let results = walker
        .related_objects(&reader_ctx(), TloType::Indicator, "A", 2, 50)
        .await
        .unwrap();

    assert!(results.is_empty());
}

#[tokio::test]
async fn reciprocal_edges_terminate() {
    let h = harness();
    chain_fixture(&h, "osint");

    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    // Depth far beyond the chain length; the seen-set must stop the cycle.
    let results = walker
        .related_objects(&reader_ctx(), TloType::Indicator, "A", 4, 50)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn caller_bounds_are_clamped_server_side() {
    let h = harness_with_limits(
        QueryLimits {
            max_cost: 100,
            max_depth: 10,
        },
        TraversalBounds {
            max_depth: 1,
            max_total: 1,
        },
    );
    chain_fixture(&h, "osint");

    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    let results = walker
        .related_objects(&reader_ctx(), TloType::Indicator, "A", 99, 9999)
        .await
        .unwrap();

    // Depth clamped to 1 and total clamped to 1.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].depth, 1);
}

#[tokio::test]
async fn unknown_edge_targets_are_skipped() {
    let h = harness();
    let mut a = object(TloType::Indicator, "a.example.com", &["osint"]);
    a.relationships.push(edge("Related To", TloType::Sample, "B"));
    a.relationships.push(common::edge("Related To", TloType::Sample, "missing"));
    h.store.insert_object(TloType::Indicator, "A", a);
    h.store
        .insert_object(TloType::Sample, "B", object(TloType::Sample, "dropper.exe", &[]));

    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    let results = walker
        .related_objects(&reader_ctx(), TloType::Indicator, "A", 1, 50)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "B");
}

#[tokio::test]
async fn missing_start_node_yields_empty_list() {
    let h = harness();
    let walker = GraphWalker::new(h.store.as_ref(), h.engine.bounds);
    let results = walker
        .related_objects(&reader_ctx(), TloType::Indicator, "nope", 2, 50)
        .await
        .unwrap();
    assert!(results.is_empty());
}
