//! Shared fixtures for intel-service integration tests.
//!
//! Tests run against the in-memory store fakes; no live MongoDB or Redis
//! is required.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use mongodb::bson::{doc, oid::ObjectId};

use intel_service::auth::context::{AuthContext, Principal};
use intel_service::graph::walker::TraversalBounds;
use intel_service::models::{Relationship, SourceGrant, SourceRef, ThreatObject, TloType};
use intel_service::query::executor::QueryEngine;
use intel_service::query::governor::{CostGovernor, QueryLimits};
use intel_service::services::cache::{CacheClient, DispatchMode, Invalidator};
use intel_service::services::database::MemoryStore;
use intel_service::services::redis::MemoryCache;

pub fn object(tlo: TloType, display: &str, sources: &[&str]) -> ThreatObject {
    ThreatObject {
        id: ObjectId::new(),
        status: Some("New".to_string()),
        analyst: Some("fixture".to_string()),
        created: None,
        modified: None,
        source: sources
            .iter()
            .map(|name| SourceRef {
                name: name.to_string(),
                tlp: None,
            })
            .collect(),
        relationships: vec![],
        campaign: vec![],
        bucket_list: vec![],
        fields: doc! { tlo.display_field(): display },
    }
}

pub fn edge(label: &str, target_type: TloType, target_id: &str) -> Relationship {
    Relationship {
        label: label.to_string(),
        target_type: target_type.as_str().to_string(),
        target_id: target_id.to_string(),
        confidence: None,
        reason: None,
        analyst: None,
        date: None,
    }
}

pub fn grant(name: &str) -> SourceGrant {
    SourceGrant::read_only(name)
}

pub fn writable_grant(name: &str) -> SourceGrant {
    SourceGrant {
        name: name.to_string(),
        read: true,
        write: true,
        tlp_red: false,
        tlp_amber: false,
        tlp_green: false,
    }
}

pub fn analyst_ctx(capabilities: &[&str], grants: Vec<SourceGrant>) -> AuthContext {
    AuthContext::new(
        Principal {
            id: ObjectId::new().to_hex(),
            username: "analyst".to_string(),
            is_active: true,
            is_superuser: false,
        },
        capabilities
            .iter()
            .map(|c| c.to_string())
            .collect::<HashSet<_>>(),
        grants,
    )
}

pub fn superuser_ctx() -> AuthContext {
    AuthContext::new(
        Principal {
            id: ObjectId::new().to_hex(),
            username: "root".to_string(),
            is_active: true,
            is_superuser: true,
        },
        HashSet::new(),
        vec![],
    )
}

pub struct TestHarness {
    pub engine: QueryEngine,
    pub store: Arc<MemoryStore>,
    pub cache_store: Arc<MemoryCache>,
}

pub fn harness() -> TestHarness {
    harness_with_limits(
        QueryLimits {
            max_cost: 100,
            max_depth: 10,
        },
        TraversalBounds {
            max_depth: 4,
            max_total: 200,
        },
    )
}

pub fn harness_with_limits(limits: QueryLimits, bounds: TraversalBounds) -> TestHarness {
    let store = Arc::new(MemoryStore::new());
    let cache_store = Arc::new(MemoryCache::new());
    let cache = CacheClient::new(
        cache_store.clone(),
        &intel_service::config::CacheConfig {
            enabled: true,
            default_ttl_secs: 900,
            namespace: "intelgraph:query".to_string(),
        },
    );
    let invalidator = Invalidator::new(cache.clone(), DispatchMode::Inline);
    let engine = QueryEngine {
        store: store.clone(),
        cache,
        invalidator,
        governor: CostGovernor::new(limits),
        bounds,
    };
    TestHarness {
        engine,
        store,
        cache_store,
    }
}
