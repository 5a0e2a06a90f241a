//! Permission-isolated result caching.
//!
//! Key grammar: `<namespace>:<operation_prefix>[:<args_hash>]:<access_hash|anon>`.
//! The access hash is always the final segment; two principals with
//! different grant sets can never collide on a key, and anonymous requests
//! can never collide with authenticated ones.

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::auth::context::AuthContext;
use crate::config::CacheConfig;
use crate::services::redis::CacheStore;

const HASH_LEN: usize = 12;

fn hash12(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(digest)[..HASH_LEN].to_string()
}

/// Render a JSON value deterministically: object keys emitted in sorted
/// order at every level, no whitespace. Key-order independent by
/// construction, so equal argument sets always hash equally.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body = keys
                .iter()
                .map(|k| format!("{}:{}", Value::String((*k).clone()), canonical_json(&map[*k])))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", body)
        }
        Value::Array(items) => {
            let body = items
                .iter()
                .map(canonical_json)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", body)
        }
        other => other.to_string(),
    }
}

/// Short digest of a resolver's argument set.
pub fn args_hash(args: &Value) -> String {
    hash12(&canonical_json(args))
}

/// Build a cache key. `args` is omitted for argument-less operations.
pub fn make_cache_key(
    namespace: &str,
    prefix: &str,
    args: Option<&Value>,
    access_hash: &str,
) -> String {
    match args {
        Some(value) => format!("{}:{}:{}:{}", namespace, prefix, args_hash(value), access_hash),
        None => format!("{}:{}:{}", namespace, prefix, access_hash),
    }
}

#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    default_ttl_secs: u64,
    namespace: String,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
            default_ttl_secs: config.default_ttl_secs,
            namespace: config.namespace.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn key(&self, prefix: &str, args: Option<&Value>, ctx: &AuthContext) -> String {
        make_cache_key(&self.namespace, prefix, args, ctx.access_hash())
    }

    /// Cache read. Disabled caching and store errors both degrade to a
    /// miss; a broken cache must never fail a request.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        match self.store.get_raw(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    tracing::debug!(key = %key, "Cache HIT");
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Cache entry failed to deserialize");
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(key = %key, "Cache MISS");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache get error");
                None
            }
        }
    }

    /// Cache write; returns false when disabled or the store failed.
    pub async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> bool {
        if !self.enabled {
            return false;
        }
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        let raw = value.to_string();
        match self.store.set_ex(key, &raw, ttl).await {
            Ok(()) => {
                tracing::debug!(key = %key, ttl = ttl, "Cache SET");
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache set error");
                false
            }
        }
    }

    /// Deserialize a typed value from the cache, if present.
    pub async fn get_as<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        serde_json::from_value(value).ok()
    }

    /// Drop every key under a type's prefix (`ns:<type>:*`).
    pub async fn invalidate_type(&self, type_name: &str) -> u64 {
        let pattern = format!("{}:{}:*", self.namespace, type_name);
        self.delete_pattern(&pattern).await
    }

    /// Drop the object-specific keys (`ns:<type>:<id>:*`) and the
    /// list-level keys (`ns:<type>_list:*`). List and search results embed
    /// filtered views that can include this object under arbitrary
    /// argument combinations; invalidating only the object key would leave
    /// stale lists behind.
    pub async fn invalidate_object(&self, type_name: &str, id: &str) -> u64 {
        let patterns = [
            format!("{}:{}:{}:*", self.namespace, type_name, id),
            format!("{}:{}_list:*", self.namespace, type_name),
        ];
        let mut deleted = 0;
        for pattern in &patterns {
            deleted += self.delete_pattern(pattern).await;
        }
        deleted
    }

    async fn delete_pattern(&self, pattern: &str) -> u64 {
        match self.store.delete_pattern(pattern).await {
            Ok(deleted) => {
                tracing::info!(pattern = %pattern, deleted = deleted, "Cache invalidated");
                deleted
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Cache invalidation error");
                0
            }
        }
    }

    pub async fn ping(&self) -> Result<(), anyhow::Error> {
        self.store.ping().await
    }
}

/// How post-mutation invalidation is dispatched. Declared in configuration,
/// never probed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Detached task; the mutation response does not wait for it. A
    /// concurrent read may repopulate pre-mutation data; the TTL bounds
    /// that staleness. Callers needing read-your-writes bypass the cache.
    Background,
    /// Awaited in-line before the mutation response is sent.
    Inline,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(DispatchMode::Background),
            "inline" => Ok(DispatchMode::Inline),
            other => Err(format!("Invalid dispatch mode: {}", other)),
        }
    }
}

/// Post-mutation cache invalidation with an explicit dispatch mode.
#[derive(Clone)]
pub struct Invalidator {
    cache: CacheClient,
    mode: DispatchMode,
}

impl Invalidator {
    pub fn new(cache: CacheClient, mode: DispatchMode) -> Self {
        Self { cache, mode }
    }

    /// Invalidate whole type namespaces (object and list prefixes for
    /// each named type).
    pub async fn types(&self, type_names: &[&str]) {
        if !self.cache.enabled() {
            return;
        }
        let names: Vec<String> = type_names.iter().map(|n| n.to_string()).collect();
        let cache = self.cache.clone();
        match self.mode {
            DispatchMode::Background => {
                tokio::spawn(async move {
                    invalidate_type_set(&cache, &names).await;
                });
            }
            DispatchMode::Inline => invalidate_type_set(&self.cache, &names).await,
        }
    }

    /// Invalidate one object plus its type's list-level keys.
    pub async fn object(&self, type_name: &str, id: &str) {
        if !self.cache.enabled() {
            return;
        }
        let cache = self.cache.clone();
        let type_name = type_name.to_string();
        let id = id.to_string();
        match self.mode {
            DispatchMode::Background => {
                tokio::spawn(async move {
                    cache.invalidate_object(&type_name, &id).await;
                });
            }
            DispatchMode::Inline => {
                self.cache.invalidate_object(&type_name, &id).await;
            }
        }
    }
}

async fn invalidate_type_set(cache: &CacheClient, names: &[String]) {
    for name in names {
        cache.invalidate_type(name).await;
        cache.invalidate_type(&format!("{}_list", name)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::context::{AuthContext, Principal};
    use crate::models::SourceGrant;
    use crate::services::redis::MemoryCache;
    use serde_json::json;
    use std::collections::HashSet;

    fn cache_config() -> CacheConfig {
        CacheConfig {
            enabled: true,
            default_ttl_secs: 900,
            namespace: "intelgraph:query".to_string(),
        }
    }

    fn authed_ctx() -> AuthContext {
        AuthContext::new(
            Principal {
                id: "64a000000000000000000001".to_string(),
                username: "analyst".to_string(),
                is_active: true,
                is_superuser: false,
            },
            HashSet::new(),
            vec![SourceGrant::read_only("osint")],
        )
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let a = json!({"b": {"y": 1, "x": 2}, "a": [3, 4]});
        let b = json!({"a": [3, 4], "b": {"x": 2, "y": 1}});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(args_hash(&a), args_hash(&b));
    }

    #[test]
    fn key_grammar_places_access_hash_last() {
        let ctx = authed_ctx();
        let with_args = make_cache_key(
            "intelgraph:query",
            "indicator_list",
            Some(&json!({"limit": 25})),
            ctx.access_hash(),
        );
        assert!(with_args.starts_with("intelgraph:query:indicator_list:"));
        assert!(with_args.ends_with(ctx.access_hash()));
        assert_eq!(with_args.split(':').count(), 5);

        let anon = make_cache_key("intelgraph:query", "tlo_types", None, "anon");
        assert_eq!(anon, "intelgraph:query:tlo_types:anon");
    }

    #[tokio::test]
    async fn disabled_cache_is_a_no_op() {
        let mut config = cache_config();
        config.enabled = false;
        let client = CacheClient::new(Arc::new(MemoryCache::new()), &config);
        assert!(!client.set("k", &json!(1), None).await);
        assert!(client.get("k").await.is_none());
    }

    #[tokio::test]
    async fn store_errors_degrade_to_miss() {
        let store = Arc::new(MemoryCache::new());
        let client = CacheClient::new(store.clone(), &cache_config());
        assert!(client.set("k", &json!({"v": 1}), None).await);

        store.set_failing(true);
        assert!(client.get("k").await.is_none());
        assert!(!client.set("k2", &json!(2), None).await);
    }

    #[tokio::test]
    async fn invalidate_object_clears_object_and_list_keys() {
        let store = Arc::new(MemoryCache::new());
        let client = CacheClient::new(store, &cache_config());
        let ctx = authed_ctx();

        let object_key = client.key("indicator:X", None, &ctx);
        let list_key = client.key("indicator_list", Some(&json!({"limit": 25})), &ctx);
        let other_key = client.key("domain:Y", None, &ctx);
        client.set(&object_key, &json!({"id": "X"}), None).await;
        client.set(&list_key, &json!([{"id": "X"}]), None).await;
        client.set(&other_key, &json!({"id": "Y"}), None).await;

        client.invalidate_object("indicator", "X").await;

        assert!(client.get(&object_key).await.is_none());
        assert!(client.get(&list_key).await.is_none());
        assert!(client.get(&other_key).await.is_some());
    }

    #[tokio::test]
    async fn inline_invalidator_clears_before_returning() {
        let store = Arc::new(MemoryCache::new());
        let client = CacheClient::new(store, &cache_config());
        let ctx = authed_ctx();

        let key = client.key("sample:Z", None, &ctx);
        client.set(&key, &json!({"id": "Z"}), None).await;

        let invalidator = Invalidator::new(client.clone(), DispatchMode::Inline);
        invalidator.object("sample", "Z").await;

        assert!(client.get(&key).await.is_none());
    }
}
