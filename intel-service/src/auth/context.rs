//! Per-request authorization context.
//!
//! Resolved once per request and immutable afterwards. Everything downstream
//! (permission checks, storage predicates, cache keys, traversal gating)
//! derives from this one value.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::models::{SourceGrant, Tlp, User};

/// Access-hash value used for unauthenticated requests.
pub const ANON_SENTINEL: &str = "anon";

/// Access-hash value for an authenticated principal holding no grants.
/// Distinct from [`ANON_SENTINEL`] so the two can never share cache keys.
pub const NO_SOURCES_SENTINEL: &str = "no-sources";

const ACCESS_HASH_LEN: usize = 12;

/// The authenticated (or anonymous) actor behind a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub is_active: bool,
    pub is_superuser: bool,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_hex(),
            username: user.username.clone(),
            is_active: user.is_active,
            is_superuser: user.is_superuser,
        }
    }
}

/// Immutable request-scoped authorization context: the principal, their
/// merged capability set, and their per-source grants in canonical
/// (name-sorted) order.
#[derive(Debug, Clone)]
pub struct AuthContext {
    principal: Option<Principal>,
    capabilities: HashSet<String>,
    grants: Vec<SourceGrant>,
    access_hash: String,
}

impl AuthContext {
    /// Context for a request carrying no session at all.
    pub fn anonymous() -> Self {
        Self {
            principal: None,
            capabilities: HashSet::new(),
            grants: Vec::new(),
            access_hash: ANON_SENTINEL.to_string(),
        }
    }

    /// Build a context for an authenticated principal. Grants are sorted
    /// by source name (the canonical form) and the access hash is fixed
    /// here for the lifetime of the request.
    pub fn new(
        principal: Principal,
        capabilities: HashSet<String>,
        mut grants: Vec<SourceGrant>,
    ) -> Self {
        grants.sort_by(|a, b| a.name.cmp(&b.name));
        let access_hash = compute_access_hash(&grants);
        Self {
            principal: Some(principal),
            capabilities,
            grants,
            access_hash,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.as_ref().is_some_and(|p| p.is_active)
    }

    pub fn is_superuser(&self) -> bool {
        self.principal.as_ref().is_some_and(|p| p.is_superuser)
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.username.as_str())
    }

    pub fn capabilities(&self) -> &HashSet<String> {
        &self.capabilities
    }

    /// Grants in canonical (name-sorted) order.
    pub fn grants(&self) -> &[SourceGrant] {
        &self.grants
    }

    pub fn grant_for(&self, source_name: &str) -> Option<&SourceGrant> {
        self.grants.iter().find(|g| g.name == source_name)
    }

    /// Deterministic fingerprint of the grant set, used to partition cache
    /// keys per distinct permission footprint. Stable across processes and
    /// across re-derivations of an equivalent grant set.
    pub fn access_hash(&self) -> &str {
        &self.access_hash
    }

    /// Names of sources this principal can read, optionally narrowed to
    /// those whose grant covers the given TLP level.
    pub fn readable_sources(&self, tlp: Option<Tlp>) -> Vec<&str> {
        if self.is_superuser() {
            return self.grants.iter().map(|g| g.name.as_str()).collect();
        }
        self.grants
            .iter()
            .filter(|g| g.read && g.allows_tlp(tlp))
            .map(|g| g.name.as_str())
            .collect()
    }
}

fn compute_access_hash(sorted_grants: &[SourceGrant]) -> String {
    if sorted_grants.is_empty() {
        return NO_SOURCES_SENTINEL.to_string();
    }
    let canonical = sorted_grants
        .iter()
        .map(|g| {
            format!(
                "{}:{}:{}:{}:{}:{}",
                g.name, g.read, g.write, g.tlp_red, g.tlp_amber, g.tlp_green
            )
        })
        .collect::<Vec<_>>()
        .join("|");

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..ACCESS_HASH_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            id: "64a000000000000000000001".to_string(),
            username: "analyst".to_string(),
            is_active: true,
            is_superuser: false,
        }
    }

    fn grant(name: &str) -> SourceGrant {
        SourceGrant::read_only(name)
    }

    #[test]
    fn access_hash_is_order_independent() {
        let forward = AuthContext::new(
            principal(),
            HashSet::new(),
            vec![grant("alpha"), grant("beta"), grant("gamma")],
        );
        let reversed = AuthContext::new(
            principal(),
            HashSet::new(),
            vec![grant("gamma"), grant("beta"), grant("alpha")],
        );
        assert_eq!(forward.access_hash(), reversed.access_hash());
        assert_eq!(forward.access_hash().len(), 12);
    }

    #[test]
    fn access_hash_differs_for_different_grant_sets() {
        let read = AuthContext::new(principal(), HashSet::new(), vec![grant("alpha")]);
        let mut writable = grant("alpha");
        writable.write = true;
        let write = AuthContext::new(principal(), HashSet::new(), vec![writable]);
        assert_ne!(read.access_hash(), write.access_hash());
    }

    #[test]
    fn access_hash_collision_absence_over_sample() {
        // A few hundred distinct grant sets must hash distinctly.
        let mut seen = HashSet::new();
        for i in 0..500 {
            let ctx = AuthContext::new(
                principal(),
                HashSet::new(),
                vec![grant(&format!("source-{}", i))],
            );
            assert!(seen.insert(ctx.access_hash().to_string()), "collision at {}", i);
        }
    }

    #[test]
    fn sentinels_never_collide() {
        let anon = AuthContext::anonymous();
        let no_grants = AuthContext::new(principal(), HashSet::new(), vec![]);
        assert_eq!(anon.access_hash(), ANON_SENTINEL);
        assert_eq!(no_grants.access_hash(), NO_SOURCES_SENTINEL);
        assert_ne!(anon.access_hash(), no_grants.access_hash());
    }

    #[test]
    fn readable_sources_narrows_by_tlp() {
        let mut amber = grant("amber-only");
        amber.tlp_amber = true;
        let plain = grant("plain");
        let ctx = AuthContext::new(principal(), HashSet::new(), vec![amber, plain]);

        let all = ctx.readable_sources(None);
        assert_eq!(all.len(), 2);

        let amber_only = ctx.readable_sources(Some(Tlp::Amber));
        assert_eq!(amber_only, vec!["amber-only"]);

        let white = ctx.readable_sources(Some(Tlp::White));
        assert_eq!(white.len(), 2);
    }
}
