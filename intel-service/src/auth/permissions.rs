//! The permission gate: pure functions over an [`AuthContext`].
//!
//! Two distinct checks exist on purpose. `source_filter` produces a
//! predicate the storage layer evaluates for bulk list/count queries;
//! `can_access` is the explicit per-object check used by the graph walker
//! and single-object resolvers. They must agree on what "visible" means.

use mongodb::bson::{doc, Document};
use service_core::error::AppError;

use super::context::AuthContext;
use crate::models::{Accessible, Tlp, TloType};

/// Check a capability string ("Indicator.read", "api_interface", ...)
/// against the context's merged capability set. Superusers pass every check.
pub fn has_permission(ctx: &AuthContext, capability: &str) -> bool {
    if ctx.is_superuser() {
        return true;
    }
    if !ctx.is_authenticated() {
        return false;
    }
    ctx.capabilities().contains(capability)
}

/// Reject with `Unauthenticated` unless the context carries an active
/// principal.
pub fn require_authenticated(ctx: &AuthContext) -> Result<(), AppError> {
    if ctx.is_authenticated() {
        Ok(())
    } else {
        Err(AppError::Unauthenticated(anyhow::anyhow!(
            "authentication required"
        )))
    }
}

/// Reject with `Unauthenticated` for anonymous callers and with
/// `PermissionDenied` for authenticated callers missing the capability.
/// The two must never be conflated in a response.
pub fn require_permission(ctx: &AuthContext, capability: &str) -> Result<(), AppError> {
    require_authenticated(ctx)?;
    if has_permission(ctx, capability) {
        Ok(())
    } else {
        tracing::warn!(
            user = ctx.username().unwrap_or("-"),
            capability = capability,
            "permission denied"
        );
        Err(AppError::PermissionDenied(capability.to_string()))
    }
}

/// Conventional capability string for reading a TLO type.
pub fn read_capability(tlo: TloType) -> String {
    format!("{}.read", tlo.as_str())
}

/// Conventional capability string for writing a TLO type.
pub fn write_capability(tlo: TloType) -> String {
    format!("{}.write", tlo.as_str())
}

/// Conventional capability string for deleting a TLO type.
pub fn delete_capability(tlo: TloType) -> String {
    format!("{}.delete", tlo.as_str())
}

/// Storage-level visibility predicate, handed to the document store rather
/// than evaluated in-process.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePredicate {
    /// No constraint (superuser).
    All,
    /// Matches nothing (anonymous).
    None,
    /// Matches public objects (empty source list) and objects attributed
    /// to any of the named sources.
    Sources(Vec<String>),
}

impl SourcePredicate {
    /// Render as a BSON filter fragment; `None` means "no constraint".
    pub fn to_document(&self) -> Option<Document> {
        match self {
            SourcePredicate::All => None,
            // Same match-nothing sentinel the storage layer has always used.
            SourcePredicate::None => Some(doc! { "_id": null }),
            SourcePredicate::Sources(names) => Some(doc! {
                "$or": [
                    { "source": { "$exists": false } },
                    { "source": { "$size": 0 } },
                    { "source.name": { "$in": names } },
                ]
            }),
        }
    }

    /// In-process evaluation of the same predicate, for store fakes.
    pub fn matches(&self, obj: &impl Accessible) -> bool {
        match self {
            SourcePredicate::All => true,
            SourcePredicate::None => false,
            SourcePredicate::Sources(names) => {
                let sources = obj.source_list();
                sources.is_empty() || sources.iter().any(|s| names.iter().any(|n| n == &s.name))
            }
        }
    }
}

/// Build the bulk visibility predicate for this context, optionally
/// narrowed to sources whose grant covers the given TLP level.
pub fn source_filter(ctx: &AuthContext, tlp: Option<Tlp>) -> SourcePredicate {
    if ctx.is_superuser() {
        return SourcePredicate::All;
    }
    if !ctx.is_authenticated() {
        return SourcePredicate::None;
    }
    SourcePredicate::Sources(
        ctx.readable_sources(tlp)
            .into_iter()
            .map(str::to_string)
            .collect(),
    )
}

/// Explicit per-object access check. Superusers pass; objects with no
/// source attribution are public to any authenticated principal; otherwise
/// the first grant matching a source entry with the required bit wins.
pub fn can_access(ctx: &AuthContext, obj: &impl Accessible, write: bool) -> bool {
    if ctx.is_superuser() {
        return true;
    }
    if !ctx.is_authenticated() {
        return false;
    }

    let sources = obj.source_list();
    if sources.is_empty() {
        return true;
    }

    sources.iter().any(|entry| {
        ctx.grant_for(&entry.name)
            .map(|grant| if write { grant.write } else { grant.read })
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::context::Principal;
    use crate::models::{Relationship, SourceGrant, SourceRef};
    use std::collections::HashSet;

    struct Obj {
        sources: Vec<SourceRef>,
    }

    impl Accessible for Obj {
        fn source_list(&self) -> &[SourceRef] {
            &self.sources
        }
        fn relationship_edges(&self) -> &[Relationship] {
            &[]
        }
    }

    fn principal(superuser: bool) -> Principal {
        Principal {
            id: "64a000000000000000000001".to_string(),
            username: "analyst".to_string(),
            is_active: true,
            is_superuser: superuser,
        }
    }

    fn ctx_with(grants: Vec<SourceGrant>) -> AuthContext {
        AuthContext::new(principal(false), HashSet::new(), grants)
    }

    fn source(name: &str) -> SourceRef {
        SourceRef {
            name: name.to_string(),
            tlp: None,
        }
    }

    #[test]
    fn anonymous_filter_matches_nothing() {
        let pred = source_filter(&AuthContext::anonymous(), None);
        assert_eq!(pred, SourcePredicate::None);
        assert!(!pred.matches(&Obj { sources: vec![] }));
    }

    #[test]
    fn superuser_filter_matches_everything() {
        let ctx = AuthContext::new(principal(true), HashSet::new(), vec![]);
        let pred = source_filter(&ctx, None);
        assert_eq!(pred, SourcePredicate::All);
        assert!(pred.to_document().is_none());
    }

    #[test]
    fn grant_filter_admits_public_and_granted() {
        let ctx = ctx_with(vec![SourceGrant::read_only("osint")]);
        let pred = source_filter(&ctx, None);
        assert!(pred.matches(&Obj { sources: vec![] }));
        assert!(pred.matches(&Obj {
            sources: vec![source("osint")]
        }));
        assert!(!pred.matches(&Obj {
            sources: vec![source("private")]
        }));
    }

    #[test]
    fn can_access_empty_source_is_public() {
        let ctx = ctx_with(vec![]);
        assert!(can_access(&ctx, &Obj { sources: vec![] }, false));
        assert!(!can_access(&AuthContext::anonymous(), &Obj { sources: vec![] }, false));
    }

    #[test]
    fn can_access_requires_matching_bit() {
        let ctx = ctx_with(vec![SourceGrant::read_only("osint")]);
        let obj = Obj {
            sources: vec![source("osint")],
        };
        assert!(can_access(&ctx, &obj, false));
        assert!(!can_access(&ctx, &obj, true));
    }

    #[test]
    fn can_access_scans_all_entries() {
        let ctx = ctx_with(vec![SourceGrant::read_only("second")]);
        let obj = Obj {
            sources: vec![source("first"), source("second")],
        };
        assert!(can_access(&ctx, &obj, false));
    }

    #[test]
    fn require_permission_distinguishes_401_from_403() {
        let anon = AuthContext::anonymous();
        assert!(matches!(
            require_permission(&anon, "Indicator.read"),
            Err(AppError::Unauthenticated(_))
        ));

        let ctx = ctx_with(vec![]);
        assert!(matches!(
            require_permission(&ctx, "Indicator.read"),
            Err(AppError::PermissionDenied(_))
        ));

        let mut caps = HashSet::new();
        caps.insert("Indicator.read".to_string());
        let allowed = AuthContext::new(principal(false), caps, vec![]);
        assert!(require_permission(&allowed, "Indicator.read").is_ok());
    }
}
