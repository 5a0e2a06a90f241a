//! Principal and role documents, plus role merging.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::source::SourceGrant;

fn default_true() -> bool {
    true
}

/// Authenticated principal record from the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    pub password_hash: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Role document from the `roles` collection: a named bundle of
/// capability strings and per-source grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceGrant>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Merge a principal's roles into one capability set and one grant list.
///
/// Capabilities union; grants for the same source name OR their bits, so a
/// principal ends up with at most one grant per source. Inactive roles do
/// not contribute.
pub fn merge_roles(roles: &[Role]) -> (HashSet<String>, Vec<SourceGrant>) {
    let mut capabilities = HashSet::new();
    let mut by_source: BTreeMap<String, SourceGrant> = BTreeMap::new();

    for role in roles.iter().filter(|r| r.active) {
        capabilities.extend(role.capabilities.iter().cloned());
        for grant in &role.sources {
            by_source
                .entry(grant.name.clone())
                .and_modify(|merged| merged.merge_from(grant))
                .or_insert_with(|| grant.clone());
        }
    }

    (capabilities, by_source.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, capabilities: &[&str], sources: Vec<SourceGrant>) -> Role {
        Role {
            id: ObjectId::new(),
            name: name.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            sources,
            active: true,
        }
    }

    #[test]
    fn merge_unions_capabilities() {
        let roles = vec![
            role("analyst", &["Indicator.read", "Sample.read"], vec![]),
            role("editor", &["Indicator.read", "Indicator.write"], vec![]),
        ];
        let (caps, _) = merge_roles(&roles);
        assert_eq!(caps.len(), 3);
        assert!(caps.contains("Indicator.write"));
    }

    #[test]
    fn merge_collapses_grants_per_source() {
        let read = SourceGrant::read_only("osint");
        let write = SourceGrant {
            name: "osint".to_string(),
            read: false,
            write: true,
            tlp_red: true,
            tlp_amber: false,
            tlp_green: false,
        };
        let roles = vec![
            role("reader", &[], vec![read]),
            role("writer", &[], vec![write, SourceGrant::read_only("partner")]),
        ];
        let (_, grants) = merge_roles(&roles);
        assert_eq!(grants.len(), 2);
        let osint = grants.iter().find(|g| g.name == "osint").unwrap();
        assert!(osint.read && osint.write && osint.tlp_red);
    }

    #[test]
    fn merge_skips_inactive_roles() {
        let mut inactive = role("old", &["Sample.delete"], vec![]);
        inactive.active = false;
        let (caps, grants) = merge_roles(&[inactive]);
        assert!(caps.is_empty());
        assert!(grants.is_empty());
    }
}
