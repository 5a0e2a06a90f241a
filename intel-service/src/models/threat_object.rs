//! Threat object envelope shared by every TLO collection.

use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::source::SourceRef;

/// The typed top-level object kinds in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TloType {
    Actor,
    Backdoor,
    Campaign,
    Certificate,
    Domain,
    Email,
    Event,
    Exploit,
    Indicator,
    #[serde(rename = "IP")]
    Ip,
    #[serde(rename = "PCAP")]
    Pcap,
    RawData,
    Sample,
    Screenshot,
    Signature,
    Target,
}

impl TloType {
    pub const ALL: [TloType; 16] = [
        TloType::Actor,
        TloType::Backdoor,
        TloType::Campaign,
        TloType::Certificate,
        TloType::Domain,
        TloType::Email,
        TloType::Event,
        TloType::Exploit,
        TloType::Indicator,
        TloType::Ip,
        TloType::Pcap,
        TloType::RawData,
        TloType::Sample,
        TloType::Screenshot,
        TloType::Signature,
        TloType::Target,
    ];

    /// API type tag, e.g. "Indicator", "IP", "RawData".
    pub fn as_str(&self) -> &'static str {
        match self {
            TloType::Actor => "Actor",
            TloType::Backdoor => "Backdoor",
            TloType::Campaign => "Campaign",
            TloType::Certificate => "Certificate",
            TloType::Domain => "Domain",
            TloType::Email => "Email",
            TloType::Event => "Event",
            TloType::Exploit => "Exploit",
            TloType::Indicator => "Indicator",
            TloType::Ip => "IP",
            TloType::Pcap => "PCAP",
            TloType::RawData => "RawData",
            TloType::Sample => "Sample",
            TloType::Screenshot => "Screenshot",
            TloType::Signature => "Signature",
            TloType::Target => "Target",
        }
    }

    /// MongoDB collection backing this type.
    pub fn collection(&self) -> &'static str {
        match self {
            TloType::Actor => "actors",
            TloType::Backdoor => "backdoors",
            TloType::Campaign => "campaigns",
            TloType::Certificate => "certificates",
            TloType::Domain => "domains",
            TloType::Email => "emails",
            TloType::Event => "events",
            TloType::Exploit => "exploits",
            TloType::Indicator => "indicators",
            TloType::Ip => "ips",
            TloType::Pcap => "pcaps",
            TloType::RawData => "raw_data",
            TloType::Sample => "samples",
            TloType::Screenshot => "screenshots",
            TloType::Signature => "signatures",
            TloType::Target => "targets",
        }
    }

    /// Field searched by substring queries for this type.
    pub fn search_field(&self) -> &'static str {
        match self {
            TloType::Actor => "name",
            TloType::Backdoor => "name",
            TloType::Campaign => "name",
            TloType::Certificate => "filename",
            TloType::Domain => "domain",
            TloType::Email => "subject",
            TloType::Event => "title",
            TloType::Exploit => "name",
            TloType::Indicator => "value",
            TloType::Ip => "ip",
            TloType::Pcap => "filename",
            TloType::RawData => "title",
            TloType::Sample => "filename",
            TloType::Screenshot => "filename",
            TloType::Signature => "title",
            TloType::Target => "email_address",
        }
    }

    /// Field rendered as the object's human-readable display value.
    pub fn display_field(&self) -> &'static str {
        // Display and search coincide for every current type.
        self.search_field()
    }

    /// Cache key prefix for this type, e.g. "indicator", "raw_data".
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            TloType::Actor => "actor",
            TloType::Backdoor => "backdoor",
            TloType::Campaign => "campaign",
            TloType::Certificate => "certificate",
            TloType::Domain => "domain",
            TloType::Email => "email",
            TloType::Event => "event",
            TloType::Exploit => "exploit",
            TloType::Indicator => "indicator",
            TloType::Ip => "ip",
            TloType::Pcap => "pcap",
            TloType::RawData => "raw_data",
            TloType::Sample => "sample",
            TloType::Screenshot => "screenshot",
            TloType::Signature => "signature",
            TloType::Target => "target",
        }
    }
}

impl fmt::Display for TloType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TloType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TloType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown TLO type: {}", s))
    }
}

/// Campaign attribution embedded on a threat object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst: Option<String>,
}

/// Directed relationship edge embedded on the owning object.
///
/// Edges are stored reciprocally: forging A -> B also writes B -> A, and
/// removal pulls both. Traversal therefore treats the graph as cyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "relationship", default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub target_type: String,
    #[serde(rename = "value", default)]
    pub target_id: String,
    #[serde(rename = "rel_confidence", default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(rename = "rel_reason", default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<bson::DateTime>,
}

/// Common envelope deserialized from any TLO collection. Type-specific
/// fields (value, name, filename, ...) land in the flattened remainder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatObject {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub analyst: Option<String>,
    #[serde(default)]
    pub created: Option<bson::DateTime>,
    #[serde(default)]
    pub modified: Option<bson::DateTime>,
    #[serde(default)]
    pub source: Vec<SourceRef>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub campaign: Vec<CampaignRef>,
    #[serde(default)]
    pub bucket_list: Vec<String>,
    #[serde(flatten)]
    pub fields: bson::Document,
}

impl ThreatObject {
    /// Human-readable display value for this object, falling back to the
    /// hex ObjectId when the type's display field is absent.
    pub fn display_value(&self, tlo: TloType) -> String {
        self.fields
            .get_str(tlo.display_field())
            .map(str::to_string)
            .unwrap_or_else(|_| self.id.to_hex())
    }
}

/// Uniform capability surface over heterogeneous object models: anything
/// access-checked or traversed exposes its sources and edges through this.
pub trait Accessible {
    fn source_list(&self) -> &[SourceRef];
    fn relationship_edges(&self) -> &[Relationship];
}

impl Accessible for ThreatObject {
    fn source_list(&self) -> &[SourceRef] {
        &self.source
    }

    fn relationship_edges(&self) -> &[Relationship] {
        &self.relationships
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn tlo_type_round_trips_through_str() {
        for tlo in TloType::ALL {
            assert_eq!(tlo.as_str().parse::<TloType>().unwrap(), tlo);
        }
        assert!("Widget".parse::<TloType>().is_err());
    }

    #[test]
    fn display_value_reads_type_specific_field() {
        let obj = ThreatObject {
            id: ObjectId::new(),
            status: None,
            analyst: None,
            created: None,
            modified: None,
            source: vec![],
            relationships: vec![],
            campaign: vec![],
            bucket_list: vec![],
            fields: doc! { "value": "evil.example.com" },
        };
        assert_eq!(obj.display_value(TloType::Indicator), "evil.example.com");
    }

    #[test]
    fn display_value_falls_back_to_id() {
        let id = ObjectId::new();
        let obj = ThreatObject {
            id,
            status: None,
            analyst: None,
            created: None,
            modified: None,
            source: vec![],
            relationships: vec![],
            campaign: vec![],
            bucket_list: vec![],
            fields: doc! {},
        };
        assert_eq!(obj.display_value(TloType::Sample), id.to_hex());
    }
}
