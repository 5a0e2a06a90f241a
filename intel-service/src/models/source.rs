//! Source attribution and Traffic Light Protocol markings.

use serde::{Deserialize, Serialize};

/// Traffic Light Protocol sensitivity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tlp {
    White,
    Green,
    Amber,
    Red,
}

impl Tlp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tlp::White => "white",
            Tlp::Green => "green",
            Tlp::Amber => "amber",
            Tlp::Red => "red",
        }
    }
}

/// Provenance entry embedded on a threat object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tlp: Option<Tlp>,
}

/// A principal's access to a single named source.
///
/// A principal holds at most one grant per source name; grants coming from
/// multiple roles are merged bit-wise before an AuthContext is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGrant {
    pub name: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub tlp_red: bool,
    #[serde(default)]
    pub tlp_amber: bool,
    #[serde(default)]
    pub tlp_green: bool,
}

impl SourceGrant {
    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read: true,
            write: false,
            tlp_red: false,
            tlp_amber: false,
            tlp_green: false,
        }
    }

    /// OR the access bits of another grant for the same source into this one.
    pub fn merge_from(&mut self, other: &SourceGrant) {
        self.read |= other.read;
        self.write |= other.write;
        self.tlp_red |= other.tlp_red;
        self.tlp_amber |= other.tlp_amber;
        self.tlp_green |= other.tlp_green;
    }

    /// Whether this grant permits reading material at the given TLP level.
    /// White (and unmarked) material is gated by the read bit alone.
    pub fn allows_tlp(&self, tlp: Option<Tlp>) -> bool {
        match tlp {
            None | Some(Tlp::White) => true,
            Some(Tlp::Green) => self.tlp_green,
            Some(Tlp::Amber) => self.tlp_amber,
            Some(Tlp::Red) => self.tlp_red,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_from_ors_bits() {
        let mut a = SourceGrant::read_only("osint");
        let b = SourceGrant {
            name: "osint".to_string(),
            read: false,
            write: true,
            tlp_red: false,
            tlp_amber: true,
            tlp_green: false,
        };
        a.merge_from(&b);
        assert!(a.read);
        assert!(a.write);
        assert!(a.tlp_amber);
        assert!(!a.tlp_red);
    }

    #[test]
    fn allows_tlp_white_needs_no_bit() {
        let grant = SourceGrant::read_only("osint");
        assert!(grant.allows_tlp(None));
        assert!(grant.allows_tlp(Some(Tlp::White)));
        assert!(!grant.allows_tlp(Some(Tlp::Green)));
        assert!(!grant.allows_tlp(Some(Tlp::Red)));
    }
}
