pub mod source;
pub mod threat_object;
pub mod user;

pub use source::{SourceGrant, SourceRef, Tlp};
pub use threat_object::{Accessible, CampaignRef, Relationship, ThreatObject, TloType};
pub use user::{merge_roles, Role, User};
