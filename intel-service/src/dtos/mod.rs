//! Request/response shapes for the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::auth::context::AuthContext;
use crate::models::{SourceGrant, ThreatObject, TloType};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Response envelope for `/api/query`: one data entry per top-level field
/// (keyed by alias when present), plus per-field errors. Admission and
/// authentication failures reject the whole request instead.
#[derive(Debug, Default, Serialize)]
pub struct QueryResponse {
    pub data: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Outcome payload for mutation fields.
#[derive(Debug, Serialize)]
pub struct MutationOutcome {
    pub success: bool,
    pub message: String,
}

impl MutationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SourceRefView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tlp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RelationshipView {
    pub label: String,
    pub target_type: String,
    pub target_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Public projection of a threat object.
#[derive(Debug, Serialize)]
pub struct ThreatObjectView {
    pub id: String,
    pub tlo_type: String,
    pub display_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    pub sources: Vec<SourceRefView>,
    pub campaigns: Vec<String>,
    pub bucket_list: Vec<String>,
    pub relationships: Vec<RelationshipView>,
}

impl ThreatObjectView {
    pub fn from_object(obj: &ThreatObject, tlo: TloType) -> Self {
        Self {
            id: obj.id.to_hex(),
            tlo_type: tlo.as_str().to_string(),
            display_value: obj.display_value(tlo),
            status: obj.status.clone(),
            analyst: obj.analyst.clone(),
            created: obj.created.map(|d| d.try_to_rfc3339_string().unwrap_or_default()),
            modified: obj.modified.map(|d| d.try_to_rfc3339_string().unwrap_or_default()),
            sources: obj
                .source
                .iter()
                .map(|s| SourceRefView {
                    name: s.name.clone(),
                    tlp: s.tlp.map(|t| t.as_str().to_string()),
                })
                .collect(),
            campaigns: obj.campaign.iter().map(|c| c.name.clone()).collect(),
            bucket_list: obj.bucket_list.clone(),
            relationships: obj
                .relationships
                .iter()
                .map(|r| RelationshipView {
                    label: r.label.clone(),
                    target_type: r.target_type.clone(),
                    target_id: r.target_id.clone(),
                    confidence: r.confidence.clone(),
                    reason: r.reason.clone(),
                })
                .collect(),
        }
    }
}

/// Cross-type search hit.
#[derive(Debug, Serialize)]
pub struct SearchResultView {
    pub id: String,
    pub tlo_type: String,
    pub display_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Projection of the authenticated principal.
#[derive(Debug, Serialize)]
pub struct PrincipalView {
    pub id: String,
    pub username: String,
    pub is_superuser: bool,
    pub capabilities: Vec<String>,
    pub sources: Vec<SourceGrantView>,
}

#[derive(Debug, Serialize)]
pub struct SourceGrantView {
    pub name: String,
    pub read: bool,
    pub write: bool,
    pub tlp_red: bool,
    pub tlp_amber: bool,
    pub tlp_green: bool,
}

impl From<&SourceGrant> for SourceGrantView {
    fn from(g: &SourceGrant) -> Self {
        Self {
            name: g.name.clone(),
            read: g.read,
            write: g.write,
            tlp_red: g.tlp_red,
            tlp_amber: g.tlp_amber,
            tlp_green: g.tlp_green,
        }
    }
}

impl PrincipalView {
    pub fn from_context(ctx: &AuthContext) -> Option<Self> {
        let principal = ctx.principal()?;
        let mut capabilities: Vec<String> = ctx.capabilities().iter().cloned().collect();
        capabilities.sort();
        Some(Self {
            id: principal.id.clone(),
            username: principal.username.clone(),
            is_superuser: principal.is_superuser,
            capabilities,
            sources: ctx.grants().iter().map(SourceGrantView::from).collect(),
        })
    }
}
