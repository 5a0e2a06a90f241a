//! Query execution pipeline.
//!
//! Each request runs the same ordered stages: admission (cost/depth
//! governor), then per top-level field: auth gate, cache lookup, resolver,
//! cache store. Mutation fields additionally dispatch invalidation after
//! the write. Stages are plain functions over the request-scoped
//! [`AuthContext`]; nothing here holds mutable state across requests.

use mongodb::bson;
use serde_json::{json, Value};
use std::sync::Arc;

use service_core::error::AppError;

use crate::auth::context::AuthContext;
use crate::auth::permissions::{
    can_access, delete_capability, has_permission, read_capability, require_authenticated,
    require_permission, source_filter, write_capability,
};
use crate::dtos::{
    FieldError, MutationOutcome, PrincipalView, QueryResponse, SearchResultView, ThreatObjectView,
};
use crate::graph::walker::{GraphWalker, TraversalBounds};
use crate::models::{Relationship, TloType};
use crate::query::governor::CostGovernor;
use crate::query::shape::{FieldNode, OperationKind, QueryDocument, Selection};
use crate::services::cache::{CacheClient, Invalidator};
use crate::services::database::{ListFilter, ObjectStore};

const DEFAULT_LIST_LIMIT: i64 = 25;
const MAX_LIST_LIMIT: i64 = 100;
const DEFAULT_SEARCH_LIMIT: i64 = 25;
const MIN_SEARCH_LEN: usize = 2;
const DEFAULT_TRAVERSAL_DEPTH: u32 = 1;
const DEFAULT_TRAVERSAL_LIMIT: usize = 50;

/// Relationship vocabulary offered to clients when forging edges.
pub const RELATIONSHIP_LABELS: [&str; 12] = [
    "Allocated",
    "Compressed From",
    "Connected To",
    "Contains",
    "Created",
    "Downloaded From",
    "Dropped",
    "Registered",
    "Related To",
    "Resolved To",
    "Sent To",
    "Sub-domain Of",
];

/// Everything a request needs to execute: the admission governor plus the
/// injected store, cache, and invalidation collaborators.
#[derive(Clone)]
pub struct QueryEngine {
    pub store: Arc<dyn ObjectStore>,
    pub cache: CacheClient,
    pub invalidator: Invalidator,
    pub governor: CostGovernor,
    pub bounds: TraversalBounds,
}

impl QueryEngine {
    /// Execute a structured query document for one principal. Admission
    /// failures reject the whole request; individual field failures land
    /// in the response's `errors` array while other fields still resolve.
    pub async fn execute(
        &self,
        ctx: &AuthContext,
        doc: &QueryDocument,
    ) -> Result<QueryResponse, AppError> {
        self.governor.admit(doc)?;

        let mut response = QueryResponse::default();
        for operation in &doc.operations {
            for field in flatten_root(&operation.selections, doc) {
                let key = field.response_key().to_string();
                match self.resolve_field(ctx, operation.kind, field).await {
                    Ok(value) => {
                        response.data.insert(key, value);
                    }
                    Err(err) => {
                        response.data.insert(key.clone(), Value::Null);
                        response.errors.push(FieldError {
                            field: key,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
        Ok(response)
    }

    async fn resolve_field(
        &self,
        ctx: &AuthContext,
        kind: OperationKind,
        field: &FieldNode,
    ) -> Result<Value, AppError> {
        match (kind, field.name.as_str()) {
            (OperationKind::Query, "health") => Ok(json!(format!(
                "intelgraph API v{}",
                env!("CARGO_PKG_VERSION")
            ))),
            (OperationKind::Query, "me") => self.resolve_me(ctx),
            (OperationKind::Query, "has_permission") => self.resolve_has_permission(ctx, field),
            (OperationKind::Query, "tlo_types") => Ok(json!(TloType::ALL
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>())),
            (OperationKind::Query, "relationship_labels") => {
                require_authenticated(ctx)?;
                Ok(json!(RELATIONSHIP_LABELS))
            }
            (OperationKind::Query, "status_values") => {
                self.resolve_status_values(ctx, field).await
            }
            (OperationKind::Query, "object") => self.resolve_object(ctx, field).await,
            (OperationKind::Query, "objects") => self.resolve_objects(ctx, field).await,
            (OperationKind::Query, "objects_count") => self.resolve_objects_count(ctx, field).await,
            (OperationKind::Query, "search") => self.resolve_search(ctx, field).await,
            (OperationKind::Query, "related") => self.resolve_related(ctx, field).await,
            (OperationKind::Mutation, "add_relationship") => {
                self.mutate_relationship(ctx, field, true).await
            }
            (OperationKind::Mutation, "remove_relationship") => {
                self.mutate_relationship(ctx, field, false).await
            }
            (OperationKind::Mutation, "update_status") => self.mutate_status(ctx, field).await,
            (OperationKind::Mutation, "delete_object") => self.mutate_delete(ctx, field).await,
            (_, name) => Err(AppError::InvalidQuery(format!(
                "unknown {} field: {}",
                match kind {
                    OperationKind::Query => "query",
                    OperationKind::Mutation => "mutation",
                },
                name
            ))),
        }
    }

    fn resolve_me(&self, ctx: &AuthContext) -> Result<Value, AppError> {
        require_authenticated(ctx)?;
        let view = PrincipalView::from_context(ctx).ok_or_else(|| {
            AppError::Unauthenticated(anyhow::anyhow!("authentication required"))
        })?;
        to_value(view)
    }

    fn resolve_has_permission(
        &self,
        ctx: &AuthContext,
        field: &FieldNode,
    ) -> Result<Value, AppError> {
        require_authenticated(ctx)?;
        let capability = require_arg_str(field, "capability")?;
        Ok(json!(has_permission(ctx, capability)))
    }

    /// Distinct status values in use for a type, under the caller's
    /// visibility predicate.
    async fn resolve_status_values(
        &self,
        ctx: &AuthContext,
        field: &FieldNode,
    ) -> Result<Value, AppError> {
        let tlo = type_arg(field)?;
        require_permission(ctx, &read_capability(tlo))?;

        let predicate = source_filter(ctx, None);
        match self.store.distinct(tlo, "status", &predicate).await {
            Ok(values) => Ok(json!(values)),
            Err(e) => {
                tracing::error!(tlo_type = tlo.as_str(), error = %e, "Error listing status values");
                Ok(json!([]))
            }
        }
    }

    async fn resolve_object(&self, ctx: &AuthContext, field: &FieldNode) -> Result<Value, AppError> {
        let tlo = type_arg(field)?;
        require_permission(ctx, &read_capability(tlo))?;
        let id = require_arg_str(field, "id")?;

        let prefix = format!("{}:{}", tlo.cache_prefix(), id);
        let key = self.cache.key(&prefix, None, ctx);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let predicate = source_filter(ctx, None);
        let value = match self.store.fetch_visible(tlo, id, &predicate).await {
            Ok(Some(obj)) => to_value(ThreatObjectView::from_object(&obj, tlo))?,
            // Missing and invisible are indistinguishable on purpose.
            Ok(None) => Value::Null,
            Err(e) => {
                tracing::error!(tlo_type = tlo.as_str(), id = %id, error = %e, "Error fetching object");
                return Ok(Value::Null);
            }
        };

        if !value.is_null() {
            self.cache.set(&key, &value, None).await;
        }
        Ok(value)
    }

    async fn resolve_objects(&self, ctx: &AuthContext, field: &FieldNode) -> Result<Value, AppError> {
        let tlo = type_arg(field)?;
        require_permission(ctx, &read_capability(tlo))?;

        let filter = list_filter_args(field);
        let args = json!({
            "type": tlo.as_str(),
            "limit": filter.limit,
            "offset": filter.offset,
            "status": filter.status,
            "campaign": filter.campaign,
            "value_contains": filter.value_contains,
        });
        let prefix = format!("{}_list", tlo.cache_prefix());
        let key = self.cache.key(&prefix, Some(&args), ctx);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let predicate = source_filter(ctx, None);
        match self.store.find(tlo, &filter, &predicate).await {
            Ok(objects) => {
                let views: Vec<Value> = objects
                    .iter()
                    .map(|obj| to_value(ThreatObjectView::from_object(obj, tlo)))
                    .collect::<Result<_, _>>()?;
                let value = Value::Array(views);
                self.cache.set(&key, &value, None).await;
                Ok(value)
            }
            Err(e) => {
                // Storage failure degrades to an empty page, never a 500.
                tracing::error!(tlo_type = tlo.as_str(), error = %e, "Error listing objects");
                Ok(json!([]))
            }
        }
    }

    async fn resolve_objects_count(
        &self,
        ctx: &AuthContext,
        field: &FieldNode,
    ) -> Result<Value, AppError> {
        let tlo = type_arg(field)?;
        require_permission(ctx, &read_capability(tlo))?;

        let mut filter = list_filter_args(field);
        filter.limit = 0;
        filter.offset = 0;
        let args = json!({
            "op": "count",
            "type": tlo.as_str(),
            "status": filter.status,
            "campaign": filter.campaign,
            "value_contains": filter.value_contains,
        });
        // Counts are list-shaped views; the `_list` prefix keeps them
        // covered by object-level invalidation.
        let prefix = format!("{}_list", tlo.cache_prefix());
        let key = self.cache.key(&prefix, Some(&args), ctx);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let predicate = source_filter(ctx, None);
        match self.store.count(tlo, &filter, &predicate).await {
            Ok(count) => {
                let value = json!(count);
                self.cache.set(&key, &value, None).await;
                Ok(value)
            }
            Err(e) => {
                tracing::error!(tlo_type = tlo.as_str(), error = %e, "Error counting objects");
                Ok(json!(0))
            }
        }
    }

    async fn resolve_search(&self, ctx: &AuthContext, field: &FieldNode) -> Result<Value, AppError> {
        require_authenticated(ctx)?;

        let query = require_arg_str(field, "query")?;
        if query.len() < MIN_SEARCH_LEN {
            return Ok(json!([]));
        }
        let limit = field
            .arg_i64("limit")
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        let requested: Vec<TloType> = match field.arg_str_list("types") {
            Some(names) => names
                .iter()
                .filter_map(|name| name.parse::<TloType>().ok())
                .collect(),
            None => TloType::ALL.to_vec(),
        };
        if requested.is_empty() {
            return Ok(json!([]));
        }

        let args = json!({
            "query": query,
            "types": requested.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "limit": limit,
        });
        let key = self.cache.key("search_list", Some(&args), ctx);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let per_type_limit = (limit / requested.len() as i64).max(5);
        let predicate = source_filter(ctx, None);
        let mut results: Vec<SearchResultView> = Vec::new();

        for tlo in &requested {
            let filter = ListFilter {
                value_contains: Some(query.to_string()),
                limit: per_type_limit,
                ..Default::default()
            };
            match self.store.find(*tlo, &filter, &predicate).await {
                Ok(objects) => {
                    for obj in objects {
                        results.push(SearchResultView {
                            id: obj.id.to_hex(),
                            tlo_type: tlo.as_str().to_string(),
                            display_value: obj.display_value(*tlo),
                            modified: obj
                                .modified
                                .map(|d| d.try_to_rfc3339_string().unwrap_or_default()),
                            status: obj.status.clone(),
                        });
                    }
                }
                Err(e) => {
                    tracing::error!(tlo_type = tlo.as_str(), error = %e, "Error searching type");
                }
            }
        }

        let value = to_value(results)?;
        self.cache.set(&key, &value, None).await;
        Ok(value)
    }

    async fn resolve_related(&self, ctx: &AuthContext, field: &FieldNode) -> Result<Value, AppError> {
        require_authenticated(ctx)?;

        let Ok(tlo) = require_arg_str(field, "type")?.parse::<TloType>() else {
            return Ok(json!([]));
        };
        let id = require_arg_str(field, "id")?;
        let depth = field
            .arg_i64("depth")
            .unwrap_or(DEFAULT_TRAVERSAL_DEPTH as i64)
            .max(0) as u32;
        let total_limit = field
            .arg_i64("total_limit")
            .unwrap_or(DEFAULT_TRAVERSAL_LIMIT as i64)
            .max(0) as usize;

        let walker = GraphWalker::new(self.store.as_ref(), self.bounds);
        let related = walker
            .related_objects(ctx, tlo, id, depth, total_limit)
            .await?;
        to_value(related)
    }

    /// Forge (or remove) the reciprocal edge pair between two objects.
    async fn mutate_relationship(
        &self,
        ctx: &AuthContext,
        field: &FieldNode,
        forge: bool,
    ) -> Result<Value, AppError> {
        require_authenticated(ctx)?;

        let left_type = match require_arg_str(field, "left_type")?.parse::<TloType>() {
            Ok(t) => t,
            Err(e) => return to_value(MutationOutcome::failed(e)),
        };
        let right_type = match require_arg_str(field, "right_type")?.parse::<TloType>() {
            Ok(t) => t,
            Err(e) => return to_value(MutationOutcome::failed(e)),
        };
        let left_id = require_arg_str(field, "left_id")?;
        let right_id = require_arg_str(field, "right_id")?;
        let label = field.arg_str("label").unwrap_or("Related To").to_string();

        // One generic failure message for missing and non-writable alike,
        // so a mutation cannot be used to probe for hidden objects.
        let denied = "object not found or not writable";
        for (tlo, id) in [(left_type, left_id), (right_type, right_id)] {
            match self.store.fetch(tlo, id).await? {
                Some(obj) if can_access(ctx, &obj, true) => {}
                _ => return to_value(MutationOutcome::failed(denied)),
            }
        }

        let outcome = if forge {
            let analyst = ctx.username().map(str::to_string);
            let confidence = field.arg_str("confidence").map(str::to_string);
            let reason = field.arg_str("reason").map(str::to_string);
            let now = bson::DateTime::now();

            let forward = Relationship {
                label: label.clone(),
                target_type: right_type.as_str().to_string(),
                target_id: right_id.to_string(),
                confidence: confidence.clone(),
                reason: reason.clone(),
                analyst: analyst.clone(),
                date: Some(now),
            };
            let backward = Relationship {
                label: label.clone(),
                target_type: left_type.as_str().to_string(),
                target_id: left_id.to_string(),
                confidence,
                reason,
                analyst,
                date: Some(now),
            };

            self.store
                .push_relationship(left_type, left_id, &forward)
                .await?;
            self.store
                .push_relationship(right_type, right_id, &backward)
                .await?;
            MutationOutcome::ok("relationship created")
        } else {
            self.store
                .pull_relationship(left_type, left_id, right_type.as_str(), right_id, &label)
                .await?;
            self.store
                .pull_relationship(right_type, right_id, left_type.as_str(), left_id, &label)
                .await?;
            MutationOutcome::ok("relationship removed")
        };

        self.invalidator
            .types(&[left_type.cache_prefix(), right_type.cache_prefix()])
            .await;

        to_value(outcome)
    }

    async fn mutate_status(&self, ctx: &AuthContext, field: &FieldNode) -> Result<Value, AppError> {
        let tlo = type_arg(field)?;
        require_permission(ctx, &write_capability(tlo))?;
        let id = require_arg_str(field, "id")?;
        let status = require_arg_str(field, "status")?;
        if status.is_empty() {
            return to_value(MutationOutcome::failed("status must not be empty"));
        }

        match self.store.fetch(tlo, id).await? {
            Some(obj) if can_access(ctx, &obj, true) => {}
            _ => return to_value(MutationOutcome::failed("object not found or not writable")),
        }

        self.store.set_status(tlo, id, status).await?;
        self.invalidator.object(tlo.cache_prefix(), id).await;
        to_value(MutationOutcome::ok("status updated"))
    }

    async fn mutate_delete(&self, ctx: &AuthContext, field: &FieldNode) -> Result<Value, AppError> {
        let tlo = type_arg(field)?;
        require_permission(ctx, &delete_capability(tlo))?;
        let id = require_arg_str(field, "id")?;

        match self.store.fetch(tlo, id).await? {
            Some(obj) if can_access(ctx, &obj, true) => {}
            _ => return to_value(MutationOutcome::failed("object not found or not writable")),
        }

        self.store.delete(tlo, id).await?;
        self.invalidator.object(tlo.cache_prefix(), id).await;
        to_value(MutationOutcome::ok("object deleted"))
    }
}

/// Expand root-level fragment spreads and inline groups into the flat
/// list of executable top-level fields. Admission has already bounded the
/// document, including fragment cycles.
fn flatten_root<'a>(selections: &'a [Selection], doc: &'a QueryDocument) -> Vec<&'a FieldNode> {
    let mut fields = Vec::new();
    let mut stack: Vec<&str> = Vec::new();
    collect_root_fields(selections, doc, &mut stack, &mut fields);
    fields
}

fn collect_root_fields<'a>(
    selections: &'a [Selection],
    doc: &'a QueryDocument,
    stack: &mut Vec<&'a str>,
    out: &mut Vec<&'a FieldNode>,
) {
    for selection in selections {
        match selection {
            Selection::Field(field) => out.push(field),
            Selection::Inline { selections } => collect_root_fields(selections, doc, stack, out),
            Selection::Fragment { name } => {
                if stack.contains(&name.as_str()) {
                    continue;
                }
                if let Some(fragment) = doc.fragments.iter().find(|f| &f.name == name) {
                    stack.push(name);
                    collect_root_fields(&fragment.selections, doc, stack, out);
                    stack.pop();
                }
            }
        }
    }
}

fn type_arg(field: &FieldNode) -> Result<TloType, AppError> {
    require_arg_str(field, "type")?
        .parse::<TloType>()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))
}

fn require_arg_str<'a>(field: &'a FieldNode, key: &str) -> Result<&'a str, AppError> {
    field
        .arg_str(key)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("missing '{}' argument", key)))
}

fn list_filter_args(field: &FieldNode) -> ListFilter {
    ListFilter {
        status: field.arg_str("status").map(str::to_string),
        campaign: field.arg_str("campaign").map(str::to_string),
        value_contains: field.arg_str("value_contains").map(str::to_string),
        limit: field
            .arg_i64("limit")
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT),
        offset: field.arg_i64("offset").unwrap_or(0).max(0) as u64,
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("response encoding: {}", e)))
}
