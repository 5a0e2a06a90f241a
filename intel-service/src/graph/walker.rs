//! Bounded breadth-first traversal over embedded relationship edges.
//!
//! Every visited node is gated through `can_access`; an inaccessible node
//! contributes no result and no error, so its existence is never confirmed
//! or denied to the caller. The seen-set plus the depth and total-result
//! ceilings guarantee termination on cyclic graphs.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use crate::auth::context::AuthContext;
use crate::auth::permissions::{can_access, source_filter};
use crate::models::{Accessible, TloType};
use crate::services::database::ObjectStore;
use service_core::error::AppError;

const DEFAULT_RELATION_LABEL: &str = "Related To";

/// Server-side ceilings; caller-supplied values are clamped to these.
#[derive(Debug, Clone, Copy)]
pub struct TraversalBounds {
    pub max_depth: u32,
    pub max_total: usize,
}

impl Default for TraversalBounds {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_total: 200,
        }
    }
}

/// One object discovered by traversal, in discovery order.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedObject {
    pub id: String,
    pub tlo_type: String,
    pub display_value: String,
    pub relationship: String,
    pub depth: u32,
}

pub struct GraphWalker<'a> {
    store: &'a dyn ObjectStore,
    bounds: TraversalBounds,
}

impl<'a> GraphWalker<'a> {
    pub fn new(store: &'a dyn ObjectStore, bounds: TraversalBounds) -> Self {
        Self { store, bounds }
    }

    pub async fn related_objects(
        &self,
        ctx: &AuthContext,
        start_type: TloType,
        start_id: &str,
        depth: u32,
        total_limit: usize,
    ) -> Result<Vec<RelatedObject>, AppError> {
        let max_depth = depth.min(self.bounds.max_depth);
        let total_limit = total_limit.min(self.bounds.max_total);
        let predicate = source_filter(ctx, None);

        let mut results: Vec<RelatedObject> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        seen.insert((start_type.as_str().to_string(), start_id.to_string()));

        let mut queue: VecDeque<(TloType, String, u32)> = VecDeque::new();
        queue.push_back((start_type, start_id.to_string(), 0));

        while let Some((current_type, current_id, current_depth)) = queue.pop_front() {
            if results.len() >= total_limit {
                break;
            }
            if current_depth >= max_depth {
                continue;
            }

            let obj = match self.store.fetch(current_type, &current_id).await {
                Ok(Some(obj)) => obj,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(
                        tlo_type = current_type.as_str(),
                        id = %current_id,
                        error = %e,
                        "Error fetching node during traversal"
                    );
                    continue;
                }
            };

            // Inaccessible nodes stay in the seen-set but are never
            // expanded; silence here is the information-hiding policy.
            if !can_access(ctx, &obj, false) {
                continue;
            }

            for edge in obj.relationship_edges() {
                if edge.target_type.is_empty() || edge.target_id.is_empty() {
                    continue;
                }
                let key = (edge.target_type.clone(), edge.target_id.clone());
                if seen.contains(&key) {
                    continue;
                }
                seen.insert(key);

                let Ok(target_type) = edge.target_type.parse::<TloType>() else {
                    continue;
                };

                let display_value = match self
                    .store
                    .fetch_visible(target_type, &edge.target_id, &predicate)
                    .await
                {
                    Ok(Some(target)) => target.display_value(target_type),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::debug!(
                            tlo_type = %edge.target_type,
                            id = %edge.target_id,
                            error = %e,
                            "Could not resolve traversal target"
                        );
                        continue;
                    }
                };

                let label = if edge.label.is_empty() {
                    DEFAULT_RELATION_LABEL.to_string()
                } else {
                    edge.label.clone()
                };

                results.push(RelatedObject {
                    id: edge.target_id.clone(),
                    tlo_type: edge.target_type.clone(),
                    display_value,
                    relationship: label,
                    depth: current_depth + 1,
                });

                if results.len() >= total_limit {
                    break;
                }

                if current_depth + 1 < max_depth {
                    queue.push_back((target_type, edge.target_id.clone(), current_depth + 1));
                }
            }
        }

        Ok(results)
    }
}
