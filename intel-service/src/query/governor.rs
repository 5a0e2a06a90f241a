//! Static admission control over query shapes.
//!
//! Both checks walk the request shape only, never data: cost estimation
//! (field = 1 + child cost x limit multiplier) and nesting depth. They run
//! to completion before any resolver executes; a rejected request does no
//! downstream work at all.

use service_core::error::AppError;
use std::collections::HashMap;

use super::shape::{FragmentDef, QueryDocument, Selection};

#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub max_cost: u64,
    pub max_depth: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_cost: 100,
            max_depth: 10,
        }
    }
}

/// Outcome of a successful admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub cost: u64,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CostGovernor {
    limits: QueryLimits,
}

impl CostGovernor {
    pub fn new(limits: QueryLimits) -> Self {
        Self { limits }
    }

    /// Admit or reject a query shape. Rejection reasons, in the order they
    /// are detected: cyclic fragment reference (`InvalidQuery`), cost
    /// ceiling (`CostExceeded`), depth ceiling (`DepthExceeded`).
    pub fn admit(&self, doc: &QueryDocument) -> Result<Admission, AppError> {
        let fragments: HashMap<&str, &FragmentDef> = doc
            .fragments
            .iter()
            .map(|f| (f.name.as_str(), f))
            .collect();

        let mut cost: u64 = 0;
        let mut depth: u32 = 0;
        for operation in &doc.operations {
            let mut stack = Vec::new();
            cost = cost.saturating_add(selection_set_cost(
                &operation.selections,
                &fragments,
                &mut stack,
            )?);
            depth = depth.max(selection_set_depth(
                &operation.selections,
                &fragments,
                &mut stack,
            )?);
        }

        if cost > self.limits.max_cost {
            return Err(AppError::CostExceeded {
                cost,
                limit: self.limits.max_cost,
            });
        }
        if depth > self.limits.max_depth {
            return Err(AppError::DepthExceeded {
                depth,
                limit: self.limits.max_depth,
            });
        }

        tracing::debug!(cost = cost, depth = depth, "Query admitted");
        Ok(Admission { cost, depth })
    }
}

fn enter_fragment<'a>(
    name: &'a str,
    fragments: &HashMap<&str, &'a FragmentDef>,
    stack: &mut Vec<&'a str>,
) -> Result<Option<&'a FragmentDef>, AppError> {
    if stack.contains(&name) {
        return Err(AppError::InvalidQuery(format!(
            "cyclic fragment reference: {}",
            name
        )));
    }
    // Unknown spreads contribute nothing, matching validation-free walking.
    Ok(fragments.get(name).copied())
}

fn selection_set_cost<'a>(
    selections: &'a [Selection],
    fragments: &HashMap<&str, &'a FragmentDef>,
    stack: &mut Vec<&'a str>,
) -> Result<u64, AppError> {
    let mut cost: u64 = 0;
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let child_cost = selection_set_cost(&field.selections, fragments, stack)?;
                cost = cost
                    .saturating_add(1)
                    .saturating_add(child_cost.saturating_mul(field.list_multiplier()));
            }
            Selection::Inline { selections } => {
                cost = cost.saturating_add(selection_set_cost(selections, fragments, stack)?);
            }
            Selection::Fragment { name } => {
                if let Some(fragment) = enter_fragment(name, fragments, stack)? {
                    stack.push(name);
                    let fragment_cost =
                        selection_set_cost(&fragment.selections, fragments, stack)?;
                    stack.pop();
                    cost = cost.saturating_add(fragment_cost);
                }
            }
        }
    }
    Ok(cost)
}

fn selection_set_depth<'a>(
    selections: &'a [Selection],
    fragments: &HashMap<&str, &'a FragmentDef>,
    stack: &mut Vec<&'a str>,
) -> Result<u32, AppError> {
    let mut depth: u32 = 0;
    for selection in selections {
        let d = match selection {
            Selection::Field(field) => {
                1 + selection_set_depth(&field.selections, fragments, stack)?
            }
            Selection::Inline { selections } => {
                selection_set_depth(selections, fragments, stack)?
            }
            Selection::Fragment { name } => match enter_fragment(name, fragments, stack)? {
                Some(fragment) => {
                    stack.push(name);
                    let fragment_depth =
                        selection_set_depth(&fragment.selections, fragments, stack)?;
                    stack.pop();
                    fragment_depth
                }
                None => 0,
            },
        };
        depth = depth.max(d);
    }
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> QueryDocument {
        serde_json::from_value(value).expect("valid query document")
    }

    fn governor(max_cost: u64, max_depth: u32) -> CostGovernor {
        CostGovernor::new(QueryLimits {
            max_cost,
            max_depth,
        })
    }

    #[test]
    fn leaf_fields_cost_one_each() {
        let d = doc(json!({
            "operations": [{ "selections": [
                { "kind": "field", "name": "a" },
                { "kind": "field", "name": "b" },
            ]}]
        }));
        let admission = governor(100, 10).admit(&d).unwrap();
        assert_eq!(admission.cost, 2);
        assert_eq!(admission.depth, 1);
    }

    #[test]
    fn limit_argument_multiplies_child_cost() {
        // One wrapping field with first: 50 over two leaves: 1 + 50*2 = 101.
        let d = doc(json!({
            "operations": [{ "selections": [{
                "kind": "field",
                "name": "objects",
                "args": { "first": 50 },
                "selections": [
                    { "kind": "field", "name": "id" },
                    { "kind": "field", "name": "display_value" },
                ]
            }]}]
        }));
        let admission = governor(200, 10).admit(&d).unwrap();
        assert_eq!(admission.cost, 101);

        assert!(matches!(
            governor(100, 10).admit(&d),
            Err(AppError::CostExceeded { cost: 101, limit: 100 })
        ));
    }

    #[test]
    fn fragment_spread_costs_its_definition() {
        let d = doc(json!({
            "operations": [{ "selections": [{
                "kind": "field",
                "name": "object",
                "selections": [{ "kind": "fragment", "name": "summary" }]
            }]}],
            "fragments": [{
                "name": "summary",
                "selections": [
                    { "kind": "field", "name": "id" },
                    { "kind": "field", "name": "status" },
                ]
            }]
        }));
        // object (1) + fragment body (2), no multiplier.
        assert_eq!(governor(100, 10).admit(&d).unwrap().cost, 3);
    }

    #[test]
    fn unknown_fragment_costs_nothing() {
        let d = doc(json!({
            "operations": [{ "selections": [
                { "kind": "field", "name": "a" },
                { "kind": "fragment", "name": "missing" },
            ]}]
        }));
        assert_eq!(governor(100, 10).admit(&d).unwrap().cost, 1);
    }

    #[test]
    fn cyclic_fragments_are_rejected() {
        let d = doc(json!({
            "operations": [{ "selections": [{ "kind": "fragment", "name": "a" }]}],
            "fragments": [
                { "name": "a", "selections": [{ "kind": "fragment", "name": "b" }] },
                { "name": "b", "selections": [{ "kind": "fragment", "name": "a" }] },
            ]
        }));
        assert!(matches!(
            governor(100, 10).admit(&d),
            Err(AppError::InvalidQuery(_))
        ));
    }

    #[test]
    fn depth_at_limit_admitted_one_deeper_rejected() {
        let at_limit = doc(json!({
            "operations": [{ "selections": [{
                "kind": "field", "name": "a", "selections": [{
                    "kind": "field", "name": "b", "selections": [{
                        "kind": "field", "name": "c"
                    }]
                }]
            }]}]
        }));
        assert!(governor(100, 3).admit(&at_limit).is_ok());

        let too_deep = doc(json!({
            "operations": [{ "selections": [{
                "kind": "field", "name": "a", "selections": [{
                    "kind": "field", "name": "b", "selections": [{
                        "kind": "field", "name": "c", "selections": [{
                            "kind": "field", "name": "d"
                        }]
                    }]
                }]
            }]}]
        }));
        assert!(matches!(
            governor(100, 3).admit(&too_deep),
            Err(AppError::DepthExceeded { depth: 4, limit: 3 })
        ));
    }

    #[test]
    fn inline_groups_add_no_depth() {
        let d = doc(json!({
            "operations": [{ "selections": [{
                "kind": "inline",
                "selections": [{ "kind": "field", "name": "a" }]
            }]}]
        }));
        let admission = governor(100, 10).admit(&d).unwrap();
        assert_eq!(admission.cost, 1);
        assert_eq!(admission.depth, 1);
    }

    #[test]
    fn cost_sums_across_operations() {
        let d = doc(json!({
            "operations": [
                { "selections": [{ "kind": "field", "name": "a" }] },
                { "selections": [{ "kind": "field", "name": "b" }] },
            ]
        }));
        assert_eq!(governor(100, 10).admit(&d).unwrap().cost, 2);
    }
}
