pub mod executor;
pub mod governor;
pub mod shape;

pub use executor::QueryEngine;
pub use governor::{Admission, CostGovernor, QueryLimits};
pub use shape::{FieldNode, FragmentDef, Operation, OperationKind, QueryDocument, Selection};
