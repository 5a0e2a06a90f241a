pub mod walker;

pub use walker::{GraphWalker, RelatedObject, TraversalBounds};
