pub mod context;
pub mod permissions;
pub mod session;

pub use context::{AuthContext, Principal, ANON_SENTINEL, NO_SOURCES_SENTINEL};
pub use permissions::{can_access, has_permission, require_authenticated, require_permission, source_filter, SourcePredicate};
pub use session::SessionStore;
