//! Work scopes: one unit of work bound to one tenant runtime.

pub mod ambient;
pub mod scope;
pub mod state;

pub use ambient::{AmbientScopeStore, RequestScopeStore, ThreadScopeStore, WorkContextAccessor};
pub use scope::{WorkObserver, WorkResult, WorkScope, WorkScopeError};
pub use state::{producer, StateProducer, StateProvider, StateRequest, StateValue};
