//! Named state values and the providers that produce them.
//!
//! Providers are consulted in order; the first one returning a producer wins.
//! Producers run with the locks of the work scope released, so they may read
//! other state values.

use crate::model::tenant::TenantRecord;
use crate::work::scope::WorkScope;
use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

/// Type-erased state value.
pub type StateValue = Arc<dyn Any + Send + Sync>;

pub type StateProducer = Box<dyn FnOnce(&WorkScope) -> StateValue + Send>;

/// Built-in state name: tenant name (`String`).
pub const STATE_TENANT_NAME: &str = "tenant.name";
/// Built-in state name: tenant record (`TenantRecord`).
pub const STATE_TENANT_RECORD: &str = "tenant.record";
/// Built-in state name: feature-set revision of the runtime (`u64`).
pub const STATE_TENANT_REVISION: &str = "tenant.revision";

/// What a caller asked for.
#[derive(Debug, Clone, Copy)]
pub struct StateRequest<'a> {
    name: &'a str,
    type_id: TypeId,
    type_name: &'static str,
}

impl<'a> StateRequest<'a> {
    pub fn new<T: Any>(name: &'a str) -> Self {
        Self {
            name,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

/// Ordered source of named state.
pub trait StateProvider: Send + Sync {
    fn try_provide(&self, request: &StateRequest<'_>) -> Option<StateProducer>;
}

/// Wraps a typed closure as a producer.
pub fn producer<T, F>(produce: F) -> StateProducer
where
    T: Any + Send + Sync,
    F: FnOnce(&WorkScope) -> T + Send + 'static,
{
    Box::new(move |scope: &WorkScope| Arc::new(produce(scope)) as StateValue)
}

/// Answers the tenant identity values every work scope carries.
///
/// Appended after the providers contributed by features.
pub struct TenantStateProvider;

impl StateProvider for TenantStateProvider {
    fn try_provide(&self, request: &StateRequest<'_>) -> Option<StateProducer> {
        match request.name() {
            STATE_TENANT_NAME if request.is::<String>() => {
                Some(producer(|scope: &WorkScope| scope.tenant().to_string()))
            }
            STATE_TENANT_RECORD if request.is::<TenantRecord>() => {
                Some(producer(|scope: &WorkScope| scope.record().clone()))
            }
            STATE_TENANT_REVISION if request.is::<u64>() => {
                Some(producer(|scope: &WorkScope| scope.revision()))
            }
            _ => None,
        }
    }
}
