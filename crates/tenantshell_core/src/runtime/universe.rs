//! Process-wide table of component definitions.
//!
//! Manifests only name identities; this table supplies what each identity
//! is. A blueprint item whose identity is missing here fails the build.
//!
//! Trait-object components are stored as `Arc<dyn Trait>` values, so they
//! resolve as `Arc<Arc<dyn Trait>>`.

use crate::kernel::sweep::BackgroundTask;
use crate::runtime::scope::{Instance, Lifetime, Registration, ScopeResult, ServiceFactory, ServiceScope};
use crate::runtime::shell::ShellEvents;
use crate::work::scope::WorkObserver;
use crate::work::state::StateProvider;
use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Lifetime plus factory for one identity.
#[derive(Clone)]
pub struct ComponentDefinition {
    identity: String,
    lifetime: Lifetime,
    factory: ServiceFactory,
}

impl ComponentDefinition {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Fresh registration; singleton state is never shared across runtimes.
    pub fn instantiate(&self) -> Arc<Registration> {
        Arc::new(Registration::new(
            &self.identity,
            self.lifetime,
            Arc::clone(&self.factory),
        ))
    }
}

#[derive(Default, Clone)]
pub struct TypeUniverse {
    definitions: BTreeMap<String, ComponentDefinition>,
}

impl TypeUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(
        &mut self,
        identity: &str,
        lifetime: Lifetime,
        factory: F,
    ) -> Result<(), UniverseError>
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceScope) -> ScopeResult<T> + Send + Sync + 'static,
    {
        let factory: ServiceFactory =
            Arc::new(move |scope: &ServiceScope| Ok(Arc::new(factory(scope)?) as Instance));
        self.insert(identity, lifetime, factory)
    }

    /// Registers a state provider, resolvable as `Arc<dyn StateProvider>`.
    pub fn register_state_provider<P, F>(
        &mut self,
        identity: &str,
        factory: F,
    ) -> Result<(), UniverseError>
    where
        P: StateProvider + 'static,
        F: Fn(&ServiceScope) -> ScopeResult<P> + Send + Sync + 'static,
    {
        self.register(identity, Lifetime::Singleton, move |scope: &ServiceScope| {
            Ok(Arc::new(factory(scope)?) as Arc<dyn StateProvider>)
        })
    }

    pub fn register_work_observer<O, F>(
        &mut self,
        identity: &str,
        factory: F,
    ) -> Result<(), UniverseError>
    where
        O: WorkObserver + 'static,
        F: Fn(&ServiceScope) -> ScopeResult<O> + Send + Sync + 'static,
    {
        self.register(identity, Lifetime::Singleton, move |scope: &ServiceScope| {
            Ok(Arc::new(factory(scope)?) as Arc<dyn WorkObserver>)
        })
    }

    pub fn register_shell_events<H, F>(
        &mut self,
        identity: &str,
        factory: F,
    ) -> Result<(), UniverseError>
    where
        H: ShellEvents + 'static,
        F: Fn(&ServiceScope) -> ScopeResult<H> + Send + Sync + 'static,
    {
        self.register(identity, Lifetime::Singleton, move |scope: &ServiceScope| {
            Ok(Arc::new(factory(scope)?) as Arc<dyn ShellEvents>)
        })
    }

    pub fn register_background_task<B, F>(
        &mut self,
        identity: &str,
        factory: F,
    ) -> Result<(), UniverseError>
    where
        B: BackgroundTask + 'static,
        F: Fn(&ServiceScope) -> ScopeResult<B> + Send + Sync + 'static,
    {
        self.register(identity, Lifetime::Singleton, move |scope: &ServiceScope| {
            Ok(Arc::new(factory(scope)?) as Arc<dyn BackgroundTask>)
        })
    }

    pub fn get(&self, identity: &str) -> Option<&ComponentDefinition> {
        self.definitions.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.definitions.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn insert(
        &mut self,
        identity: &str,
        lifetime: Lifetime,
        factory: ServiceFactory,
    ) -> Result<(), UniverseError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(UniverseError::EmptyIdentity);
        }
        if self.definitions.contains_key(identity) {
            return Err(UniverseError::DuplicateIdentity(identity.to_string()));
        }
        self.definitions.insert(
            identity.to_string(),
            ComponentDefinition {
                identity: identity.to_string(),
                lifetime,
                factory,
            },
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniverseError {
    EmptyIdentity,
    DuplicateIdentity(String),
}

impl Display for UniverseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyIdentity => write!(f, "component identity must not be empty"),
            Self::DuplicateIdentity(value) => {
                write!(f, "component identity already registered: {value}")
            }
        }
    }
}

impl Error for UniverseError {}

#[cfg(test)]
mod tests {
    use super::{TypeUniverse, UniverseError};
    use crate::runtime::scope::Lifetime;

    #[test]
    fn rejects_duplicate_and_empty_identities() {
        let mut universe = TypeUniverse::new();
        universe
            .register("Clock", Lifetime::Singleton, |_| Ok(0_u64))
            .unwrap();
        assert_eq!(
            universe.register("Clock", Lifetime::Transient, |_| Ok(1_u64)),
            Err(UniverseError::DuplicateIdentity("Clock".to_string()))
        );
        assert_eq!(
            universe.register(" ", Lifetime::Transient, |_| Ok(1_u64)),
            Err(UniverseError::EmptyIdentity)
        );
    }

    #[test]
    fn instantiate_yields_independent_registrations() {
        let mut universe = TypeUniverse::new();
        universe
            .register("Clock", Lifetime::Singleton, |_| Ok(0_u64))
            .unwrap();
        let definition = universe.get("Clock").unwrap();
        let a = definition.instantiate();
        let b = definition.instantiate();
        assert!(!std::sync::Arc::ptr_eq(&a, &b));
        assert_eq!(a.lifetime(), Lifetime::Singleton);
    }
}
