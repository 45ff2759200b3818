//! Hierarchical service scopes.
//!
//! # Responsibility
//! - Hold keyed and tagged component registrations for one level of the
//!   root → runtime → work hierarchy.
//! - Activate components lazily according to their lifetime.
//!
//! # Invariants
//! - A scope is immutable once `ScopeBuilder::finish` returns; only child
//!   scopes are created afterwards.
//! - Lookup walks the parent chain; the nearest registration wins.
//! - Singletons initialize at most once per registration (single-flight).
//! - Re-entrant activation of one registration on one thread is reported as
//!   `ScopeError::Cycle` instead of deadlocking.
//! - A released scope refuses resolution.
//!
//! Factories receive a scope handle for resolving their own dependencies.
//! They must not keep it: a component holding its scope keeps the scope alive.

use log::debug;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub type ScopeResult<T> = Result<T, ScopeError>;

/// Type-erased component instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub type ServiceFactory = Arc<dyn Fn(&ServiceScope) -> ScopeResult<Instance> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// One instance per registration, created on first resolution.
    Singleton,
    /// One instance per resolving scope.
    Scoped,
    /// A new instance on every resolution.
    Transient,
}

/// One component bound into a scope.
pub struct Registration {
    identity: String,
    lifetime: Lifetime,
    factory: ServiceFactory,
    singleton: OnceCell<Instance>,
}

impl Registration {
    pub fn new(identity: &str, lifetime: Lifetime, factory: ServiceFactory) -> Self {
        Self {
            identity: identity.to_string(),
            lifetime,
            factory,
            singleton: OnceCell::new(),
        }
    }

    /// Singleton registration that is already initialized.
    pub fn instance(identity: &str, value: Instance) -> Self {
        let registration = Self::new(
            identity,
            Lifetime::Singleton,
            Arc::new(|_: &ServiceScope| -> ScopeResult<Instance> {
                Err(ScopeError::Activation {
                    identity: String::new(),
                    message: "pre-built instance has no factory".to_string(),
                })
            }),
        );
        let _ = registration.singleton.set(value);
        registration
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn is_activated(&self) -> bool {
        self.singleton.get().is_some()
    }

    fn slot(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as *const () as usize
    }
}

thread_local! {
    static ACTIVATING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks one registration as activating on this thread until dropped.
struct ActivationGuard {
    slot: usize,
}

impl ActivationGuard {
    fn enter(registration: &Arc<Registration>) -> ScopeResult<Self> {
        let slot = registration.slot();
        let entered = ACTIVATING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&slot) {
                return false;
            }
            stack.push(slot);
            true
        });
        if entered {
            Ok(Self { slot })
        } else {
            Err(ScopeError::Cycle(registration.identity.clone()))
        }
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        let _ = ACTIVATING.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|slot| *slot == self.slot) {
                stack.remove(pos);
            }
        });
    }
}

struct ScopeInner {
    id: Uuid,
    label: String,
    parent: Option<Arc<ScopeInner>>,
    registrations: HashMap<String, Arc<Registration>>,
    tagged: BTreeMap<String, Vec<Arc<Registration>>>,
    scoped: Mutex<HashMap<usize, Arc<OnceCell<Instance>>>>,
    released: AtomicBool,
}

impl ScopeInner {
    fn ancestry(self: &Arc<Self>) -> Vec<Arc<ScopeInner>> {
        let mut chain = vec![Arc::clone(self)];
        let mut cursor = self.parent.clone();
        while let Some(scope) = cursor {
            cursor = scope.parent.clone();
            chain.push(scope);
        }
        chain
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        debug!(
            "event=scope_drop module=runtime status=ok scope={} label={} registrations={}",
            self.id,
            self.label,
            self.registrations.len()
        );
    }
}

/// Handle to one finished scope. Cloning shares the scope.
#[derive(Clone)]
pub struct ServiceScope {
    inner: Arc<ScopeInner>,
}

impl ServiceScope {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Starts a child scope whose lookups fall back to this one.
    pub fn child(&self, label: &str) -> ScopeBuilder {
        ScopeBuilder::with_parent(label, Some(Arc::clone(&self.inner)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .ancestry()
            .iter()
            .any(|scope| scope.registrations.contains_key(key))
    }

    pub fn resolve<T: Any + Send + Sync>(&self, key: &str) -> ScopeResult<Arc<T>> {
        let instance = self.resolve_instance(key)?;
        instance
            .downcast::<T>()
            .map_err(|_| ScopeError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn resolve_instance(&self, key: &str) -> ScopeResult<Instance> {
        self.ensure_live()?;
        let (owner, registration) = self
            .inner
            .ancestry()
            .into_iter()
            .find_map(|scope| {
                let registration = scope.registrations.get(key).cloned()?;
                Some((scope, registration))
            })
            .ok_or_else(|| ScopeError::NotRegistered(key.to_string()))?;
        self.activate(&owner, &registration)
    }

    /// Resolves every registration filed under `tag`, ancestors first.
    pub fn resolve_all<T: Any + Send + Sync>(&self, tag: &str) -> ScopeResult<Vec<Arc<T>>> {
        self.ensure_live()?;
        let mut chain = self.inner.ancestry();
        chain.reverse();

        let mut out = Vec::new();
        for scope in chain {
            let Some(registrations) = scope.tagged.get(tag) else {
                continue;
            };
            for registration in registrations {
                let instance = self.activate(&scope, registration)?;
                let typed = instance
                    .downcast::<T>()
                    .map_err(|_| ScopeError::TypeMismatch {
                        key: registration.identity.clone(),
                        expected: type_name::<T>(),
                    })?;
                out.push(typed);
            }
        }
        Ok(out)
    }

    /// Marks the scope released and drops its scoped instances.
    ///
    /// Returns `false` when it was already released.
    pub fn release(&self) -> bool {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let dropped = std::mem::take(&mut *self.inner.scoped.lock());
        debug!(
            "event=scope_release module=runtime status=ok scope={} label={} scoped_instances={}",
            self.inner.id,
            self.inner.label,
            dropped.len()
        );
        true
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> ScopeResult<()> {
        if self.is_released() {
            return Err(ScopeError::Released(self.inner.label.clone()));
        }
        Ok(())
    }

    fn activate(
        &self,
        owner: &Arc<ScopeInner>,
        registration: &Arc<Registration>,
    ) -> ScopeResult<Instance> {
        match registration.lifetime {
            Lifetime::Singleton => {
                if let Some(instance) = registration.singleton.get() {
                    return Ok(Arc::clone(instance));
                }
                let _guard = ActivationGuard::enter(registration)?;
                let owner = ServiceScope {
                    inner: Arc::clone(owner),
                };
                registration
                    .singleton
                    .get_or_try_init(|| (registration.factory)(&owner))
                    .map(Arc::clone)
            }
            Lifetime::Scoped => {
                let cell = {
                    let mut scoped = self.inner.scoped.lock();
                    Arc::clone(scoped.entry(registration.slot()).or_default())
                };
                if let Some(instance) = cell.get() {
                    return Ok(Arc::clone(instance));
                }
                let _guard = ActivationGuard::enter(registration)?;
                cell.get_or_try_init(|| (registration.factory)(self))
                    .map(Arc::clone)
            }
            Lifetime::Transient => {
                let _guard = ActivationGuard::enter(registration)?;
                (registration.factory)(self)
            }
        }
    }
}

/// Collects registrations for one scope. Consumed by `finish`.
pub struct ScopeBuilder {
    label: String,
    parent: Option<Arc<ScopeInner>>,
    registrations: HashMap<String, Arc<Registration>>,
    tagged: BTreeMap<String, Vec<Arc<Registration>>>,
}

impl ScopeBuilder {
    /// Starts the process-wide root scope.
    pub fn root(label: &str) -> Self {
        Self::with_parent(label, None)
    }

    fn with_parent(label: &str, parent: Option<Arc<ScopeInner>>) -> Self {
        Self {
            label: label.to_string(),
            parent,
            registrations: HashMap::new(),
            tagged: BTreeMap::new(),
        }
    }

    /// Binds `registration` under every key in `keys`.
    pub fn register(&mut self, registration: Arc<Registration>, keys: &[&str]) -> ScopeResult<()> {
        for key in keys {
            if self.registrations.contains_key(*key) {
                return Err(ScopeError::DuplicateKey(key.to_string()));
            }
        }
        for key in keys {
            self.registrations
                .insert(key.to_string(), Arc::clone(&registration));
        }
        Ok(())
    }

    pub fn register_instance<T: Any + Send + Sync>(
        &mut self,
        key: &str,
        value: Arc<T>,
    ) -> ScopeResult<Arc<Registration>> {
        let registration = Arc::new(Registration::instance(key, value));
        self.register(Arc::clone(&registration), &[key])?;
        Ok(registration)
    }

    pub fn register_factory<T, F>(
        &mut self,
        key: &str,
        lifetime: Lifetime,
        factory: F,
    ) -> ScopeResult<Arc<Registration>>
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceScope) -> ScopeResult<T> + Send + Sync + 'static,
    {
        let factory: ServiceFactory =
            Arc::new(move |scope: &ServiceScope| Ok(Arc::new(factory(scope)?) as Instance));
        let registration = Arc::new(Registration::new(key, lifetime, factory));
        self.register(Arc::clone(&registration), &[key])?;
        Ok(registration)
    }

    /// Files an already-registered component under `tag`.
    pub fn tag(&mut self, tag: &str, registration: &Arc<Registration>) {
        let entries = self.tagged.entry(tag.to_string()).or_default();
        if !entries.iter().any(|entry| Arc::ptr_eq(entry, registration)) {
            entries.push(Arc::clone(registration));
        }
    }

    pub fn finish(self) -> ServiceScope {
        let inner = Arc::new(ScopeInner {
            id: Uuid::new_v4(),
            label: self.label,
            parent: self.parent,
            registrations: self.registrations,
            tagged: self.tagged,
            scoped: Mutex::new(HashMap::new()),
            released: AtomicBool::new(false),
        });
        debug!(
            "event=scope_open module=runtime status=ok scope={} label={} registrations={}",
            inner.id,
            inner.label,
            inner.registrations.len()
        );
        ServiceScope { inner }
    }
}

/// Resolution failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    NotRegistered(String),
    DuplicateKey(String),
    TypeMismatch { key: String, expected: &'static str },
    Released(String),
    Cycle(String),
    Activation { identity: String, message: String },
}

impl ScopeError {
    pub fn activation(identity: &str, message: impl Into<String>) -> Self {
        Self::Activation {
            identity: identity.to_string(),
            message: message.into(),
        }
    }
}

impl Display for ScopeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRegistered(key) => write!(f, "no component registered for `{key}`"),
            Self::DuplicateKey(key) => write!(f, "component key registered twice: `{key}`"),
            Self::TypeMismatch { key, expected } => {
                write!(f, "component `{key}` is not a `{expected}`")
            }
            Self::Released(label) => write!(f, "scope `{label}` has been released"),
            Self::Cycle(identity) => {
                write!(f, "component `{identity}` depends on itself while activating")
            }
            Self::Activation { identity, message } => {
                write!(f, "failed to activate `{identity}`: {message}")
            }
        }
    }
}

impl Error for ScopeError {}
