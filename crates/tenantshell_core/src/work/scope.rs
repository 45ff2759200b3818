//! Per-unit-of-work scope over one tenant runtime.
//!
//! # Responsibility
//! - Own a child service scope of exactly one runtime for the duration of a
//!   unit of work.
//! - Resolve named state lazily through the ordered provider chain and
//!   memoize it.
//! - Tear down deterministically on `end` (or drop).
//!
//! # Invariants
//! - The runtime is pinned until the scope ends, even if it is retired.
//! - Within one scope a state value (name, type) is produced at most once
//!   unless overridden with `set_state`.
//! - Ending twice is a programmer error: panic in debug builds, logged
//!   `AlreadyEnded` in release builds.
//! - A scope serves one unit of work; it is not meant for concurrent use.

use crate::extension::capability::{TAG_STATE_PROVIDERS, TAG_WORK_OBSERVERS};
use crate::kernel::KernelError;
use crate::model::tenant::TenantRecord;
use crate::runtime::scope::{ScopeError, ServiceScope};
use crate::runtime::tenant_runtime::Runtime;
use crate::work::ambient::AmbientScopeStore;
use crate::work::state::{StateProvider, StateRequest, StateValue, TenantStateProvider};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub type WorkResult<T> = Result<T, WorkScopeError>;

/// Scope key of the work-scope id inside a work scope.
pub const WORK_SCOPE_ID_KEY: &str = "work.id";

/// Handlers filed under `work-observers`.
pub trait WorkObserver: Send + Sync {
    fn work_started(&self, _scope: &WorkScope) {}
    fn work_finished(&self, _scope: &WorkScope) {}
}

struct LiveScope {
    runtime: Arc<Runtime>,
    scope: ServiceScope,
}

type StateKey = (String, TypeId);

pub struct WorkScope {
    id: Uuid,
    record: TenantRecord,
    revision: u64,
    live: Mutex<Option<LiveScope>>,
    providers: Vec<Arc<dyn StateProvider>>,
    observers: Vec<Arc<dyn WorkObserver>>,
    state: Mutex<HashMap<StateKey, Option<StateValue>>>,
    attachments: Mutex<Vec<Arc<dyn AmbientScopeStore>>>,
    ended: AtomicBool,
}

impl WorkScope {
    /// Opens a work scope over `runtime` and fires `work_started`.
    pub fn open(runtime: Arc<Runtime>) -> WorkResult<Arc<Self>> {
        let id = Uuid::new_v4();
        let mut builder = runtime.scope().child(&format!("work:{id}"));
        builder.register_instance(WORK_SCOPE_ID_KEY, Arc::new(id))?;
        let scope = builder.finish();

        let mut providers: Vec<Arc<dyn StateProvider>> = scope
            .resolve_all::<Arc<dyn StateProvider>>(TAG_STATE_PROVIDERS)?
            .iter()
            .map(|provider| Arc::clone(provider.as_ref()))
            .collect();
        providers.push(Arc::new(TenantStateProvider));

        let observers: Vec<Arc<dyn WorkObserver>> = scope
            .resolve_all::<Arc<dyn WorkObserver>>(TAG_WORK_OBSERVERS)?
            .iter()
            .map(|observer| Arc::clone(observer.as_ref()))
            .collect();

        let work = Arc::new(Self {
            id,
            record: runtime.record().clone(),
            revision: runtime.revision(),
            live: Mutex::new(Some(LiveScope { runtime, scope })),
            providers,
            observers,
            state: Mutex::new(HashMap::new()),
            attachments: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        });

        for observer in &work.observers {
            observer.work_started(&work);
        }
        debug!(
            "event=work_begin module=work status=ok tenant={} work={} providers={} observers={}",
            work.tenant(),
            work.id,
            work.providers.len(),
            work.observers.len()
        );
        Ok(work)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant(&self) -> &str {
        self.record.name()
    }

    pub fn record(&self) -> &TenantRecord {
        &self.record
    }

    /// Feature-set revision of the runtime this scope was opened on.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn runtime(&self) -> WorkResult<Arc<Runtime>> {
        self.live
            .lock()
            .as_ref()
            .map(|live| Arc::clone(&live.runtime))
            .ok_or(WorkScopeError::Ended(self.id))
    }

    pub fn scope(&self) -> WorkResult<ServiceScope> {
        self.live
            .lock()
            .as_ref()
            .map(|live| live.scope.clone())
            .ok_or(WorkScopeError::Ended(self.id))
    }

    pub fn resolve<T: Any + Send + Sync>(&self, key: &str) -> WorkResult<Arc<T>> {
        Ok(self.scope()?.resolve::<T>(key)?)
    }

    /// Like `resolve`, but an unregistered key yields `None`.
    pub fn try_resolve<T: Any + Send + Sync>(&self, key: &str) -> WorkResult<Option<Arc<T>>> {
        match self.scope()?.resolve::<T>(key) {
            Ok(value) => Ok(Some(value)),
            Err(ScopeError::NotRegistered(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn resolve_all<T: Any + Send + Sync>(&self, tag: &str) -> WorkResult<Vec<Arc<T>>> {
        Ok(self.scope()?.resolve_all::<T>(tag)?)
    }

    /// Returns the memoized value of `name`, producing it on first use.
    ///
    /// When no provider answers, `T::default()` is returned and the miss is
    /// memoized too.
    pub fn get_state<T>(&self, name: &str) -> WorkResult<T>
    where
        T: Any + Send + Sync + Clone + Default,
    {
        self.ensure_open()?;
        let key = (name.to_string(), TypeId::of::<T>());
        if let Some(memo) = self.state.lock().get(&key) {
            return Ok(memo
                .as_ref()
                .and_then(|value| value.downcast_ref::<T>())
                .cloned()
                .unwrap_or_default());
        }

        let request = StateRequest::new::<T>(name);
        let produced = self
            .providers
            .iter()
            .find_map(|provider| provider.try_provide(&request))
            .map(|produce| produce(self));

        let produced = match produced {
            Some(value) if value.is::<T>() => Some(value),
            Some(_) => {
                warn!(
                    "event=state_produce module=work status=error work={} name={} expected={}",
                    self.id,
                    name,
                    type_name::<T>()
                );
                None
            }
            None => None,
        };

        let value = produced
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .unwrap_or_default();
        self.state.lock().insert(key, produced);
        Ok(value)
    }

    /// Installs or overrides the memoized value of `name`.
    pub fn set_state<T>(&self, name: &str, value: T) -> WorkResult<()>
    where
        T: Any + Send + Sync,
    {
        self.ensure_open()?;
        self.state.lock().insert(
            (name.to_string(), TypeId::of::<T>()),
            Some(Arc::new(value) as StateValue),
        );
        Ok(())
    }

    /// Ends the unit of work.
    ///
    /// # Panics
    /// In debug builds when called on a scope that already ended.
    pub fn end(&self) -> WorkResult<()> {
        if self.ended.swap(true, Ordering::AcqRel) {
            if cfg!(debug_assertions) {
                panic!("work scope {} ended twice", self.id);
            }
            error!(
                "event=work_end module=work status=error work={} tenant={} error=already_ended",
                self.id,
                self.tenant()
            );
            return Err(WorkScopeError::AlreadyEnded(self.id));
        }
        self.finish();
        Ok(())
    }

    pub(crate) fn attach(self: &Arc<Self>, store: Arc<dyn AmbientScopeStore>) {
        store.attach(self);
        self.attachments.lock().push(store);
    }

    fn ensure_open(&self) -> WorkResult<()> {
        if self.is_ended() {
            return Err(WorkScopeError::Ended(self.id));
        }
        Ok(())
    }

    fn finish(&self) {
        for observer in self.observers.iter().rev() {
            observer.work_finished(self);
        }

        let live = self.live.lock().take();
        if let Some(live) = live {
            live.scope.release();
            info!(
                "event=work_end module=work status=ok tenant={} work={} runtime={} retired={}",
                self.tenant(),
                self.id,
                live.runtime.id(),
                live.runtime.is_retired()
            );
        }
        self.state.lock().clear();

        let attachments = std::mem::take(&mut *self.attachments.lock());
        for store in attachments {
            store.detach(self.id);
        }
    }
}

impl Drop for WorkScope {
    fn drop(&mut self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            warn!(
                "event=work_end module=work status=skip work={} reason=dropped_without_end",
                self.id
            );
            self.finish();
        }
    }
}

/// Work-scope failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkScopeError {
    Kernel(KernelError),
    Scope(ScopeError),
    Ended(Uuid),
    AlreadyEnded(Uuid),
}

impl Display for WorkScopeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kernel(err) => write!(f, "{err}"),
            Self::Scope(err) => write!(f, "{err}"),
            Self::Ended(id) => write!(f, "work scope {id} has ended"),
            Self::AlreadyEnded(id) => write!(f, "work scope {id} was ended twice"),
        }
    }
}

impl Error for WorkScopeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Kernel(err) => Some(err),
            Self::Scope(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KernelError> for WorkScopeError {
    fn from(value: KernelError) -> Self {
        Self::Kernel(value)
    }
}

impl From<ScopeError> for WorkScopeError {
    fn from(value: ScopeError) -> Self {
        Self::Scope(value)
    }
}
