//! Ambient association between the running unit of work and its scope.
//!
//! # Invariants
//! - Stores hold scopes weakly; an ambient lookup never keeps a scope alive.
//! - Ended scopes are never returned.
//! - A request-bound store, when the caller has one, takes precedence over the
//!   thread-bound store.

use crate::kernel::TenantKernel;
use crate::work::scope::{WorkResult, WorkScope};
use log::debug;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Where the current work scope is published for ambient retrieval.
pub trait AmbientScopeStore: Send + Sync {
    fn attach(&self, scope: &Arc<WorkScope>);
    /// Removes `scope_id` if it is still attached.
    fn detach(&self, scope_id: Uuid);
    fn current(&self) -> Option<Arc<WorkScope>>;
}

/// Scope id kept next to the weak handle so detaching never upgrades.
type AttachedScope = (Uuid, Weak<WorkScope>);

static NEXT_THREAD_STORE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_SCOPES: RefCell<HashMap<u64, Vec<AttachedScope>>> =
        RefCell::new(HashMap::new());
}

/// Thread-bound store. Nested scopes on one thread stack; ending the inner
/// one restores the outer one.
pub struct ThreadScopeStore {
    id: u64,
}

impl ThreadScopeStore {
    pub fn new() -> Self {
        Self {
            id: NEXT_THREAD_STORE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for ThreadScopeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AmbientScopeStore for ThreadScopeStore {
    fn attach(&self, scope: &Arc<WorkScope>) {
        let _ = THREAD_SCOPES.try_with(|scopes| {
            scopes
                .borrow_mut()
                .entry(self.id)
                .or_default()
                .push((scope.id(), Arc::downgrade(scope)));
        });
    }

    fn detach(&self, scope_id: Uuid) {
        let _ = THREAD_SCOPES.try_with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            if let Some(stack) = scopes.get_mut(&self.id) {
                stack.retain(|(id, entry)| *id != scope_id && entry.strong_count() > 0);
                if stack.is_empty() {
                    scopes.remove(&self.id);
                }
            }
        });
    }

    fn current(&self) -> Option<Arc<WorkScope>> {
        THREAD_SCOPES
            .try_with(|scopes| {
                scopes.borrow().get(&self.id).and_then(|stack| {
                    stack
                        .iter()
                        .rev()
                        .filter_map(|(_, entry)| entry.upgrade())
                        .find(|scope| !scope.is_ended())
                })
            })
            .ok()
            .flatten()
    }
}

/// Store bound to one request; shared by every thread serving it.
#[derive(Default)]
pub struct RequestScopeStore {
    slot: Mutex<Option<AttachedScope>>,
}

impl RequestScopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AmbientScopeStore for RequestScopeStore {
    fn attach(&self, scope: &Arc<WorkScope>) {
        *self.slot.lock() = Some((scope.id(), Arc::downgrade(scope)));
    }

    fn detach(&self, scope_id: Uuid) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|(id, _)| *id == scope_id) {
            *slot = None;
        }
    }

    fn current(&self) -> Option<Arc<WorkScope>> {
        let attached = self
            .slot
            .lock()
            .as_ref()
            .and_then(|(_, entry)| entry.upgrade());
        attached.filter(|scope| !scope.is_ended())
    }
}

/// Begins work scopes through the kernel and publishes them ambiently.
pub struct WorkContextAccessor {
    kernel: Arc<TenantKernel>,
    thread_store: Arc<ThreadScopeStore>,
}

impl WorkContextAccessor {
    pub fn new(kernel: Arc<TenantKernel>) -> Self {
        Self {
            kernel,
            thread_store: Arc::new(ThreadScopeStore::new()),
        }
    }

    pub fn kernel(&self) -> &Arc<TenantKernel> {
        &self.kernel
    }

    /// Begins a scope for `tenant` bound to the calling thread.
    pub fn begin(&self, tenant: &str) -> WorkResult<Arc<WorkScope>> {
        let store: Arc<dyn AmbientScopeStore> = self.thread_store.clone();
        self.begin_in(tenant, store)
    }

    /// Begins a scope for `tenant` bound to `request`.
    pub fn begin_for_request(
        &self,
        tenant: &str,
        request: &Arc<RequestScopeStore>,
    ) -> WorkResult<Arc<WorkScope>> {
        let store: Arc<dyn AmbientScopeStore> = request.clone();
        self.begin_in(tenant, store)
    }

    /// Current scope: the request store alone when given, else this thread's.
    pub fn current(&self, request: Option<&RequestScopeStore>) -> Option<Arc<WorkScope>> {
        match request {
            Some(request) => request.current(),
            None => self.thread_store.current(),
        }
    }

    fn begin_in(
        &self,
        tenant: &str,
        store: Arc<dyn AmbientScopeStore>,
    ) -> WorkResult<Arc<WorkScope>> {
        let runtime = self.kernel.get_runtime(tenant)?;
        let work = WorkScope::open(runtime)?;
        work.attach(store);
        debug!(
            "event=work_attach module=work status=ok tenant={} work={}",
            work.tenant(),
            work.id()
        );
        Ok(work)
    }
}
