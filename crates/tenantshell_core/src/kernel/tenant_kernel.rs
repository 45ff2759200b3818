//! Per-tenant runtime cache with single-flight builds and invalidation.
//!
//! # Responsibility
//! - Build a tenant runtime on first access and hand the same instance to
//!   every caller until it is invalidated.
//! - React to settings and feature-set change notifications.
//!
//! # Invariants
//! - At most one live runtime and at most one build in flight per tenant.
//! - Builds serialize per tenant only; tenants never wait on each other.
//! - After `invalidate_tenant` returns, the previous runtime is never handed
//!   out again. Its scope is released once the last work scope over it ends.
//! - A build that overlaps an invalidation is discarded and retried.
//! - Callers queued behind a failed build receive that build's error. Later
//!   callers keep receiving it for `KernelOptions::failure_ttl`.
//! - A runtime is activated before it is published, so no caller can retire
//!   it before its `activated` hooks ran.
//! - Runtime retirement and activation hooks run outside slot state locks.

use crate::composition::{BlueprintComposer, CompositionError};
use crate::model::tenant::{TenantKey, TenantRecord, TenantRecordError, TenantState, DEFAULT_TENANT_NAME};
use crate::routing::TenantRouter;
use crate::runtime::factory::{BuildError, RuntimeFactory};
use crate::runtime::tenant_runtime::Runtime;
use crate::settings::{ChangeEvent, ChangeObserver, FeatureSetStore, SettingsStore, StoreError};
use crate::signals::{Signals, VolatileToken};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub type KernelResult<T> = Result<T, KernelError>;

/// Kernel tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelOptions {
    /// How long a failed build is remembered before the next attempt.
    pub failure_ttl: Duration,
    /// Compare the stored feature-set revision on every `get_runtime`.
    pub check_revision_on_get: bool,
    /// Save a `Default` tenant when the settings store is empty at startup.
    pub bootstrap_default: bool,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            failure_ttl: Duration::from_secs(2),
            check_revision_on_get: true,
            bootstrap_default: false,
        }
    }
}

/// Collaborators the kernel is assembled from.
pub struct KernelParts {
    pub settings: Arc<dyn SettingsStore>,
    pub feature_sets: Arc<dyn FeatureSetStore>,
    pub composer: BlueprintComposer,
    pub factory: RuntimeFactory,
    pub options: KernelOptions,
}

/// Externally visible slot state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantStatus {
    Unknown,
    Empty,
    Building,
    Ready { runtime: Uuid, revision: u64 },
    Stale,
    Unavailable { reason: String },
    Disposed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    pub builds_started: u64,
    pub builds_succeeded: u64,
    pub builds_failed: u64,
    pub builds_discarded: u64,
    pub invalidations: u64,
}

/// Outcome of `reload_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub rebuilt: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, KernelError)>,
}

#[derive(Default)]
struct Counters {
    builds_started: AtomicU64,
    builds_succeeded: AtomicU64,
    builds_failed: AtomicU64,
    builds_discarded: AtomicU64,
    invalidations: AtomicU64,
}

enum SlotPhase {
    Empty,
    Building,
    Ready(Arc<Runtime>),
    Stale,
    Unavailable(KernelError),
    Disposed,
}

struct Failure {
    error: KernelError,
    at: Instant,
    epoch: u64,
    outcome: u64,
}

struct SlotState {
    phase: SlotPhase,
    /// Bumped by every invalidation; a build started under an older epoch
    /// is discarded.
    epoch: u64,
    /// Counts published build outcomes, successful or failed.
    outcomes: u64,
    last_failure: Option<Failure>,
}

struct TenantSlot {
    build_lock: Mutex<()>,
    state: Mutex<SlotState>,
}

impl TenantSlot {
    fn new() -> Self {
        Self {
            build_lock: Mutex::new(()),
            state: Mutex::new(SlotState {
                phase: SlotPhase::Empty,
                epoch: 0,
                outcomes: 0,
                last_failure: None,
            }),
        }
    }
}

pub struct TenantKernel {
    settings: Arc<dyn SettingsStore>,
    feature_sets: Arc<dyn FeatureSetStore>,
    composer: BlueprintComposer,
    factory: RuntimeFactory,
    options: KernelOptions,
    records: RwLock<BTreeMap<TenantKey, TenantRecord>>,
    router: RwLock<Arc<TenantRouter>>,
    slots: Mutex<HashMap<TenantKey, Arc<TenantSlot>>>,
    signals: Signals,
    counters: Counters,
    shut_down: AtomicBool,
}

impl TenantKernel {
    /// Loads tenant records and subscribes to store notifications.
    pub fn new(parts: KernelParts) -> KernelResult<Arc<Self>> {
        let mut records = parts.settings.load_all()?;
        if records.is_empty() && parts.options.bootstrap_default {
            let record = TenantRecord::new(DEFAULT_TENANT_NAME)?.with_state(TenantState::Running);
            parts.settings.save(&record)?;
            info!(
                "event=tenant_bootstrap module=kernel status=ok tenant={}",
                record.name()
            );
            records.push(record);
        }

        let kernel = Arc::new(Self {
            settings: parts.settings,
            feature_sets: parts.feature_sets,
            composer: parts.composer,
            factory: parts.factory,
            options: parts.options,
            records: RwLock::new(BTreeMap::new()),
            router: RwLock::new(Arc::new(TenantRouter::default())),
            slots: Mutex::new(HashMap::new()),
            signals: Signals::new(),
            counters: Counters::default(),
            shut_down: AtomicBool::new(false),
        });
        kernel.replace_records(records);

        let observer: Weak<dyn ChangeObserver> = Arc::downgrade(&kernel) as Weak<dyn ChangeObserver>;
        kernel.settings.subscribe(observer.clone());
        kernel.feature_sets.subscribe(observer);

        info!(
            "event=kernel_start module=kernel status=ok tenants={}",
            kernel.records.read().len()
        );
        Ok(kernel)
    }

    pub fn options(&self) -> &KernelOptions {
        &self.options
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn feature_sets(&self) -> &Arc<dyn FeatureSetStore> {
        &self.feature_sets
    }

    /// Known tenant records, sorted by key.
    pub fn tenants(&self) -> Vec<TenantRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn record(&self, name: &str) -> Option<TenantRecord> {
        self.records.read().get(&TenantKey::new(name)).cloned()
    }

    /// Token that expires on the next invalidation of `name`.
    pub fn tenant_token(&self, name: &str) -> Arc<VolatileToken> {
        self.signals.when(TenantKey::new(name).as_str())
    }

    /// Tenant record serving `host` + `path`.
    pub fn match_request(&self, host: &str, path: &str) -> Option<TenantRecord> {
        let router = Arc::clone(&self.router.read());
        let tenant = router.match_request(host, path)?;
        self.record(tenant)
    }

    /// Returns the live runtime of `name`, building it on first access.
    ///
    /// Concurrent callers share one build and receive the same instance.
    pub fn get_runtime(&self, name: &str) -> KernelResult<Arc<Runtime>> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(KernelError::ShutDown);
        }
        let key = TenantKey::new(name);
        let record = self
            .record(name)
            .ok_or_else(|| KernelError::InvalidTenant(name.trim().to_string()))?;
        if !record.state().is_available() {
            return Err(KernelError::TenantDisabled {
                tenant: record.name().to_string(),
                state: record.state(),
            });
        }

        let slot = self.slot(&key);
        if let Some(runtime) = self.ready_runtime(&key, &slot, record.name())? {
            return Ok(runtime);
        }

        let outcomes_seen = slot.state.lock().outcomes;
        let _build = slot.build_lock.lock();
        loop {
            if let Some(runtime) = self.ready_runtime(&key, &slot, record.name())? {
                return Ok(runtime);
            }

            let epoch = {
                let mut state = slot.state.lock();
                if matches!(state.phase, SlotPhase::Disposed) {
                    return Err(KernelError::InvalidTenant(record.name().to_string()));
                }
                if let Some(failure) = &state.last_failure {
                    let current = failure.epoch == state.epoch && failure.outcome == state.outcomes;
                    let queued_behind = failure.outcome != outcomes_seen;
                    if current
                        && (queued_behind || failure.at.elapsed() < self.options.failure_ttl)
                    {
                        debug!(
                            "event=runtime_get module=kernel status=skip tenant={} reason=negative_cache queued={}",
                            record.name(),
                            queued_behind
                        );
                        return Err(failure.error.clone());
                    }
                }
                state.phase = SlotPhase::Building;
                state.epoch
            };

            let built = self.build(&key);
            if let Ok(runtime) = &built {
                runtime.activate();
            }

            let mut state = slot.state.lock();
            if state.epoch != epoch || matches!(state.phase, SlotPhase::Disposed) {
                let disposed = matches!(state.phase, SlotPhase::Disposed);
                if !disposed {
                    state.phase = SlotPhase::Stale;
                }
                drop(state);
                self.counters.builds_discarded.fetch_add(1, Ordering::Relaxed);
                info!(
                    "event=runtime_build module=kernel status=skip tenant={} reason=invalidated_during_build",
                    record.name()
                );
                if let Ok(runtime) = built {
                    runtime.retire();
                }
                if disposed {
                    return Err(KernelError::InvalidTenant(record.name().to_string()));
                }
                continue;
            }

            return match built {
                Ok(runtime) => {
                    state.phase = SlotPhase::Ready(Arc::clone(&runtime));
                    state.outcomes += 1;
                    state.last_failure = None;
                    drop(state);
                    self.counters.builds_succeeded.fetch_add(1, Ordering::Relaxed);
                    Ok(runtime)
                }
                Err(err) => {
                    state.phase = SlotPhase::Unavailable(err.clone());
                    state.outcomes += 1;
                    state.last_failure = Some(Failure {
                        error: err.clone(),
                        at: Instant::now(),
                        epoch,
                        outcome: state.outcomes,
                    });
                    drop(state);
                    self.counters.builds_failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "event=runtime_get module=kernel status=error tenant={} error={err}",
                        record.name()
                    );
                    Err(err)
                }
            };
        }
    }

    /// Retires the cached runtime of `name`; the next get rebuilds.
    ///
    /// Idempotent. Returns whether a ready runtime was retired.
    pub fn invalidate_tenant(&self, name: &str) -> bool {
        let key = TenantKey::new(name);
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        let slot = self.slots.lock().get(&key).cloned();
        let retired = match slot {
            Some(slot) => {
                let mut state = slot.state.lock();
                state.epoch += 1;
                state.last_failure = None;
                match std::mem::replace(&mut state.phase, SlotPhase::Stale) {
                    SlotPhase::Ready(runtime) => Some(runtime),
                    SlotPhase::Empty => {
                        state.phase = SlotPhase::Empty;
                        None
                    }
                    SlotPhase::Building => {
                        state.phase = SlotPhase::Building;
                        None
                    }
                    SlotPhase::Disposed => {
                        state.phase = SlotPhase::Disposed;
                        None
                    }
                    SlotPhase::Stale | SlotPhase::Unavailable(_) => None,
                }
            }
            None => None,
        };

        self.signals.trigger(key.as_str());
        let had_runtime = retired.is_some();
        if let Some(runtime) = retired {
            runtime.retire();
        }
        info!(
            "event=tenant_invalidate module=kernel status=ok tenant={} retired={}",
            name.trim(),
            had_runtime
        );
        had_runtime
    }

    /// Push path for feature-set advancement.
    ///
    /// Invalidates when the cached runtime was built at an older revision.
    pub fn feature_set_changed(&self, name: &str, revision: u64) -> bool {
        let key = TenantKey::new(name);
        let stale = self.slots.lock().get(&key).is_some_and(|slot| {
            matches!(&slot.state.lock().phase, SlotPhase::Ready(runtime) if runtime.is_stale_against(revision))
        });
        stale && self.invalidate_tenant(name)
    }

    /// Reloads records from the settings store and rebuilds every tenant.
    ///
    /// Work scopes opened before the reload keep their runtime until they end.
    pub fn reload_all(&self) -> KernelResult<ReloadReport> {
        let records = self.settings.load_all()?;
        let removed: Vec<String> = {
            let current = self.records.read();
            let incoming: Vec<TenantKey> = records.iter().map(TenantRecord::key).collect();
            current
                .values()
                .filter(|record| !incoming.contains(&record.key()))
                .map(|record| record.name().to_string())
                .collect()
        };
        for name in &removed {
            self.remove_tenant(name);
        }
        self.replace_records(records.clone());

        let mut report = ReloadReport::default();
        for record in &records {
            self.revive(&record.key());
            self.invalidate_tenant(record.name());
            if !record.state().is_available() {
                report.skipped.push(record.name().to_string());
                continue;
            }
            match self.get_runtime(record.name()) {
                Ok(_) => report.rebuilt.push(record.name().to_string()),
                Err(err) => report.failed.push((record.name().to_string(), err)),
            }
        }
        info!(
            "event=kernel_reload module=kernel status=ok rebuilt={} skipped={} failed={} removed={}",
            report.rebuilt.len(),
            report.skipped.len(),
            report.failed.len(),
            removed.len()
        );
        Ok(report)
    }

    /// Disposes the runtime of `name` and forgets the tenant.
    ///
    /// `get_runtime` reports `InvalidTenant` until the tenant is saved again.
    pub fn remove_tenant(&self, name: &str) -> bool {
        let key = TenantKey::new(name);
        let known = self.records.write().remove(&key).is_some();
        self.rebuild_router();

        let slot = self.slots.lock().get(&key).cloned();
        let retired = slot.and_then(|slot| {
            let mut state = slot.state.lock();
            state.epoch += 1;
            state.last_failure = None;
            match std::mem::replace(&mut state.phase, SlotPhase::Disposed) {
                SlotPhase::Ready(runtime) => Some(runtime),
                _ => None,
            }
        });
        self.signals.trigger(key.as_str());
        if let Some(runtime) = retired {
            runtime.retire();
        }
        info!(
            "event=tenant_remove module=kernel status=ok tenant={} known={}",
            name.trim(),
            known
        );
        known
    }

    /// Deletes `name` from the settings store; the deletion notification
    /// removes it from the kernel.
    pub fn delete_tenant(&self, name: &str) -> KernelResult<TenantRecord> {
        let disabled = self.settings.delete(name)?;
        self.remove_tenant(name);
        Ok(disabled)
    }

    /// Disposes every runtime. Later `get_runtime` calls fail with `ShutDown`.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let slots: Vec<(TenantKey, Arc<TenantSlot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let mut retired = Vec::new();
        for (key, slot) in slots {
            let mut state = slot.state.lock();
            state.epoch += 1;
            if let SlotPhase::Ready(runtime) =
                std::mem::replace(&mut state.phase, SlotPhase::Disposed)
            {
                retired.push(runtime);
            }
            drop(state);
            self.signals.trigger(key.as_str());
        }
        let count = retired.len();
        for runtime in retired {
            runtime.retire();
        }
        info!(
            "event=kernel_shutdown module=kernel status=ok retired={}",
            count
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn status(&self, name: &str) -> TenantStatus {
        let key = TenantKey::new(name);
        let Some(slot) = self.slots.lock().get(&key).cloned() else {
            return if self.records.read().contains_key(&key) {
                TenantStatus::Empty
            } else {
                TenantStatus::Unknown
            };
        };
        let state = slot.state.lock();
        match &state.phase {
            SlotPhase::Empty => TenantStatus::Empty,
            SlotPhase::Building => TenantStatus::Building,
            SlotPhase::Ready(runtime) => TenantStatus::Ready {
                runtime: runtime.id(),
                revision: runtime.revision(),
            },
            SlotPhase::Stale => TenantStatus::Stale,
            SlotPhase::Unavailable(err) => TenantStatus::Unavailable {
                reason: err.to_string(),
            },
            SlotPhase::Disposed => TenantStatus::Disposed,
        }
    }

    pub fn stats(&self) -> KernelStats {
        KernelStats {
            builds_started: self.counters.builds_started.load(Ordering::Relaxed),
            builds_succeeded: self.counters.builds_succeeded.load(Ordering::Relaxed),
            builds_failed: self.counters.builds_failed.load(Ordering::Relaxed),
            builds_discarded: self.counters.builds_discarded.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, key: &TenantKey) -> Arc<TenantSlot> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(TenantSlot::new())),
        )
    }

    /// Ready, unretired and (optionally) revision-fresh runtime, if any.
    fn ready_runtime(
        &self,
        key: &TenantKey,
        slot: &TenantSlot,
        name: &str,
    ) -> KernelResult<Option<Arc<Runtime>>> {
        let runtime = match &slot.state.lock().phase {
            SlotPhase::Ready(runtime) => Arc::clone(runtime),
            _ => return Ok(None),
        };
        if runtime.is_retired() {
            return Ok(None);
        }
        if self.options.check_revision_on_get {
            let current = self.feature_sets.revision(name)?;
            if runtime.is_stale_against(current) {
                debug!(
                    "event=runtime_get module=kernel status=skip tenant={} reason=revision built={} current={}",
                    name,
                    runtime.revision(),
                    current
                );
                self.retire_if_current(key, slot, &runtime);
                return Ok(None);
            }
        }
        Ok(Some(runtime))
    }

    fn retire_if_current(&self, key: &TenantKey, slot: &TenantSlot, runtime: &Arc<Runtime>) {
        let retired = {
            let mut state = slot.state.lock();
            let current = matches!(&state.phase, SlotPhase::Ready(ready) if Arc::ptr_eq(ready, runtime));
            if current {
                state.phase = SlotPhase::Stale;
                state.epoch += 1;
            }
            current
        };
        if retired {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            self.signals.trigger(key.as_str());
            runtime.retire();
        }
    }

    fn build(&self, key: &TenantKey) -> KernelResult<Arc<Runtime>> {
        let record = self
            .records
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| KernelError::InvalidTenant(key.to_string()))?;
        if !record.state().is_available() {
            return Err(KernelError::TenantDisabled {
                tenant: record.name().to_string(),
                state: record.state(),
            });
        }

        self.counters.builds_started.fetch_add(1, Ordering::Relaxed);
        info!(
            "event=runtime_build module=kernel status=start tenant={}",
            record.name()
        );
        let features = self.feature_sets.load(record.name())?;
        let blueprint =
            self.composer
                .compose(&record, &features)
                .map_err(|source| KernelError::Composition {
                    tenant: record.name().to_string(),
                    source,
                })?;
        let token = self.signals.when(key.as_str());
        let runtime =
            self.factory
                .build(blueprint, token)
                .map_err(|source| KernelError::Build {
                    tenant: record.name().to_string(),
                    source,
                })?;
        Ok(Arc::new(runtime))
    }

    fn replace_records(&self, records: Vec<TenantRecord>) {
        {
            let mut map = self.records.write();
            map.clear();
            for record in records {
                map.insert(record.key(), record);
            }
        }
        self.rebuild_router();
    }

    fn rebuild_router(&self) {
        let router = {
            let records = self.records.read();
            Arc::new(TenantRouter::new(records.values()))
        };
        *self.router.write() = router;
    }

    /// Turns a disposed slot back into an empty one.
    fn revive(&self, key: &TenantKey) {
        if let Some(slot) = self.slots.lock().get(key) {
            let mut state = slot.state.lock();
            if matches!(state.phase, SlotPhase::Disposed) {
                state.phase = SlotPhase::Empty;
                state.epoch += 1;
            }
        }
    }

    fn tenant_saved(&self, record: &TenantRecord) {
        let key = record.key();
        self.records.write().insert(key.clone(), record.clone());
        self.rebuild_router();
        self.revive(&key);
        self.invalidate_tenant(record.name());
    }
}

impl ChangeObserver for TenantKernel {
    fn on_change(&self, event: &ChangeEvent) {
        if self.is_shut_down() {
            return;
        }
        match event {
            ChangeEvent::TenantSaved(record) => self.tenant_saved(record),
            ChangeEvent::TenantDeleted(record) => {
                self.remove_tenant(record.name());
            }
            ChangeEvent::FeatureSetAdvanced { tenant, revision } => {
                if !self.feature_set_changed(tenant, *revision) {
                    debug!(
                        "event=feature_set_changed module=kernel status=skip tenant={} revision={}",
                        tenant, revision
                    );
                }
            }
        }
    }
}

impl Drop for TenantKernel {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            warn!("event=kernel_drop module=kernel status=skip reason=not_shut_down");
            self.shutdown();
        }
    }
}

/// Kernel-facing failures. `Clone`, so one build failure reaches every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    InvalidTenant(String),
    TenantDisabled { tenant: String, state: TenantState },
    Composition { tenant: String, source: CompositionError },
    Build { tenant: String, source: BuildError },
    Store(StoreError),
    ShutDown,
}

impl Display for KernelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTenant(name) => write!(f, "unknown tenant: {name}"),
            Self::TenantDisabled { tenant, state } => {
                write!(f, "tenant `{tenant}` is not available (state {state})")
            }
            Self::Composition { tenant, source } => {
                write!(f, "composition failed for tenant `{tenant}`: {source}")
            }
            Self::Build { tenant, source } => {
                write!(f, "runtime build failed for tenant `{tenant}`: {source}")
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::ShutDown => write!(f, "tenant kernel has been shut down"),
        }
    }
}

impl Error for KernelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Composition { source, .. } => Some(source),
            Self::Build { source, .. } => Some(source),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for KernelError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<TenantRecordError> for KernelError {
    fn from(value: TenantRecordError) -> Self {
        Self::Store(StoreError::InvalidRecord(value))
    }
}
