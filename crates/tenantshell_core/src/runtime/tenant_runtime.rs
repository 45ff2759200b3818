//! Built tenant runtime.
//!
//! # Invariants
//! - A runtime is built once from one blueprint snapshot and never mutated.
//! - Retirement is one-way; a retired runtime is never handed out again.
//! - The scope is released when the last holder drops the runtime, so work
//!   scopes opened before retirement keep a usable runtime until they end.

use crate::composition::Blueprint;
use crate::extension::capability::TAG_SHELL_EVENTS;
use crate::model::feature_set::FeatureSet;
use crate::model::tenant::TenantRecord;
use crate::runtime::scope::{ScopeResult, ServiceScope};
use crate::runtime::shell::{Shell, ShellEvents};
use crate::signals::VolatileToken;
use log::{info, warn};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct Runtime {
    id: Uuid,
    blueprint: Blueprint,
    scope: ServiceScope,
    shell: Arc<Shell>,
    token: Arc<VolatileToken>,
    retired: AtomicBool,
    built_at: Instant,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("tenant", &self.tenant())
            .field("revision", &self.revision())
            .field("retired", &self.is_retired())
            .finish()
    }
}

impl Runtime {
    pub(crate) fn new(
        blueprint: Blueprint,
        scope: ServiceScope,
        shell: Arc<Shell>,
        token: Arc<VolatileToken>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            blueprint,
            scope,
            shell,
            token,
            retired: AtomicBool::new(false),
            built_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant(&self) -> &str {
        self.blueprint.record().name()
    }

    pub fn record(&self) -> &TenantRecord {
        self.blueprint.record()
    }

    pub fn feature_set(&self) -> &FeatureSet {
        self.blueprint.feature_set()
    }

    pub fn revision(&self) -> u64 {
        self.blueprint.feature_set().revision()
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    pub fn shell(&self) -> &Arc<Shell> {
        &self.shell
    }

    pub fn token(&self) -> &Arc<VolatileToken> {
        &self.token
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    pub fn resolve<T: Any + Send + Sync>(&self, key: &str) -> ScopeResult<Arc<T>> {
        self.scope.resolve(key)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Whether the stored feature-set revision has moved past this runtime.
    pub fn is_stale_against(&self, current_revision: u64) -> bool {
        self.blueprint.feature_set().is_stale_against(current_revision)
    }

    /// Fires `activated` on every shell-events handler, once.
    ///
    /// A runtime retired first is never activated.
    pub(crate) fn activate(&self) {
        if self.is_retired() || !self.shell.mark_activated() {
            return;
        }
        let handlers = self.shell_handlers();
        for handler in &handlers {
            handler.activated(&self.shell);
        }
        info!(
            "event=runtime_activate module=runtime status=ok tenant={} runtime={} revision={} handlers={}",
            self.tenant(),
            self.id,
            self.revision(),
            handlers.len()
        );
    }

    /// Retires the runtime and fires `terminating` on its handlers.
    ///
    /// Returns `false` when it was already retired.
    pub(crate) fn retire(&self) -> bool {
        if self.retired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.expire();
        // Claiming activation here turns a racing `activate` into a no-op.
        let was_activated = !self.shell.mark_activated();
        if was_activated && self.shell.mark_terminated() {
            for handler in self.shell_handlers() {
                handler.terminating(&self.shell);
            }
        }
        info!(
            "event=runtime_retire module=runtime status=ok tenant={} runtime={} revision={}",
            self.tenant(),
            self.id,
            self.revision()
        );
        true
    }

    fn shell_handlers(&self) -> Vec<Arc<dyn ShellEvents>> {
        match self
            .scope
            .resolve_all::<Arc<dyn ShellEvents>>(TAG_SHELL_EVENTS)
        {
            Ok(handlers) => handlers
                .iter()
                .map(|handler| Arc::clone(handler.as_ref()))
                .collect(),
            Err(err) => {
                warn!(
                    "event=shell_events module=runtime status=error tenant={} runtime={} error={err}",
                    self.tenant(),
                    self.id
                );
                Vec::new()
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.scope.release();
        info!(
            "event=runtime_release module=runtime status=ok tenant={} runtime={} age_ms={}",
            self.tenant(),
            self.id,
            self.age().as_millis()
        );
    }
}
