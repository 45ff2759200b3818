//! Top-level shell object of a tenant runtime and its lifecycle hooks.

use std::sync::atomic::{AtomicBool, Ordering};

/// Handlers filed under `shell-events`.
pub trait ShellEvents: Send + Sync {
    /// Called once after the runtime is built, before callers can see it.
    fn activated(&self, _shell: &Shell) {}

    /// Called once when the runtime is retired.
    fn terminating(&self, _shell: &Shell) {}
}

#[derive(Debug)]
pub struct Shell {
    tenant: String,
    revision: u64,
    features: Vec<String>,
    activated: AtomicBool,
    terminated: AtomicBool,
}

impl Shell {
    pub fn new(tenant: &str, revision: u64, features: Vec<String>) -> Self {
        Self {
            tenant: tenant.to_string(),
            revision,
            features,
            activated: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_activated(&self) -> bool {
        !self.activated.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_terminated(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }
}
