//! Volatile tokens and the owned signal cache.
//!
//! # Responsibility
//! - Give dependents a cheap flag telling them a cached value must be recomputed.
//! - Keep one live token per signal key with explicit eviction.
//!
//! # Invariants
//! - A token flips from current to stale exactly once and never back.
//! - `Signals::trigger` flips the live token for a key and evicts it, so the
//!   next `when` hands out a fresh current token.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot invalidation flag.
#[derive(Debug)]
pub struct VolatileToken {
    key: String,
    current: AtomicBool,
}

impl VolatileToken {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            current: AtomicBool::new(true),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire)
    }

    /// Flips the token. Returns `true` only for the call that flipped it.
    pub fn expire(&self) -> bool {
        self.current.swap(false, Ordering::AcqRel)
    }
}

/// Owned cache of live tokens keyed by signal name (usually a path).
#[derive(Debug, Default)]
pub struct Signals {
    tokens: Mutex<HashMap<String, Arc<VolatileToken>>>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live token for `key`, creating one when absent.
    pub fn when(&self, key: &str) -> Arc<VolatileToken> {
        let mut tokens = self.tokens.lock();
        Arc::clone(
            tokens
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(VolatileToken::new(key))),
        )
    }

    /// Expires and evicts the live token for `key`.
    ///
    /// Returns whether a live token existed.
    pub fn trigger(&self, key: &str) -> bool {
        let token = self.tokens.lock().remove(key);
        match token {
            Some(token) => {
                token.expire();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}
