//! Settings and feature-set store contracts.
//!
//! # Responsibility
//! - Define the narrow contracts the kernel consumes for tenant records and
//!   feature sets.
//! - Carry save/delete/advance notifications to observers.
//!
//! # Invariants
//! - `load_all` is idempotent and returns records sorted by name.
//! - Every successful `save`/`delete` emits exactly one `ChangeEvent`.
//! - Observers are held weakly; a dropped observer is pruned, never called.

use crate::db::DbError;
use crate::model::feature_set::FeatureSet;
use crate::model::tenant::{TenantRecord, TenantRecordError};
use log::debug;
use parking_lot::RwLock;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

pub mod feature_store;
pub mod file_store;
pub mod memory_store;

pub use feature_store::SqliteFeatureSetStore;
pub use file_store::FileSettingsStore;
pub use memory_store::InMemorySettingsStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Change notification emitted by stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    TenantSaved(TenantRecord),
    /// Carries the record as it was at deletion, already `Disabled`.
    TenantDeleted(TenantRecord),
    FeatureSetAdvanced { tenant: String, revision: u64 },
}

/// Receives store change notifications.
pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

/// Weakly-held observer list shared by store implementations.
#[derive(Default)]
pub struct ChangeNotifier {
    observers: RwLock<Vec<Weak<dyn ChangeObserver>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Weak<dyn ChangeObserver>) {
        self.observers.write().push(observer);
    }

    /// Delivers `event` to live observers, outside the observer lock.
    pub fn notify(&self, event: &ChangeEvent) {
        let live: Vec<Arc<dyn ChangeObserver>> = {
            let mut observers = self.observers.write();
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        debug!(
            "event=store_notify module=settings status=ok observers={}",
            live.len()
        );
        for observer in live {
            observer.on_change(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .iter()
            .filter(|observer| observer.strong_count() > 0)
            .count()
    }
}

/// Loads, saves and deletes tenant records.
pub trait SettingsStore: Send + Sync {
    fn load_all(&self) -> StoreResult<Vec<TenantRecord>>;
    fn save(&self, record: &TenantRecord) -> StoreResult<()>;
    /// Disables and removes the tenant, returning the disabled record.
    fn delete(&self, name: &str) -> StoreResult<TenantRecord>;
    fn subscribe(&self, observer: Weak<dyn ChangeObserver>);
}

/// Loads and advances revisioned feature sets.
pub trait FeatureSetStore: Send + Sync {
    /// Returns the stored set, or an empty revision-0 set.
    fn load(&self, tenant: &str) -> StoreResult<FeatureSet>;
    /// Returns the stored revision, `0` when nothing is stored.
    fn revision(&self, tenant: &str) -> StoreResult<u64>;
    /// Replaces the enabled features and advances the revision by one.
    fn save(&self, tenant: &str, features: &[&str]) -> StoreResult<FeatureSet>;
    fn subscribe(&self, observer: Weak<dyn ChangeObserver>);
}

/// Store failures. Messages are captured as text so errors stay `Clone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Io { path: PathBuf, message: String },
    Db(String),
    InvalidRecord(TenantRecordError),
    InvalidData(String),
    NotFound(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "settings io failed at `{}`: {message}", path.display())
            }
            Self::Db(message) => write!(f, "feature-set database error: {message}"),
            Self::InvalidRecord(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::NotFound(name) => write!(f, "tenant not found in store: {name}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidRecord(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TenantRecordError> for StoreError {
    fn from(value: TenantRecordError) -> Self {
        Self::InvalidRecord(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeEvent, ChangeNotifier, ChangeObserver};
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ChangeEvent>>,
    }

    impl ChangeObserver for Recorder {
        fn on_change(&self, event: &ChangeEvent) {
            self.events.lock().push(event.clone());
        }
    }

    #[test]
    fn notifies_live_observers_and_prunes_dropped_ones() {
        let notifier = ChangeNotifier::new();
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        let kept_weak: Weak<dyn ChangeObserver> = Arc::downgrade(&kept) as Weak<dyn ChangeObserver>;
        let dropped_weak: Weak<dyn ChangeObserver> =
            Arc::downgrade(&dropped) as Weak<dyn ChangeObserver>;
        notifier.subscribe(kept_weak);
        notifier.subscribe(dropped_weak);
        drop(dropped);

        notifier.notify(&ChangeEvent::FeatureSetAdvanced {
            tenant: "Acme".to_string(),
            revision: 2,
        });

        assert_eq!(kept.events.lock().len(), 1);
        assert_eq!(notifier.observer_count(), 1);
    }
}
