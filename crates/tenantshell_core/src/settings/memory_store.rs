//! Map-backed settings store for embedding hosts and tests.

use crate::model::tenant::{TenantKey, TenantRecord, TenantState};
use crate::settings::{
    ChangeEvent, ChangeNotifier, ChangeObserver, SettingsStore, StoreError, StoreResult,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Weak;

#[derive(Default)]
pub struct InMemorySettingsStore {
    records: RwLock<BTreeMap<TenantKey, TenantRecord>>,
    notifier: ChangeNotifier,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`, without notifications.
    pub fn with_records(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.key(), record);
            }
        }
        store
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn load_all(&self) -> StoreResult<Vec<TenantRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn save(&self, record: &TenantRecord) -> StoreResult<()> {
        self.records.write().insert(record.key(), record.clone());
        self.notifier.notify(&ChangeEvent::TenantSaved(record.clone()));
        Ok(())
    }

    fn delete(&self, name: &str) -> StoreResult<TenantRecord> {
        let removed = self
            .records
            .write()
            .remove(&TenantKey::new(name))
            .ok_or_else(|| StoreError::NotFound(name.trim().to_string()))?;
        let disabled = removed.with_state(TenantState::Disabled);
        self.notifier
            .notify(&ChangeEvent::TenantDeleted(disabled.clone()));
        Ok(disabled)
    }

    fn subscribe(&self, observer: Weak<dyn ChangeObserver>) {
        self.notifier.subscribe(observer);
    }
}
