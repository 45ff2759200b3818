//! Directory-per-tenant settings store.
//!
//! # Responsibility
//! - Persist each tenant as `<root>/<Name>/Settings.txt` with one `Key: Value`
//!   line per entry.
//! - Notify observers and expire the per-file volatile token on save/delete.
//!
//! # Invariants
//! - Keys are written in sorted order, so output is deterministic.
//! - Values equal to `null` (any case) or empty are treated as absent on load.
//! - Writes go through a temp file and rename; readers never see half a file.
//! - Directories without `Settings.txt` are ignored by `load_all`.

use crate::model::tenant::{TenantRecord, TenantState, KEY_NAME};
use crate::settings::{
    ChangeEvent, ChangeNotifier, ChangeObserver, SettingsStore, StoreError, StoreResult,
};
use crate::signals::{Signals, VolatileToken};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// File name holding one tenant's settings.
pub const SETTINGS_FILE_NAME: &str = "Settings.txt";

pub struct FileSettingsStore {
    root: PathBuf,
    notifier: ChangeNotifier,
    signals: Signals,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            notifier: ChangeNotifier::new(),
            signals: Signals::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the settings file for `name` (existing directory casing wins).
    pub fn settings_path(&self, name: &str) -> PathBuf {
        self.tenant_dir(name).join(SETTINGS_FILE_NAME)
    }

    /// Token expiring on the next save or delete of `name`.
    pub fn settings_token(&self, name: &str) -> Arc<VolatileToken> {
        self.signals.when(&signal_key(&self.settings_path(name)))
    }

    fn tenant_dir(&self, name: &str) -> PathBuf {
        let name = name.trim();
        self.find_tenant_dir(name)
            .unwrap_or_else(|| self.root.join(name))
    }

    fn find_tenant_dir(&self, name: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.root).ok()?;
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .and_then(|file_name| file_name.to_str())
                        .is_some_and(|file_name| file_name.eq_ignore_ascii_case(name))
            })
    }

    fn read_record(&self, dir: &Path) -> StoreResult<Option<TenantRecord>> {
        let path = dir.join(SETTINGS_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
        let mut values = parse_settings(&text);
        if !values.contains_key(KEY_NAME) {
            if let Some(dir_name) = dir.file_name().and_then(|name| name.to_str()) {
                values.insert(KEY_NAME.to_string(), dir_name.to_string());
            }
        }
        Ok(Some(TenantRecord::from_values(values)?))
    }
}

impl SettingsStore for FileSettingsStore {
    fn load_all(&self) -> StoreResult<Vec<TenantRecord>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root).map_err(|err| StoreError::io(&self.root, err))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StoreError::io(&self.root, err))?;
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            match self.read_record(&dir) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!(
                    "event=settings_load module=settings status=skip path={} error={err}",
                    dir.display()
                ),
            }
        }
        records.sort_by_key(|record| record.key());
        info!(
            "event=settings_load module=settings status=ok tenants={}",
            records.len()
        );
        Ok(records)
    }

    fn save(&self, record: &TenantRecord) -> StoreResult<()> {
        {
            let _guard = self.write_lock.lock();
            let dir = self.tenant_dir(record.name());
            fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;

            let path = dir.join(SETTINGS_FILE_NAME);
            let temp_path = dir.join(format!("{SETTINGS_FILE_NAME}.tmp"));
            fs::write(&temp_path, render_settings(record))
                .map_err(|err| StoreError::io(&temp_path, err))?;
            fs::rename(&temp_path, &path).map_err(|err| StoreError::io(&path, err))?;
            self.signals.trigger(&signal_key(&path));
        }

        info!(
            "event=settings_save module=settings status=ok tenant={}",
            record.name()
        );
        self.notifier.notify(&ChangeEvent::TenantSaved(record.clone()));
        Ok(())
    }

    fn delete(&self, name: &str) -> StoreResult<TenantRecord> {
        let disabled = {
            let _guard = self.write_lock.lock();
            let dir = self
                .find_tenant_dir(name.trim())
                .ok_or_else(|| StoreError::NotFound(name.trim().to_string()))?;
            let record = self
                .read_record(&dir)?
                .ok_or_else(|| StoreError::NotFound(name.trim().to_string()))?;
            fs::remove_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
            self.signals
                .trigger(&signal_key(&dir.join(SETTINGS_FILE_NAME)));
            record.with_state(TenantState::Disabled)
        };

        info!(
            "event=settings_delete module=settings status=ok tenant={}",
            disabled.name()
        );
        self.notifier
            .notify(&ChangeEvent::TenantDeleted(disabled.clone()));
        Ok(disabled)
    }

    fn subscribe(&self, observer: Weak<dyn ChangeObserver>) {
        self.notifier.subscribe(observer);
    }
}

/// Parses `Key: Value` lines. Later duplicates win; `#` starts a comment line.
pub fn parse_settings(text: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() || value.eq_ignore_ascii_case("null") {
            continue;
        }
        values.insert(key.to_string(), value.to_string());
    }
    values
}

/// Renders a record as sorted `Key: Value` lines.
pub fn render_settings(record: &TenantRecord) -> String {
    record
        .values()
        .iter()
        .map(|(key, value)| format!("{key}: {}\n", value.replace(['\r', '\n'], " ")))
        .collect()
}

fn signal_key(path: &Path) -> String {
    path.to_string_lossy().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{parse_settings, render_settings};
    use crate::model::tenant::TenantRecord;

    #[test]
    fn parse_skips_comments_blank_and_null_values() {
        let values = parse_settings(
            "# tenant\nName: Acme\nDataProvider: null\n\nDataConnectionString: Data Source=a;Mode=b:c\nbroken line\n",
        );
        assert_eq!(values.get("Name").map(String::as_str), Some("Acme"));
        assert!(!values.contains_key("DataProvider"));
        assert_eq!(
            values.get("DataConnectionString").map(String::as_str),
            Some("Data Source=a;Mode=b:c")
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn render_is_sorted_and_single_line() {
        let record = TenantRecord::new("Acme")
            .unwrap()
            .with_value("Zeta", "last")
            .with_value("Alpha", "first\nsecond");
        let text = render_settings(&record);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["Alpha: first second", "Name: Acme", "State: Uninitialized", "Zeta: last"]
        );
    }
}
