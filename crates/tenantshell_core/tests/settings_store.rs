use parking_lot::Mutex;
use std::fs;
use std::sync::{Arc, Weak};
use tenantshell_core::db::migrations::latest_version;
use tenantshell_core::db::open_db;
use tenantshell_core::model::tenant::{
    TenantRecord, TenantState, KEY_DATA_PROVIDER, KEY_REQUEST_URL_PREFIX,
};
use tenantshell_core::settings::file_store::SETTINGS_FILE_NAME;
use tenantshell_core::settings::{
    ChangeEvent, ChangeObserver, FeatureSetStore, FileSettingsStore, SettingsStore,
    SqliteFeatureSetStore, StoreError,
};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ChangeEvent>>,
}

impl ChangeObserver for Recorder {
    fn on_change(&self, event: &ChangeEvent) {
        self.events.lock().push(event.clone());
    }
}

fn subscribe(store: &dyn SettingsStore) -> Arc<Recorder> {
    let recorder = Arc::new(Recorder::default());
    let weak: Weak<dyn ChangeObserver> = Arc::downgrade(&recorder) as Weak<dyn ChangeObserver>;
    store.subscribe(weak);
    recorder
}

#[test]
fn file_store_saves_loads_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSettingsStore::new(dir.path());
    let recorder = subscribe(&store);

    let acme = TenantRecord::new("Acme")
        .unwrap()
        .with_state(TenantState::Running)
        .with_value(KEY_DATA_PROVIDER, "Sqlite")
        .with_value(KEY_REQUEST_URL_PREFIX, "acme");
    store.save(&acme).unwrap();
    store.save(&TenantRecord::new("Beta").unwrap()).unwrap();

    assert!(dir.path().join("Acme").join(SETTINGS_FILE_NAME).is_file());
    let loaded = store.load_all().unwrap();
    let names: Vec<&str> = loaded.iter().map(TenantRecord::name).collect();
    assert_eq!(names, vec!["Acme", "Beta"]);
    assert_eq!(loaded[0], acme);
    assert_eq!(store.load_all().unwrap(), loaded);

    let events = recorder.events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ChangeEvent::TenantSaved(acme));
}

#[test]
fn file_store_falls_back_to_directory_name_and_skips_bare_dirs() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("Legacy")).unwrap();
    fs::write(
        dir.path().join("Legacy").join(SETTINGS_FILE_NAME),
        "State: Running\nDataProvider: null\n",
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("Empty")).unwrap();

    let store = FileSettingsStore::new(dir.path());
    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name(), "Legacy");
    assert_eq!(loaded[0].state(), TenantState::Running);
    assert_eq!(loaded[0].data_provider(), None);
}

#[test]
fn file_store_delete_disables_removes_and_expires_token() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSettingsStore::new(dir.path());
    store
        .save(&TenantRecord::new("Acme").unwrap().with_state(TenantState::Running))
        .unwrap();
    let token = store.settings_token("acme");
    assert!(token.is_current());
    let recorder = subscribe(&store);

    let disabled = store.delete("ACME").unwrap();
    assert_eq!(disabled.state(), TenantState::Disabled);
    assert!(!dir.path().join("Acme").exists());
    assert!(!token.is_current());
    assert!(store.load_all().unwrap().is_empty());
    assert_eq!(
        recorder.events.lock().as_slice(),
        [ChangeEvent::TenantDeleted(disabled)]
    );

    assert_eq!(
        store.delete("Acme").unwrap_err(),
        StoreError::NotFound("Acme".to_string())
    );
}

#[test]
fn missing_root_loads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSettingsStore::new(dir.path().join("absent"));
    assert!(store.load_all().unwrap().is_empty());
}

#[test]
fn feature_sets_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("features.db");

    {
        let store = SqliteFeatureSetStore::open(&path).unwrap();
        store.save("Acme", &["a", "b"]).unwrap();
        store.save("acme", &["a", "b", "c"]).unwrap();
    }

    let store = SqliteFeatureSetStore::open(&path).unwrap();
    assert_eq!(store.revision("ACME").unwrap(), 2);
    let loaded = store.load("Acme").unwrap();
    assert_eq!(loaded.revision(), 2);
    assert!(loaded.contains("c"));
    assert_eq!(store.revision("Other").unwrap(), 0);

    let conn = open_db(&path).unwrap();
    let version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, latest_version());
}
