#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tenantshell_core::extension::catalog::{ExportedItem, FeatureCatalog, FeatureDescriptor};
use tenantshell_core::extension::manifest::{ExportDeclaration, FeatureManifest};
use tenantshell_core::kernel::{BackgroundTask, KernelOptions, KernelParts, TenantKernel};
use tenantshell_core::model::tenant::{TenantRecord, TenantState};
use tenantshell_core::runtime::{Lifetime, RuntimeFactory, ScopeBuilder, Shell, ShellEvents};
use tenantshell_core::settings::{InMemorySettingsStore, SqliteFeatureSetStore};
use tenantshell_core::work::{producer, StateProducer, StateProvider, StateRequest, WorkObserver};
use tenantshell_core::{BlueprintComposer, StaticFeatureCatalog, TypeUniverse, WorkScope};

/// Controller item resolved by identity in tests.
pub struct Controller(pub &'static str);

/// Shared recorder for everything the fixture components observe.
pub struct Tally {
    pub state_calls: AtomicUsize,
    pub tasks_run: AtomicUsize,
    pub events: Mutex<Vec<String>>,
    pub gate: Barrier,
}

impl Default for Tally {
    fn default() -> Self {
        Self {
            state_calls: AtomicUsize::new(0),
            tasks_run: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            gate: Barrier::new(2),
        }
    }
}

impl Tally {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

struct CountingProvider {
    tally: Arc<Tally>,
}

impl StateProvider for CountingProvider {
    fn try_provide(&self, request: &StateRequest<'_>) -> Option<StateProducer> {
        if request.name() != "X" || !request.is::<String>() {
            return None;
        }
        self.tally.state_calls.fetch_add(1, Ordering::SeqCst);
        Some(producer(|scope: &WorkScope| format!("x-for-{}", scope.tenant())))
    }
}

struct RecordingObserver {
    tally: Arc<Tally>,
}

impl WorkObserver for RecordingObserver {
    fn work_started(&self, scope: &WorkScope) {
        self.tally.record(format!("work_started:{}", scope.tenant()));
    }

    fn work_finished(&self, scope: &WorkScope) {
        self.tally.record(format!("work_finished:{}", scope.tenant()));
    }
}

struct RecordingShellEvents {
    tally: Arc<Tally>,
}

impl ShellEvents for RecordingShellEvents {
    fn activated(&self, shell: &Shell) {
        self.tally
            .record(format!("activated:{}:{}", shell.tenant(), shell.revision()));
    }

    fn terminating(&self, shell: &Shell) {
        self.tally
            .record(format!("terminating:{}:{}", shell.tenant(), shell.revision()));
    }
}

struct CountingTask {
    tally: Arc<Tally>,
}

impl BackgroundTask for CountingTask {
    fn name(&self) -> &str {
        "counting"
    }

    fn sweep(&self, _scope: &WorkScope) -> Result<(), String> {
        self.tally.tasks_run.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingTask;

impl BackgroundTask for FailingTask {
    fn name(&self) -> &str {
        "failing"
    }

    fn sweep(&self, scope: &WorkScope) -> Result<(), String> {
        Err(format!("cannot sweep {}", scope.tenant()))
    }
}

/// Blocks inside the sweep until the test thread meets it at `gate` twice.
struct GatedTask {
    tally: Arc<Tally>,
}

impl BackgroundTask for GatedTask {
    fn sweep(&self, _scope: &WorkScope) -> Result<(), String> {
        self.tally.gate.wait();
        self.tally.gate.wait();
        Ok(())
    }
}

/// Features `a`/`b`/`c` export controllers `C1`/`C2`/`C3`.
pub fn catalog() -> StaticFeatureCatalog {
    let manifests = [
        FeatureManifest::new("a", "1.0.0").export(ExportDeclaration::new("C1", &["controller"])),
        FeatureManifest::new("b", "1.0.0").export(ExportDeclaration::new("C2", &["controller"])),
        FeatureManifest::new("c", "1.0.0").export(ExportDeclaration::new("C3", &["controller"])),
        FeatureManifest::new("stateful", "1.0.0").export(ExportDeclaration::new(
            "stateful.counter",
            &["state_provider"],
        )),
        FeatureManifest::new("watched", "1.0.0")
            .export(ExportDeclaration::new(
                "watched.observer",
                &["work_observer"],
            ))
            .export(ExportDeclaration::new("watched.shell", &["shell_events"])),
        FeatureManifest::new("broken", "1.0.0")
            .export(ExportDeclaration::new("broken.missing", &["dependency"])),
        FeatureManifest::new("tasks", "1.0.0")
            .export(ExportDeclaration::new("tasks.counting", &["background_task"]))
            .export(ExportDeclaration::new("tasks.failing", &["background_task"])),
        FeatureManifest::new("gated", "1.0.0")
            .export(ExportDeclaration::new("gated.task", &["background_task"])),
    ];
    let mut catalog = StaticFeatureCatalog::new();
    for manifest in &manifests {
        catalog.register_manifest(manifest).unwrap();
    }
    catalog
}

/// Everything in `catalog` except `broken.missing`.
pub fn universe(tally: &Arc<Tally>) -> TypeUniverse {
    let mut universe = TypeUniverse::new();
    for (identity, label) in [("C1", "C1"), ("C2", "C2"), ("C3", "C3")] {
        universe
            .register(identity, Lifetime::Singleton, move |_| Ok(Controller(label)))
            .unwrap();
    }

    let p = Arc::clone(tally);
    universe
        .register_state_provider("stateful.counter", move |_| {
            Ok(CountingProvider {
                tally: Arc::clone(&p),
            })
        })
        .unwrap();
    let p = Arc::clone(tally);
    universe
        .register_work_observer("watched.observer", move |_| {
            Ok(RecordingObserver {
                tally: Arc::clone(&p),
            })
        })
        .unwrap();
    let p = Arc::clone(tally);
    universe
        .register_shell_events("watched.shell", move |_| {
            Ok(RecordingShellEvents {
                tally: Arc::clone(&p),
            })
        })
        .unwrap();
    let p = Arc::clone(tally);
    universe
        .register_background_task("tasks.counting", move |_| {
            Ok(CountingTask {
                tally: Arc::clone(&p),
            })
        })
        .unwrap();
    universe
        .register_background_task("tasks.failing", |_| Ok(FailingTask))
        .unwrap();
    let p = Arc::clone(tally);
    universe
        .register_background_task("gated.task", move |_| {
            Ok(GatedTask {
                tally: Arc::clone(&p),
            })
        })
        .unwrap();
    universe
}

pub fn running(name: &str) -> TenantRecord {
    TenantRecord::new(name)
        .unwrap()
        .with_state(TenantState::Running)
}

pub struct Harness {
    pub settings: Arc<InMemorySettingsStore>,
    pub feature_sets: Arc<SqliteFeatureSetStore>,
    pub kernel: Arc<TenantKernel>,
    pub tally: Arc<Tally>,
}

impl Harness {
    /// Stores `features` as the next revision of `tenant`.
    pub fn enable(&self, tenant: &str, features: &[&str]) -> u64 {
        use tenantshell_core::settings::FeatureSetStore;
        self.feature_sets
            .save(tenant, features)
            .unwrap()
            .revision()
    }
}

pub fn harness(records: Vec<TenantRecord>) -> Harness {
    harness_with(records, KernelOptions::default())
}

pub fn harness_with(records: Vec<TenantRecord>, options: KernelOptions) -> Harness {
    harness_with_catalog(records, options, Arc::new(catalog()))
}

pub fn harness_with_catalog(
    records: Vec<TenantRecord>,
    options: KernelOptions,
    catalog: Arc<dyn FeatureCatalog>,
) -> Harness {
    let tally = Arc::new(Tally::default());
    let settings = Arc::new(InMemorySettingsStore::with_records(records));
    let feature_sets = Arc::new(SqliteFeatureSetStore::open_in_memory().unwrap());
    let kernel = TenantKernel::new(KernelParts {
        settings: settings.clone(),
        feature_sets: feature_sets.clone(),
        composer: BlueprintComposer::new(catalog),
        factory: RuntimeFactory::new(
            ScopeBuilder::root("root").finish(),
            Arc::new(universe(&tally)),
        ),
        options,
    })
    .unwrap();
    Harness {
        settings,
        feature_sets,
        kernel,
        tally,
    }
}

/// Wraps `catalog()` and stalls composition when it looks up `feature`.
///
/// The first lookup meets the test thread at `gate` twice; every lookup
/// then sleeps for `delay`.
pub struct StallingCatalog {
    inner: StaticFeatureCatalog,
    feature: &'static str,
    delay: Duration,
    gated: AtomicBool,
    pub gate: Barrier,
}

impl StallingCatalog {
    pub fn sleeping(feature: &'static str, delay: Duration) -> Self {
        Self {
            inner: catalog(),
            feature,
            delay,
            gated: AtomicBool::new(true),
            gate: Barrier::new(2),
        }
    }

    pub fn gated(feature: &'static str) -> Self {
        Self {
            gated: AtomicBool::new(false),
            ..Self::sleeping(feature, Duration::ZERO)
        }
    }
}

impl FeatureCatalog for StallingCatalog {
    fn available_features(&self) -> Vec<FeatureDescriptor> {
        self.inner.available_features()
    }

    fn exported_items(&self, feature: &str) -> Option<Vec<ExportedItem>> {
        self.inner.exported_items(feature)
    }

    fn descriptor(&self, feature: &str) -> Option<FeatureDescriptor> {
        if feature == self.feature {
            if !self.gated.swap(true, Ordering::SeqCst) {
                self.gate.wait();
                self.gate.wait();
            }
            thread::sleep(self.delay);
        }
        self.inner.descriptor(feature)
    }
}
