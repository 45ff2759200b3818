//! Built-in `host` feature wired into every tenant the CLI composes.

use log::info;
use std::sync::Arc;
use tenantshell_core::extension::capability::{
    CAPABILITY_SHELL_EVENTS, CAPABILITY_WORK_OBSERVER,
};
use tenantshell_core::runtime::ShellEvents;
use tenantshell_core::work::WorkObserver;
use tenantshell_core::{
    BlueprintComposer, ExportDeclaration, FeatureManifest, Shell, StaticFeatureCatalog,
    TypeUniverse, WorkScope,
};

pub const HOST_FEATURE: &str = "host";
const SHELL_LOG: &str = "host.shell-log";
const WORK_LOG: &str = "host.work-log";

struct ShellLog;

impl ShellEvents for ShellLog {
    fn activated(&self, shell: &Shell) {
        info!(
            "event=shell_activated module=cli status=ok tenant={} revision={}",
            shell.tenant(),
            shell.revision()
        );
    }

    fn terminating(&self, shell: &Shell) {
        info!(
            "event=shell_terminating module=cli status=ok tenant={} revision={}",
            shell.tenant(),
            shell.revision()
        );
    }
}

struct WorkLog;

impl WorkObserver for WorkLog {
    fn work_started(&self, scope: &WorkScope) {
        info!(
            "event=work_start module=cli status=ok tenant={} work={}",
            scope.tenant(),
            scope.id()
        );
    }

    fn work_finished(&self, scope: &WorkScope) {
        info!(
            "event=work_end module=cli status=ok tenant={} work={}",
            scope.tenant(),
            scope.id()
        );
    }
}

/// Catalog holding only the `host` feature.
pub fn catalog() -> Result<StaticFeatureCatalog, String> {
    let manifest = FeatureManifest::new(HOST_FEATURE, env!("CARGO_PKG_VERSION"))
        .export(ExportDeclaration::new(SHELL_LOG, &[CAPABILITY_SHELL_EVENTS]))
        .export(ExportDeclaration::new(WORK_LOG, &[CAPABILITY_WORK_OBSERVER]));
    let mut catalog = StaticFeatureCatalog::new();
    catalog
        .register_manifest(&manifest)
        .map_err(|err| err.to_string())?;
    Ok(catalog)
}

pub fn universe() -> Result<TypeUniverse, String> {
    let mut universe = TypeUniverse::new();
    universe
        .register_shell_events(SHELL_LOG, |_| Ok(ShellLog))
        .map_err(|err| err.to_string())?;
    universe
        .register_work_observer(WORK_LOG, |_| Ok(WorkLog))
        .map_err(|err| err.to_string())?;
    Ok(universe)
}

pub fn composer() -> Result<BlueprintComposer, String> {
    Ok(BlueprintComposer::new(Arc::new(catalog()?)).with_core_feature(HOST_FEATURE))
}
