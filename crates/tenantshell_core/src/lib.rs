//! Core of the tenant shell host.
//!
//! Builds one isolated, lazily composed runtime per tenant from a settings
//! record, a revisioned feature set and the feature catalog, and keeps those
//! runtimes coherent while configuration changes underneath them.

pub mod composition;
pub mod db;
pub mod extension;
pub mod kernel;
pub mod logging;
pub mod model;
pub mod routing;
pub mod runtime;
pub mod settings;
pub mod signals;
pub mod work;

pub use composition::{Blueprint, BlueprintComposer, BlueprintItem, CompositionError};
pub use extension::capability::ItemCapability;
pub use extension::catalog::{ExportedItem, FeatureCatalog, StaticFeatureCatalog};
pub use extension::manifest::{ExportDeclaration, FeatureManifest};
pub use kernel::{
    BackgroundSweep, BackgroundTask, KernelError, KernelOptions, KernelParts, KernelResult,
    TenantKernel, TenantStatus,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::feature_set::FeatureSet;
pub use model::tenant::{TenantRecord, TenantState};
pub use routing::TenantRouter;
pub use runtime::{Runtime, RuntimeFactory, ScopeBuilder, ServiceScope, Shell, TypeUniverse};
pub use settings::{
    FeatureSetStore, FileSettingsStore, InMemorySettingsStore, SettingsStore,
    SqliteFeatureSetStore,
};
pub use signals::{Signals, VolatileToken};
pub use work::{WorkContextAccessor, WorkScope, WorkScopeError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
