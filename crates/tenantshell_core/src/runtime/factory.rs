//! Blueprint → runtime.
//!
//! # Responsibility
//! - Create one isolated child scope of the process root per build.
//! - Bind every blueprint item under its logical name, its identity and every
//!   tag it was filed under.
//!
//! # Invariants
//! - Nothing is activated during build except the shell object.
//! - Any unknown identity fails the whole build; the half-built scope is
//!   dropped and never exposed.

use crate::composition::Blueprint;
use crate::runtime::scope::{ScopeError, ServiceScope};
use crate::runtime::shell::Shell;
use crate::runtime::tenant_runtime::Runtime;
use crate::runtime::universe::TypeUniverse;
use crate::signals::VolatileToken;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Scope key of the tenant record inside a runtime scope.
pub const TENANT_RECORD_KEY: &str = "tenant.record";
/// Scope key of the feature set inside a runtime scope.
pub const FEATURE_SET_KEY: &str = "tenant.feature_set";
/// Scope key of the shell object inside a runtime scope.
pub const SHELL_KEY: &str = "tenant.shell";

pub type BuildResult<T> = Result<T, BuildError>;

pub struct RuntimeFactory {
    root: ServiceScope,
    universe: Arc<TypeUniverse>,
}

impl RuntimeFactory {
    pub fn new(root: ServiceScope, universe: Arc<TypeUniverse>) -> Self {
        Self { root, universe }
    }

    pub fn root(&self) -> &ServiceScope {
        &self.root
    }

    pub fn universe(&self) -> &TypeUniverse {
        &self.universe
    }

    pub fn build(
        &self,
        blueprint: Blueprint,
        token: Arc<VolatileToken>,
    ) -> BuildResult<Runtime> {
        let tenant = blueprint.record().name().to_string();
        let result = self.build_scope(&blueprint);
        let (scope, shell) = match result {
            Ok(built) => built,
            Err(err) => {
                error!(
                    "event=runtime_build module=runtime status=error tenant={} error={err}",
                    tenant
                );
                return Err(err);
            }
        };

        let runtime = Runtime::new(blueprint, scope, shell, token);
        info!(
            "event=runtime_build module=runtime status=ok tenant={} runtime={} revision={} items={}",
            tenant,
            runtime.id(),
            runtime.revision(),
            runtime.blueprint().item_count()
        );
        Ok(runtime)
    }

    fn build_scope(&self, blueprint: &Blueprint) -> BuildResult<(ServiceScope, Arc<Shell>)> {
        let record = blueprint.record();
        let features = blueprint.feature_set();
        let mut builder = self.root.child(&format!("tenant:{}", record.name()));

        builder.register_instance(TENANT_RECORD_KEY, Arc::new(record.clone()))?;
        builder.register_instance(FEATURE_SET_KEY, Arc::new(features.clone()))?;

        for (item, tags) in blueprint.tagged_items() {
            let definition =
                self.universe
                    .get(&item.identity)
                    .ok_or_else(|| BuildError::UnknownType {
                        identity: item.identity.clone(),
                        feature: item.feature.clone(),
                    })?;
            let registration = definition.instantiate();
            let logical_name = item.logical_name();
            builder.register(
                Arc::clone(&registration),
                &[logical_name.as_str(), item.identity.as_str()],
            )?;
            for tag in tags {
                builder.tag(tag, &registration);
            }
        }

        builder.register_instance(
            SHELL_KEY,
            Arc::new(Shell::new(
                record.name(),
                features.revision(),
                blueprint.enabled_features().to_vec(),
            )),
        )?;

        let scope = builder.finish();
        let shell = scope.resolve::<Shell>(SHELL_KEY)?;
        Ok((scope, shell))
    }
}

/// Runtime build failures. Fatal to one build attempt only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    UnknownType { identity: String, feature: String },
    Scope(ScopeError),
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownType { identity, feature } => write!(
                f,
                "feature `{feature}` exports `{identity}`, which is not a registered component"
            ),
            Self::Scope(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Scope(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ScopeError> for BuildError {
    fn from(value: ScopeError) -> Self {
        Self::Scope(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildError, RuntimeFactory, TENANT_RECORD_KEY};
    use crate::composition::BlueprintComposer;
    use crate::extension::catalog::StaticFeatureCatalog;
    use crate::extension::manifest::{ExportDeclaration, FeatureManifest};
    use crate::model::feature_set::FeatureSet;
    use crate::model::tenant::TenantRecord;
    use crate::runtime::scope::{Lifetime, ScopeBuilder};
    use crate::runtime::universe::TypeUniverse;
    use crate::signals::VolatileToken;
    use std::sync::Arc;

    struct Greeter(&'static str);

    fn composer() -> BlueprintComposer {
        let mut catalog = StaticFeatureCatalog::new();
        catalog
            .register_manifest(
                &FeatureManifest::new("greet", "1.0.0")
                    .export(ExportDeclaration::new("Greeter", &["controller", "dependency"])),
            )
            .unwrap();
        BlueprintComposer::new(Arc::new(catalog))
    }

    #[test]
    fn binds_items_by_logical_name_identity_and_tag() {
        let mut universe = TypeUniverse::new();
        universe
            .register("Greeter", Lifetime::Singleton, |_| Ok(Greeter("hi")))
            .unwrap();
        let factory = RuntimeFactory::new(ScopeBuilder::root("root").finish(), Arc::new(universe));
        let record = TenantRecord::new("Acme").unwrap();
        let blueprint = composer()
            .compose(&record, &FeatureSet::new("Acme", 1, ["greet"]))
            .unwrap();

        let runtime = factory
            .build(blueprint, Arc::new(VolatileToken::new("acme")))
            .unwrap();
        let by_identity = runtime.resolve::<Greeter>("Greeter").unwrap();
        let by_name = runtime.resolve::<Greeter>("greet::Greeter").unwrap();
        assert!(Arc::ptr_eq(&by_identity, &by_name));
        assert_eq!(by_identity.0, "hi");

        let controllers = runtime.scope().resolve_all::<Greeter>("controllers").unwrap();
        let dependencies = runtime.scope().resolve_all::<Greeter>("dependencies").unwrap();
        assert_eq!(controllers.len(), 1);
        assert!(Arc::ptr_eq(&controllers[0], &dependencies[0]));

        let stored = runtime.resolve::<TenantRecord>(TENANT_RECORD_KEY).unwrap();
        assert_eq!(stored.name(), "Acme");
        assert_eq!(runtime.shell().tenant(), "Acme");
    }

    #[test]
    fn unknown_identity_fails_the_build() {
        let factory = RuntimeFactory::new(
            ScopeBuilder::root("root").finish(),
            Arc::new(TypeUniverse::new()),
        );
        let record = TenantRecord::new("Acme").unwrap();
        let blueprint = composer()
            .compose(&record, &FeatureSet::new("Acme", 1, ["greet"]))
            .unwrap();
        let err = factory
            .build(blueprint, Arc::new(VolatileToken::new("acme")))
            .err()
            .unwrap();
        assert_eq!(
            err,
            BuildError::UnknownType {
                identity: "Greeter".to_string(),
                feature: "greet".to_string(),
            }
        );
    }
}
