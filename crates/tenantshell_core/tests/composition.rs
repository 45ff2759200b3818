mod common;

use common::{catalog, Controller, Tally};
use std::collections::BTreeSet;
use std::sync::Arc;
use tenantshell_core::extension::capability::{TAG_CONTROLLERS, TAG_DEPENDENCIES};
use tenantshell_core::extension::manifest::{ExportDeclaration, FeatureManifest};
use tenantshell_core::model::feature_set::FeatureSet;
use tenantshell_core::model::tenant::TenantRecord;
use tenantshell_core::runtime::{RuntimeFactory, ScopeBuilder};
use tenantshell_core::signals::VolatileToken;
use tenantshell_core::{BlueprintComposer, CompositionError, StaticFeatureCatalog};

fn acme() -> TenantRecord {
    TenantRecord::new("Acme").unwrap()
}

#[test]
fn cold_start_composes_and_builds_enabled_controllers() {
    let composer = BlueprintComposer::new(Arc::new(catalog()));
    let blueprint = composer
        .compose(&acme(), &FeatureSet::new("Acme", 1, ["a", "b"]))
        .unwrap();

    assert_eq!(
        blueprint.identities(TAG_CONTROLLERS),
        BTreeSet::from(["C1", "C2"])
    );

    let tally = Arc::new(Tally::default());
    let factory = RuntimeFactory::new(
        ScopeBuilder::root("root").finish(),
        Arc::new(common::universe(&tally)),
    );
    let runtime = factory
        .build(blueprint, Arc::new(VolatileToken::new("acme")))
        .unwrap();
    assert_eq!(runtime.resolve::<Controller>("C1").unwrap().0, "C1");
    assert_eq!(runtime.resolve::<Controller>("b::C2").unwrap().0, "C2");
    assert_eq!(
        runtime
            .scope()
            .resolve_all::<Controller>(TAG_CONTROLLERS)
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn composing_twice_yields_identical_membership() {
    let composer = BlueprintComposer::new(Arc::new(catalog()));
    let features = FeatureSet::new("Acme", 7, ["watched", "c", "a", "stateful"]);

    let first = composer.compose(&acme(), &features).unwrap();
    let second = composer.compose(&acme(), &features).unwrap();

    let first_tags: Vec<&str> = first.tags().collect();
    let second_tags: Vec<&str> = second.tags().collect();
    assert_eq!(first_tags, second_tags);
    for tag in first_tags {
        assert_eq!(first.identities(tag), second.identities(tag), "tag {tag}");
    }
    assert_eq!(first.enabled_features(), second.enabled_features());
}

#[test]
fn excluded_items_never_reach_the_blueprint() {
    let composer = BlueprintComposer::new(Arc::new(catalog())).with_exclusions(["C2"]);
    let blueprint = composer
        .compose(&acme(), &FeatureSet::new("Acme", 1, ["a", "b", "c"]))
        .unwrap();

    assert!(!blueprint.contains("C2"));
    assert_eq!(
        blueprint.identities(TAG_CONTROLLERS),
        BTreeSet::from(["C1", "C3"])
    );
}

#[test]
fn suppressed_items_are_excluded_and_dependencies_are_pulled_in() {
    let mut catalog = StaticFeatureCatalog::new();
    catalog
        .register_manifest(
            &FeatureManifest::new("base", "1.0.0")
                .export(ExportDeclaration::new("Renderer", &["dependency"])),
        )
        .unwrap();
    catalog
        .register_manifest(
            &FeatureManifest::new("theme", "1.2.0")
                .depends_on("base")
                .export(
                    ExportDeclaration::new("ThemedRenderer", &["dependency"])
                        .suppressing("Renderer"),
                ),
        )
        .unwrap();
    let composer = BlueprintComposer::new(Arc::new(catalog));

    let blueprint = composer
        .compose(&acme(), &FeatureSet::new("Acme", 1, ["theme"]))
        .unwrap();

    assert_eq!(blueprint.enabled_features(), ["base", "theme"]);
    assert_eq!(
        blueprint.identities(TAG_DEPENDENCIES),
        BTreeSet::from(["ThemedRenderer"])
    );
}

#[test]
fn unknown_enabled_feature_is_a_hard_error() {
    let composer = BlueprintComposer::new(Arc::new(catalog()));
    let err = composer
        .compose(&acme(), &FeatureSet::new("Acme", 1, ["a", "ghost"]))
        .unwrap_err();
    assert_eq!(err, CompositionError::MissingFeature("ghost".to_string()));
}
