//! Blueprint composition.
//!
//! # Responsibility
//! - Expand enabled features with their declared dependencies.
//! - File each exported item under the capability tags whose rule accepts it.
//!
//! # Invariants
//! - Pure given stable catalog output: same inputs, same membership.
//! - An item whose identity is excluded never appears under any tag.
//! - Missing features and dependency cycles fail the whole composition.

use crate::composition::blueprint::{Blueprint, BlueprintItem};
use crate::extension::capability::ItemCapability;
use crate::extension::catalog::{ExportedItem, FeatureCatalog};
use crate::model::feature_set::FeatureSet;
use crate::model::tenant::TenantRecord;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type CompositionResult<T> = Result<T, CompositionError>;

type ItemPredicate = Arc<dyn Fn(&ExportedItem) -> bool + Send + Sync>;

/// Tag plus the predicate selecting items filed under it.
#[derive(Clone)]
pub struct CategoryRule {
    tag: String,
    predicate: ItemPredicate,
}

impl CategoryRule {
    pub fn new<F>(tag: &str, predicate: F) -> Self
    where
        F: Fn(&ExportedItem) -> bool + Send + Sync + 'static,
    {
        Self {
            tag: tag.to_string(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn for_capability(capability: ItemCapability) -> Self {
        Self::new(capability.tag(), move |item| item.has(capability))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn accepts(&self, item: &ExportedItem) -> bool {
        (self.predicate)(item)
    }
}

/// One rule per item capability.
pub fn default_rules() -> Vec<CategoryRule> {
    ItemCapability::ALL
        .into_iter()
        .map(CategoryRule::for_capability)
        .collect()
}

pub struct BlueprintComposer {
    catalog: Arc<dyn FeatureCatalog>,
    rules: Vec<CategoryRule>,
    exclusions: BTreeSet<String>,
    core_features: BTreeSet<String>,
}

impl BlueprintComposer {
    pub fn new(catalog: Arc<dyn FeatureCatalog>) -> Self {
        Self {
            catalog,
            rules: default_rules(),
            exclusions: BTreeSet::new(),
            core_features: BTreeSet::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<CategoryRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_exclusions<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclusions
            .extend(identities.into_iter().map(|id| id.as_ref().trim().to_string()));
        self
    }

    /// Adds a feature enabled for every tenant.
    pub fn with_core_feature(mut self, feature: &str) -> Self {
        self.core_features.insert(feature.trim().to_string());
        self
    }

    pub fn catalog(&self) -> &Arc<dyn FeatureCatalog> {
        &self.catalog
    }

    pub fn compose(
        &self,
        record: &TenantRecord,
        features: &FeatureSet,
    ) -> CompositionResult<Blueprint> {
        let requested: BTreeSet<String> = self
            .core_features
            .iter()
            .chain(features.features())
            .cloned()
            .collect();
        let enabled = self.resolve_features(&requested)?;

        let mut exported: Vec<(String, Vec<ExportedItem>)> = Vec::with_capacity(enabled.len());
        for feature in &enabled {
            let items = self
                .catalog
                .exported_items(feature)
                .ok_or_else(|| CompositionError::CatalogInconsistent(feature.clone()))?;
            exported.push((feature.clone(), items));
        }

        let mut exclusions = self.exclusions.clone();
        for (_, items) in &exported {
            for item in items {
                exclusions.extend(item.suppresses.iter().cloned());
            }
        }

        let mut categories: BTreeMap<String, BTreeSet<BlueprintItem>> = BTreeMap::new();
        for (feature, items) in &exported {
            for item in items {
                if exclusions.contains(&item.identity) {
                    debug!(
                        "event=compose_exclude module=composition status=skip tenant={} item={}",
                        record.name(),
                        item.identity
                    );
                    continue;
                }
                for rule in &self.rules {
                    if rule.accepts(item) {
                        categories
                            .entry(rule.tag.clone())
                            .or_default()
                            .insert(BlueprintItem::new(&item.identity, feature));
                    }
                }
            }
        }

        let blueprint = Blueprint::new(record.clone(), features.clone(), enabled, categories);
        info!(
            "event=compose module=composition status=ok tenant={} revision={} features={} items={}",
            record.name(),
            features.revision(),
            blueprint.enabled_features().len(),
            blueprint.item_count()
        );
        Ok(blueprint)
    }

    /// Expands `requested` with dependencies, dependencies first.
    ///
    /// Traversal is in sorted name order, so output is deterministic.
    pub fn resolve_features(
        &self,
        requested: &BTreeSet<String>,
    ) -> CompositionResult<Vec<String>> {
        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        let mut order = Vec::new();
        for feature in requested {
            self.visit(feature, None, &mut marks, &mut stack, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        feature: &str,
        required_by: Option<&str>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> CompositionResult<()> {
        match marks.get(feature) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|f| f == feature).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(feature.to_string());
                return Err(CompositionError::DependencyCycle(cycle));
            }
            None => {}
        }

        let descriptor = self.catalog.descriptor(feature).ok_or_else(|| match required_by {
            Some(parent) => CompositionError::MissingDependency {
                feature: parent.to_string(),
                dependency: feature.to_string(),
            },
            None => CompositionError::MissingFeature(feature.to_string()),
        })?;

        marks.insert(feature.to_string(), Mark::Visiting);
        stack.push(feature.to_string());

        let mut dependencies = descriptor.dependencies;
        dependencies.sort();
        dependencies.dedup();
        for dependency in &dependencies {
            self.visit(dependency, Some(feature), marks, stack, order)?;
        }

        stack.pop();
        marks.insert(feature.to_string(), Mark::Done);
        order.push(feature.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Composition failures. Fatal to one build attempt only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionError {
    MissingFeature(String),
    MissingDependency { feature: String, dependency: String },
    DependencyCycle(Vec<String>),
    /// The catalog advertised a feature but returned no items for it.
    CatalogInconsistent(String),
}

impl Display for CompositionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFeature(feature) => {
                write!(f, "enabled feature is not in the catalog: {feature}")
            }
            Self::MissingDependency {
                feature,
                dependency,
            } => write!(
                f,
                "feature `{feature}` depends on `{dependency}`, which is not in the catalog"
            ),
            Self::DependencyCycle(path) => {
                write!(f, "feature dependency cycle: {}", path.join(" -> "))
            }
            Self::CatalogInconsistent(feature) => {
                write!(f, "catalog returned no exports for known feature: {feature}")
            }
        }
    }
}

impl Error for CompositionError {}
