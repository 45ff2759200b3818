//! Composed description of one tenant runtime.

use crate::model::feature_set::FeatureSet;
use crate::model::tenant::TenantRecord;
use std::collections::{BTreeMap, BTreeSet};

/// One categorized item: a concrete identity plus the feature that owns it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlueprintItem {
    pub identity: String,
    pub feature: String,
}

impl BlueprintItem {
    pub fn new(identity: &str, feature: &str) -> Self {
        Self {
            identity: identity.to_string(),
            feature: feature.to_string(),
        }
    }

    /// Registration key combining owning feature and identity.
    pub fn logical_name(&self) -> String {
        format!("{}::{}", self.feature, self.identity)
    }
}

/// Immutable output of composition. Derived data; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    record: TenantRecord,
    features: FeatureSet,
    enabled: Vec<String>,
    categories: BTreeMap<String, BTreeSet<BlueprintItem>>,
}

impl Blueprint {
    pub(crate) fn new(
        record: TenantRecord,
        features: FeatureSet,
        enabled: Vec<String>,
        categories: BTreeMap<String, BTreeSet<BlueprintItem>>,
    ) -> Self {
        Self {
            record,
            features,
            enabled,
            categories,
        }
    }

    pub fn record(&self) -> &TenantRecord {
        &self.record
    }

    pub fn feature_set(&self) -> &FeatureSet {
        &self.features
    }

    /// Enabled features including dependencies, in dependency order.
    pub fn enabled_features(&self) -> &[String] {
        &self.enabled
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn items(&self, tag: &str) -> impl Iterator<Item = &BlueprintItem> {
        self.categories.get(tag).into_iter().flatten()
    }

    pub fn identities(&self, tag: &str) -> BTreeSet<&str> {
        self.items(tag).map(|item| item.identity.as_str()).collect()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.categories
            .values()
            .flatten()
            .any(|item| item.identity == identity)
    }

    /// Every distinct item with the tags it was filed under.
    pub fn tagged_items(&self) -> BTreeMap<&BlueprintItem, Vec<&str>> {
        let mut out: BTreeMap<&BlueprintItem, Vec<&str>> = BTreeMap::new();
        for (tag, items) in &self.categories {
            for item in items {
                out.entry(item).or_default().push(tag.as_str());
            }
        }
        out
    }

    pub fn item_count(&self) -> usize {
        self.tagged_items().len()
    }
}
