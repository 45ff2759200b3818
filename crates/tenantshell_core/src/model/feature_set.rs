//! Revisioned feature set model.
//!
//! # Invariants
//! - Feature names are unique; iteration order is sorted and carries no meaning.
//! - `revision` only grows. A runtime built at revision N is stale once the
//!   stored revision exceeds N.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Enabled-feature descriptor for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    tenant: String,
    revision: u64,
    features: BTreeSet<String>,
}

impl FeatureSet {
    pub fn new<I, S>(tenant: &str, revision: u64, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tenant: tenant.trim().to_string(),
            revision,
            features: features
                .into_iter()
                .map(|feature| feature.as_ref().trim().to_string())
                .filter(|feature| !feature.is_empty())
                .collect(),
        }
    }

    /// Feature set of a tenant that never stored one.
    pub fn empty(tenant: &str) -> Self {
        Self::new::<_, &str>(tenant, 0, [])
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn features(&self) -> &BTreeSet<String> {
        &self.features
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Whether a snapshot at this revision is outdated by `current_revision`.
    pub fn is_stale_against(&self, current_revision: u64) -> bool {
        current_revision > self.revision
    }

    /// Returns the next revision carrying `features`.
    pub fn advanced<I, S>(&self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(&self.tenant, self.revision + 1, features)
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureSet;

    #[test]
    fn dedups_and_trims_feature_names() {
        let set = FeatureSet::new("Acme", 1, ["a", " a ", "b", ""]);
        assert_eq!(set.features().len(), 2);
        assert!(set.contains("a"));
        assert!(set.contains("b"));
    }

    #[test]
    fn advanced_bumps_revision() {
        let set = FeatureSet::new("Acme", 3, ["a"]);
        let next = set.advanced(["a", "c"]);
        assert_eq!(next.revision(), 4);
        assert!(set.is_stale_against(next.revision()));
        assert!(!next.is_stale_against(next.revision()));
    }

    #[test]
    fn empty_set_is_revision_zero() {
        let set = FeatureSet::empty("Acme");
        assert_eq!(set.revision(), 0);
        assert!(set.is_empty());
    }
}
