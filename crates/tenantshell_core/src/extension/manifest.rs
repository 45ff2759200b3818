//! Feature manifest declaration and validation.

use crate::extension::capability::{parse_item_capability, ItemCapabilityError};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Declarative feature manifest.
///
/// Exports are data only; the process-wide type universe supplies the
/// factories behind each exported identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureManifest {
    /// Stable feature identifier, e.g. `orders.core`.
    pub id: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
    /// Ids of features this one requires.
    pub dependencies: Vec<String>,
    pub exports: Vec<ExportDeclaration>,
}

impl FeatureManifest {
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
            dependencies: Vec::new(),
            exports: Vec::new(),
        }
    }

    pub fn depends_on(mut self, feature: &str) -> Self {
        self.dependencies.push(feature.to_string());
        self
    }

    pub fn export(mut self, export: ExportDeclaration) -> Self {
        self.exports.push(export);
        self
    }

    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(ManifestValidationError::EmptyId);
        }
        if !is_valid_feature_id(id) {
            return Err(ManifestValidationError::InvalidId(self.id.clone()));
        }

        if self.version.trim().is_empty() {
            return Err(ManifestValidationError::EmptyVersion);
        }
        if !is_semver_triplet(self.version.trim()) {
            return Err(ManifestValidationError::InvalidVersion(
                self.version.clone(),
            ));
        }

        for dependency in &self.dependencies {
            let dependency = dependency.trim();
            if dependency == id {
                return Err(ManifestValidationError::SelfDependency(id.to_string()));
            }
            if !is_valid_feature_id(dependency) {
                return Err(ManifestValidationError::InvalidDependency(
                    dependency.to_string(),
                ));
            }
        }

        let mut identities = BTreeSet::<&str>::new();
        for export in &self.exports {
            let identity = export.identity.trim();
            if identity.is_empty() {
                return Err(ManifestValidationError::EmptyIdentity);
            }
            if !identities.insert(identity) {
                return Err(ManifestValidationError::DuplicateExport(
                    identity.to_string(),
                ));
            }
            if export.capabilities.is_empty() {
                return Err(ManifestValidationError::MissingCapabilities(
                    identity.to_string(),
                ));
            }

            let mut dedup = BTreeSet::new();
            for capability in &export.capabilities {
                let parsed = parse_item_capability(capability)
                    .map_err(ManifestValidationError::Capability)?;
                if !dedup.insert(parsed) {
                    return Err(ManifestValidationError::DuplicateCapability(
                        capability.trim().to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One exported item of a feature manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDeclaration {
    /// Concrete identity; must exist in the type universe at build time.
    pub identity: String,
    /// Capability strings (`controller|record_type|dependency|...`).
    pub capabilities: Vec<String>,
    /// Identities this item supersedes when enabled.
    pub suppresses: Vec<String>,
}

impl ExportDeclaration {
    pub fn new(identity: &str, capabilities: &[&str]) -> Self {
        Self {
            identity: identity.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            suppresses: Vec::new(),
        }
    }

    pub fn suppressing(mut self, identity: &str) -> Self {
        self.suppresses.push(identity.to_string());
        self
    }
}

pub(crate) fn is_valid_feature_id(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '.' || c == '_' || c == '-' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Manifest validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    EmptyId,
    InvalidId(String),
    EmptyVersion,
    InvalidVersion(String),
    SelfDependency(String),
    InvalidDependency(String),
    EmptyIdentity,
    DuplicateExport(String),
    MissingCapabilities(String),
    DuplicateCapability(String),
    Capability(ItemCapabilityError),
}

impl Display for ManifestValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "manifest id must not be empty"),
            Self::InvalidId(value) => write!(f, "manifest id is invalid: {value}"),
            Self::EmptyVersion => write!(f, "manifest version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "manifest version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::SelfDependency(value) => write!(f, "feature depends on itself: {value}"),
            Self::InvalidDependency(value) => {
                write!(f, "manifest dependency id is invalid: {value}")
            }
            Self::EmptyIdentity => write!(f, "manifest export identity must not be empty"),
            Self::DuplicateExport(value) => write!(f, "manifest export is duplicated: {value}"),
            Self::MissingCapabilities(value) => {
                write!(f, "manifest export declares no capabilities: {value}")
            }
            Self::DuplicateCapability(value) => {
                write!(f, "manifest capability is duplicated: {value}")
            }
            Self::Capability(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ManifestValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Capability(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExportDeclaration, FeatureManifest, ManifestValidationError};
    use crate::extension::capability::ItemCapabilityError;

    fn valid_manifest() -> FeatureManifest {
        FeatureManifest::new("orders.core", "1.2.0")
            .depends_on("common")
            .export(ExportDeclaration::new("OrdersController", &["controller"]))
            .export(ExportDeclaration::new(
                "OrderRecord",
                &["record_type", "dependency"],
            ))
    }

    #[test]
    fn validates_baseline_manifest() {
        assert!(valid_manifest().validate().is_ok());
    }

    #[test]
    fn rejects_invalid_id_format() {
        let mut manifest = valid_manifest();
        manifest.id = "Orders Core".to_string();
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidId(_)));
    }

    #[test]
    fn rejects_invalid_version_format() {
        let mut manifest = valid_manifest();
        manifest.version = "v1".to_string();
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidVersion(_)));
    }

    #[test]
    fn rejects_self_dependency() {
        let manifest = valid_manifest().depends_on("orders.core");
        assert_eq!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::SelfDependency("orders.core".to_string())
        );
    }

    #[test]
    fn rejects_duplicate_exports() {
        let manifest =
            valid_manifest().export(ExportDeclaration::new("OrdersController", &["controller"]));
        assert_eq!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::DuplicateExport("OrdersController".to_string())
        );
    }

    #[test]
    fn rejects_duplicate_and_unsupported_capabilities() {
        let manifest = FeatureManifest::new("a", "0.1.0")
            .export(ExportDeclaration::new("X", &["controller", "controller"]));
        assert_eq!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::DuplicateCapability("controller".to_string())
        );

        let manifest =
            FeatureManifest::new("a", "0.1.0").export(ExportDeclaration::new("X", &["widget"]));
        assert_eq!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::Capability(ItemCapabilityError::UnsupportedCapability(
                "widget".to_string()
            ))
        );
    }

    #[test]
    fn rejects_export_without_capabilities() {
        let manifest = FeatureManifest::new("a", "0.1.0").export(ExportDeclaration::new("X", &[]));
        assert!(matches!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::MissingCapabilities(_)
        ));
    }
}
