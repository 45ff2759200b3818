//! Feature catalog contract and the manifest-backed catalog.
//!
//! # Responsibility
//! - Answer which features exist and what each one exports.
//! - Validate manifests once at registration so composition can trust them.
//!
//! # Invariants
//! - Feature ids are unique.
//! - An identity is exported by at most one feature.
//! - Catalog output is stable between registrations, so composition over it
//!   is deterministic.

use crate::extension::capability::{parse_item_capability, ItemCapability};
use crate::extension::manifest::{FeatureManifest, ManifestValidationError};
use log::info;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Catalog-level view of one feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDescriptor {
    pub id: String,
    pub version: String,
    pub dependencies: Vec<String>,
}

/// One item a feature contributes to a tenant runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedItem {
    pub identity: String,
    pub capabilities: BTreeSet<ItemCapability>,
    pub suppresses: Vec<String>,
}

impl ExportedItem {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.trim().to_string(),
            capabilities: BTreeSet::new(),
            suppresses: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: ItemCapability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn suppressing(mut self, identity: &str) -> Self {
        self.suppresses.push(identity.trim().to_string());
        self
    }

    pub fn has(&self, capability: ItemCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Source of feature descriptors and exported items.
pub trait FeatureCatalog: Send + Sync {
    fn available_features(&self) -> Vec<FeatureDescriptor>;

    /// Returns `None` when `feature` is unknown to the catalog.
    fn exported_items(&self, feature: &str) -> Option<Vec<ExportedItem>>;

    fn descriptor(&self, feature: &str) -> Option<FeatureDescriptor> {
        self.available_features()
            .into_iter()
            .find(|descriptor| descriptor.id == feature)
    }
}

struct CatalogEntry {
    descriptor: FeatureDescriptor,
    items: Vec<ExportedItem>,
}

/// In-process catalog built from validated manifests.
#[derive(Default)]
pub struct StaticFeatureCatalog {
    entries: BTreeMap<String, CatalogEntry>,
    owners: BTreeMap<String, String>,
    capability_index: BTreeMap<ItemCapability, BTreeSet<String>>,
}

impl StaticFeatureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one manifest after declaration validation.
    pub fn register_manifest(&mut self, manifest: &FeatureManifest) -> Result<(), CatalogError> {
        manifest
            .validate()
            .map_err(CatalogError::InvalidManifest)?;
        let id = manifest.id.trim().to_string();
        if self.entries.contains_key(&id) {
            return Err(CatalogError::DuplicateFeature(id));
        }

        let mut items = Vec::with_capacity(manifest.exports.len());
        for export in &manifest.exports {
            let identity = export.identity.trim();
            if let Some(owner) = self.owners.get(identity) {
                return Err(CatalogError::DuplicateItem {
                    identity: identity.to_string(),
                    owner: owner.clone(),
                });
            }
            let mut item = ExportedItem::new(identity);
            for capability in &export.capabilities {
                // Validated above.
                if let Ok(capability) = parse_item_capability(capability) {
                    item = item.with_capability(capability);
                }
            }
            for suppressed in &export.suppresses {
                item = item.suppressing(suppressed);
            }
            items.push(item);
        }

        for item in &items {
            self.owners.insert(item.identity.clone(), id.clone());
            for capability in &item.capabilities {
                self.capability_index
                    .entry(*capability)
                    .or_default()
                    .insert(item.identity.clone());
            }
        }

        info!(
            "event=feature_register module=extension status=ok feature={} exports={}",
            id,
            items.len()
        );
        self.entries.insert(
            id.clone(),
            CatalogEntry {
                descriptor: FeatureDescriptor {
                    id,
                    version: manifest.version.trim().to_string(),
                    dependencies: manifest
                        .dependencies
                        .iter()
                        .map(|dependency| dependency.trim().to_string())
                        .collect(),
                },
                items,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Feature exporting `identity`, if any.
    pub fn owner_of(&self, identity: &str) -> Option<&str> {
        self.owners.get(identity).map(String::as_str)
    }

    pub fn list_by_capability(&self, capability: ItemCapability) -> Vec<&str> {
        self.capability_index
            .get(&capability)
            .map(|identities| identities.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl FeatureCatalog for StaticFeatureCatalog {
    fn available_features(&self) -> Vec<FeatureDescriptor> {
        self.entries
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    fn exported_items(&self, feature: &str) -> Option<Vec<ExportedItem>> {
        self.entries.get(feature).map(|entry| entry.items.clone())
    }

    fn descriptor(&self, feature: &str) -> Option<FeatureDescriptor> {
        self.entries
            .get(feature)
            .map(|entry| entry.descriptor.clone())
    }
}

/// Catalog registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    InvalidManifest(ManifestValidationError),
    DuplicateFeature(String),
    DuplicateItem { identity: String, owner: String },
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidManifest(err) => write!(f, "invalid feature manifest: {err}"),
            Self::DuplicateFeature(value) => write!(f, "feature already registered: {value}"),
            Self::DuplicateItem { identity, owner } => {
                write!(f, "item `{identity}` is already exported by `{owner}`")
            }
        }
    }
}

impl Error for CatalogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            _ => None,
        }
    }
}
