//! Feature catalog contracts.
//!
//! Features are declared as manifests (data only). The catalog validates and
//! indexes them; the composer reads it through the `FeatureCatalog` trait.

pub mod capability;
pub mod catalog;
pub mod manifest;
