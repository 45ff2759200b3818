//! Tenant data model.
//!
//! # Responsibility
//! - Define the persisted tenant configuration (`TenantRecord`).
//! - Define the revisioned enabled-feature descriptor (`FeatureSet`).
//!
//! # Invariants
//! - Tenant identity is the case-insensitive tenant name.
//! - Both types are values: updates replace whole records.

pub mod feature_set;
pub mod tenant;
