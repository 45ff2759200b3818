//! Tenant record + feature set + catalog → blueprint.

pub mod blueprint;
pub mod composer;

pub use blueprint::{Blueprint, BlueprintItem};
pub use composer::{
    default_rules, BlueprintComposer, CategoryRule, CompositionError, CompositionResult,
};
