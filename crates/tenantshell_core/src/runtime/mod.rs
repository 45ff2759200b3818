//! Service scopes, the type universe and runtime construction.

pub mod factory;
pub mod scope;
pub mod shell;
pub mod tenant_runtime;
pub mod universe;

pub use factory::{
    BuildError, BuildResult, RuntimeFactory, FEATURE_SET_KEY, SHELL_KEY, TENANT_RECORD_KEY,
};
pub use scope::{Lifetime, ScopeBuilder, ScopeError, ScopeResult, ServiceScope};
pub use shell::{Shell, ShellEvents};
pub use tenant_runtime::Runtime;
pub use universe::{ComponentDefinition, TypeUniverse, UniverseError};
