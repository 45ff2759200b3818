//! Item capability declarations and their blueprint tags.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Role an exported item plays inside a tenant runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemCapability {
    Controller,
    RecordType,
    Dependency,
    StateProvider,
    WorkObserver,
    ShellEvents,
    BackgroundTask,
}

impl ItemCapability {
    pub const ALL: [ItemCapability; 7] = [
        Self::Controller,
        Self::RecordType,
        Self::Dependency,
        Self::StateProvider,
        Self::WorkObserver,
        Self::ShellEvents,
        Self::BackgroundTask,
    ];

    /// Stable string id used in manifest declarations.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Controller => CAPABILITY_CONTROLLER,
            Self::RecordType => CAPABILITY_RECORD_TYPE,
            Self::Dependency => CAPABILITY_DEPENDENCY,
            Self::StateProvider => CAPABILITY_STATE_PROVIDER,
            Self::WorkObserver => CAPABILITY_WORK_OBSERVER,
            Self::ShellEvents => CAPABILITY_SHELL_EVENTS,
            Self::BackgroundTask => CAPABILITY_BACKGROUND_TASK,
        }
    }

    /// Blueprint category tag items with this capability are filed under.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Controller => TAG_CONTROLLERS,
            Self::RecordType => TAG_RECORD_TYPES,
            Self::Dependency => TAG_DEPENDENCIES,
            Self::StateProvider => TAG_STATE_PROVIDERS,
            Self::WorkObserver => TAG_WORK_OBSERVERS,
            Self::ShellEvents => TAG_SHELL_EVENTS,
            Self::BackgroundTask => TAG_BACKGROUND_TASKS,
        }
    }
}

impl Display for ItemCapability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const CAPABILITY_CONTROLLER: &str = "controller";
pub const CAPABILITY_RECORD_TYPE: &str = "record_type";
pub const CAPABILITY_DEPENDENCY: &str = "dependency";
pub const CAPABILITY_STATE_PROVIDER: &str = "state_provider";
pub const CAPABILITY_WORK_OBSERVER: &str = "work_observer";
pub const CAPABILITY_SHELL_EVENTS: &str = "shell_events";
pub const CAPABILITY_BACKGROUND_TASK: &str = "background_task";

pub const TAG_CONTROLLERS: &str = "controllers";
pub const TAG_RECORD_TYPES: &str = "record-types";
pub const TAG_DEPENDENCIES: &str = "dependencies";
pub const TAG_STATE_PROVIDERS: &str = "state-providers";
pub const TAG_WORK_OBSERVERS: &str = "work-observers";
pub const TAG_SHELL_EVENTS: &str = "shell-events";
pub const TAG_BACKGROUND_TASKS: &str = "background-tasks";

/// Parses one item capability from its manifest string.
///
/// Matching is exact: capability strings are lowercase snake case.
pub fn parse_item_capability(value: &str) -> Result<ItemCapability, ItemCapabilityError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(ItemCapabilityError::EmptyCapability);
    }

    ItemCapability::ALL
        .into_iter()
        .find(|capability| capability.as_str() == normalized)
        .ok_or_else(|| ItemCapabilityError::UnsupportedCapability(normalized.to_string()))
}

/// Item capability parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemCapabilityError {
    EmptyCapability,
    UnsupportedCapability(String),
}

impl Display for ItemCapabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCapability => write!(f, "item capability value must not be empty"),
            Self::UnsupportedCapability(value) => {
                write!(f, "item capability is unsupported: {value}")
            }
        }
    }
}

impl Error for ItemCapabilityError {}

#[cfg(test)]
mod tests {
    use super::{parse_item_capability, ItemCapability, ItemCapabilityError};

    #[test]
    fn parses_every_declared_capability() {
        for capability in ItemCapability::ALL {
            assert_eq!(
                parse_item_capability(capability.as_str()).expect("declared capability parses"),
                capability
            );
        }
    }

    #[test]
    fn maps_capabilities_to_blueprint_tags() {
        assert_eq!(ItemCapability::Controller.tag(), "controllers");
        assert_eq!(ItemCapability::RecordType.tag(), "record-types");
        assert_eq!(ItemCapability::BackgroundTask.tag(), "background-tasks");
    }

    #[test]
    fn rejects_empty_and_unknown_capabilities() {
        assert_eq!(
            parse_item_capability("  ").expect_err("empty must fail"),
            ItemCapabilityError::EmptyCapability
        );
        assert_eq!(
            parse_item_capability("Controller").expect_err("case-sensitive"),
            ItemCapabilityError::UnsupportedCapability("Controller".to_string())
        );
    }
}
