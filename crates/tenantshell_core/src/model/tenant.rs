//! Tenant record model.
//!
//! # Responsibility
//! - Define the persisted configuration of one tenant as an open key-value map.
//! - Provide typed accessors for the well-known settings keys.
//!
//! # Invariants
//! - Tenant identity is the `Name` value compared case-insensitively.
//! - Records are replaced whole: every mutator consumes `self` and returns a
//!   new record, so consumers never observe a partial field update.
//! - `Name` is fixed at construction and cannot be overridden or removed.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Settings key holding the tenant name.
pub const KEY_NAME: &str = "Name";
/// Settings key holding the data provider name.
pub const KEY_DATA_PROVIDER: &str = "DataProvider";
/// Settings key holding the data connection string.
pub const KEY_DATA_CONNECTION_STRING: &str = "DataConnectionString";
/// Settings key holding the table prefix for shared databases.
pub const KEY_DATA_TABLE_PREFIX: &str = "DataTablePrefix";
/// Settings key holding comma-separated request hosts.
pub const KEY_REQUEST_URL_HOST: &str = "RequestUrlHost";
/// Settings key holding the request path prefix.
pub const KEY_REQUEST_URL_PREFIX: &str = "RequestUrlPrefix";
/// Settings key holding the tenant lifecycle state.
pub const KEY_STATE: &str = "State";

/// Name of the tenant created by default bootstrap.
pub const DEFAULT_TENANT_NAME: &str = "Default";

static TENANT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("valid tenant name regex")
});

/// Lifecycle state persisted with a tenant record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TenantState {
    Uninitialized,
    Running,
    Disabled,
    Invalid,
}

impl TenantState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Running => "Running",
            Self::Disabled => "Disabled",
            Self::Invalid => "Invalid",
        }
    }

    /// Parses a persisted state value. Unknown values map to `Invalid`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "uninitialized" => Self::Uninitialized,
            "running" => Self::Running,
            "disabled" => Self::Disabled,
            _ => Self::Invalid,
        }
    }

    /// Whether a runtime may be built for a tenant in this state.
    pub fn is_available(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Running)
    }
}

impl Display for TenantState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive tenant identity used as cache and map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey(String);

impl TenantKey {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TenantKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns whether `name` is an acceptable tenant name.
pub fn is_valid_tenant_name(name: &str) -> bool {
    TENANT_NAME_RE.is_match(name)
}

/// Persisted configuration of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    values: BTreeMap<String, String>,
}

impl TenantRecord {
    /// Creates a record in `Uninitialized` state.
    pub fn new(name: &str) -> Result<Self, TenantRecordError> {
        let name = name.trim();
        if !is_valid_tenant_name(name) {
            return Err(TenantRecordError::InvalidName(name.to_string()));
        }
        let mut values = BTreeMap::new();
        values.insert(KEY_NAME.to_string(), name.to_string());
        values.insert(
            KEY_STATE.to_string(),
            TenantState::Uninitialized.as_str().to_string(),
        );
        Ok(Self { values })
    }

    /// Rebuilds a record from a raw key-value map.
    ///
    /// Empty keys and empty values are dropped.
    pub fn from_values(values: BTreeMap<String, String>) -> Result<Self, TenantRecordError> {
        let name = values
            .get(KEY_NAME)
            .map(|value| value.trim().to_string())
            .ok_or(TenantRecordError::MissingName)?;
        if !is_valid_tenant_name(&name) {
            return Err(TenantRecordError::InvalidName(name));
        }

        let mut normalized: BTreeMap<String, String> = values
            .into_iter()
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .collect();
        normalized.insert(KEY_NAME.to_string(), name);
        Ok(Self { values: normalized })
    }

    pub fn name(&self) -> &str {
        self.values.get(KEY_NAME).map(String::as_str).unwrap_or_default()
    }

    pub fn key(&self) -> TenantKey {
        TenantKey::new(self.name())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn state(&self) -> TenantState {
        self.get(KEY_STATE)
            .map(TenantState::parse)
            .unwrap_or(TenantState::Uninitialized)
    }

    pub fn data_provider(&self) -> Option<&str> {
        self.get(KEY_DATA_PROVIDER)
    }

    pub fn connection_string(&self) -> Option<&str> {
        self.get(KEY_DATA_CONNECTION_STRING)
    }

    pub fn table_prefix(&self) -> Option<&str> {
        self.get(KEY_DATA_TABLE_PREFIX)
    }

    /// Request hosts, lowercased, in declaration order.
    pub fn request_hosts(&self) -> Vec<String> {
        self.get(KEY_REQUEST_URL_HOST)
            .map(|raw| {
                raw.split(',')
                    .map(|host| host.trim().to_ascii_lowercase())
                    .filter(|host| !host.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn request_prefix(&self) -> Option<&str> {
        self.get(KEY_REQUEST_URL_PREFIX)
            .map(|prefix| prefix.trim_matches('/'))
            .filter(|prefix| !prefix.is_empty())
    }

    /// Returns a record with `key` set to `value`.
    ///
    /// An empty value removes the key. `Name` is left untouched.
    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        let key = key.trim();
        if key.is_empty() || key == KEY_NAME {
            return self;
        }
        let value = value.trim();
        if value.is_empty() {
            self.values.remove(key);
        } else {
            self.values.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn with_state(self, state: TenantState) -> Self {
        self.with_value(KEY_STATE, state.as_str())
    }

    /// Overlays `overrides` on this record.
    ///
    /// Override values replace existing ones, empty override values remove the
    /// key, and keys absent from `overrides` are kept.
    pub fn merged(self, overrides: &BTreeMap<String, String>) -> Self {
        overrides
            .iter()
            .fold(self, |record, (key, value)| record.with_value(key, value))
    }
}

/// Tenant record construction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantRecordError {
    MissingName,
    InvalidName(String),
}

impl Display for TenantRecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingName => write!(f, "tenant settings are missing `{KEY_NAME}`"),
            Self::InvalidName(value) => write!(f, "tenant name is invalid: `{value}`"),
        }
    }
}

impl Error for TenantRecordError {}

#[cfg(test)]
mod tests {
    use super::{
        TenantKey, TenantRecord, TenantRecordError, TenantState, KEY_DATA_PROVIDER, KEY_NAME,
        KEY_REQUEST_URL_HOST,
    };
    use std::collections::BTreeMap;

    #[test]
    fn new_record_starts_uninitialized() {
        let record = TenantRecord::new("Acme").expect("valid name");
        assert_eq!(record.name(), "Acme");
        assert_eq!(record.state(), TenantState::Uninitialized);
    }

    #[test]
    fn rejects_invalid_names() {
        for name in ["", "  ", "has space", "-leading", "semi;colon"] {
            let err = TenantRecord::new(name).expect_err("invalid name must fail");
            assert!(matches!(err, TenantRecordError::InvalidName(_)));
        }
    }

    #[test]
    fn key_is_case_insensitive() {
        assert_eq!(TenantKey::new("Acme"), TenantKey::new(" ACME "));
    }

    #[test]
    fn with_value_replaces_and_removes() {
        let record = TenantRecord::new("Acme")
            .unwrap()
            .with_value(KEY_DATA_PROVIDER, "sqlite");
        assert_eq!(record.data_provider(), Some("sqlite"));

        let record = record.with_value(KEY_DATA_PROVIDER, "");
        assert_eq!(record.data_provider(), None);
    }

    #[test]
    fn name_cannot_be_overridden() {
        let record = TenantRecord::new("Acme").unwrap().with_value(KEY_NAME, "Other");
        assert_eq!(record.name(), "Acme");
    }

    #[test]
    fn merged_applies_override_semantics() {
        let record = TenantRecord::new("Acme")
            .unwrap()
            .with_value(KEY_DATA_PROVIDER, "sqlite")
            .with_value("Theme", "dark");

        let mut overrides = BTreeMap::new();
        overrides.insert(KEY_DATA_PROVIDER.to_string(), "postgres".to_string());
        overrides.insert("Theme".to_string(), String::new());
        overrides.insert("Locale".to_string(), "en-US".to_string());

        let merged = record.merged(&overrides);
        assert_eq!(merged.data_provider(), Some("postgres"));
        assert_eq!(merged.get("Theme"), None);
        assert_eq!(merged.get("Locale"), Some("en-US"));
    }

    #[test]
    fn parses_request_hosts_and_prefix() {
        let record = TenantRecord::new("Acme")
            .unwrap()
            .with_value(KEY_REQUEST_URL_HOST, "Acme.example.com, *.acme.test ,")
            .with_value("RequestUrlPrefix", "/shop/");
        assert_eq!(
            record.request_hosts(),
            vec!["acme.example.com".to_string(), "*.acme.test".to_string()]
        );
        assert_eq!(record.request_prefix(), Some("shop"));
    }

    #[test]
    fn from_values_requires_name_and_drops_blank_entries() {
        let mut values = BTreeMap::new();
        values.insert(KEY_DATA_PROVIDER.to_string(), "sqlite".to_string());
        assert_eq!(
            TenantRecord::from_values(values.clone()).unwrap_err(),
            TenantRecordError::MissingName
        );

        values.insert(KEY_NAME.to_string(), " Acme ".to_string());
        values.insert("Blank".to_string(), "  ".to_string());
        let record = TenantRecord::from_values(values).expect("valid values");
        assert_eq!(record.name(), "Acme");
        assert_eq!(record.get("Blank"), None);
    }

    #[test]
    fn unknown_state_is_invalid() {
        assert_eq!(TenantState::parse("running"), TenantState::Running);
        assert_eq!(TenantState::parse("paused"), TenantState::Invalid);
        assert!(!TenantState::Disabled.is_available());
    }

    #[test]
    fn serializes_as_flat_value_map() {
        let record = TenantRecord::new("Acme").unwrap();
        let json = serde_json::to_value(&record).expect("record serializes");
        assert_eq!(json["values"]["Name"], "Acme");
        assert_eq!(json["values"]["State"], "Uninitialized");
    }
}
