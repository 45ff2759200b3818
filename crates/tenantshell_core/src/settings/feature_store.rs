//! SQLite-backed feature-set store.
//!
//! # Responsibility
//! - Persist the enabled features of each tenant with a revision serial.
//! - Advance the revision atomically with the feature rows.
//!
//! # Invariants
//! - Tenants are keyed case-insensitively (`TenantKey`).
//! - `save` runs in one transaction: revision and features change together.
//! - Revisions are non-negative and strictly increasing per tenant.

use crate::db::{open_db, open_db_in_memory, DbResult};
use crate::model::feature_set::FeatureSet;
use crate::model::tenant::TenantKey;
use crate::settings::{
    ChangeEvent, ChangeNotifier, ChangeObserver, FeatureSetStore, StoreError, StoreResult,
};
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Weak;

pub struct SqliteFeatureSetStore {
    conn: Mutex<Connection>,
    notifier: ChangeNotifier,
}

impl SqliteFeatureSetStore {
    /// Wraps a connection that already has migrations applied.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }
}

impl FeatureSetStore for SqliteFeatureSetStore {
    fn load(&self, tenant: &str) -> StoreResult<FeatureSet> {
        let key = TenantKey::new(tenant);
        let conn = self.conn.lock();

        let Some(revision) = select_revision(&conn, &key)? else {
            return Ok(FeatureSet::empty(tenant));
        };

        let mut stmt = conn.prepare(
            "SELECT feature
             FROM feature_set_features
             WHERE tenant_key = ?1
             ORDER BY feature ASC;",
        )?;
        let features = stmt
            .query_map([key.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FeatureSet::new(tenant, revision, features))
    }

    fn revision(&self, tenant: &str) -> StoreResult<u64> {
        let conn = self.conn.lock();
        Ok(select_revision(&conn, &TenantKey::new(tenant))?.unwrap_or(0))
    }

    fn save(&self, tenant: &str, features: &[&str]) -> StoreResult<FeatureSet> {
        let key = TenantKey::new(tenant);
        let saved = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let next = select_revision(&tx, &key)?.unwrap_or(0) + 1;
            let next_db = i64::try_from(next)
                .map_err(|_| StoreError::InvalidData(format!("revision overflow: {next}")))?;

            tx.execute(
                "INSERT INTO feature_sets (tenant_key, tenant_name, revision)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_key) DO UPDATE SET
                    tenant_name = excluded.tenant_name,
                    revision = excluded.revision,
                    updated_at = (strftime('%s', 'now') * 1000);",
                params![key.as_str(), tenant.trim(), next_db],
            )?;
            tx.execute(
                "DELETE FROM feature_set_features WHERE tenant_key = ?1;",
                [key.as_str()],
            )?;

            let saved = FeatureSet::new(tenant, next, features.iter().copied());
            {
                let mut insert = tx.prepare(
                    "INSERT INTO feature_set_features (tenant_key, feature) VALUES (?1, ?2);",
                )?;
                for feature in saved.features() {
                    insert.execute(params![key.as_str(), feature])?;
                }
            }
            tx.commit()?;
            saved
        };

        info!(
            "event=feature_set_save module=settings status=ok tenant={} revision={} features={}",
            saved.tenant(),
            saved.revision(),
            saved.features().len()
        );
        self.notifier.notify(&ChangeEvent::FeatureSetAdvanced {
            tenant: saved.tenant().to_string(),
            revision: saved.revision(),
        });
        Ok(saved)
    }

    fn subscribe(&self, observer: Weak<dyn ChangeObserver>) {
        self.notifier.subscribe(observer);
    }
}

fn select_revision(conn: &Connection, key: &TenantKey) -> StoreResult<Option<u64>> {
    let revision = conn
        .query_row(
            "SELECT revision FROM feature_sets WHERE tenant_key = ?1;",
            [key.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    revision
        .map(|value| {
            u64::try_from(value).map_err(|_| {
                StoreError::InvalidData(format!(
                    "invalid revision `{value}` in feature_sets.revision"
                ))
            })
        })
        .transpose()
}
