//! Feature-set database: connection bootstrap and schema migrations.
//!
//! Stores open connections only through [`open_db`] or [`open_db_in_memory`],
//! so every connection they touch is configured and fully migrated.

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, DbError, DbResult};
