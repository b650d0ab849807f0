#[cfg(feature = "rusqlite")]
mod sqlite;

#[cfg(feature = "rusqlite")]
pub use sqlite::{SqliteDriver, SqliteTarget};

use crate::migrator::MigratorError;

/// Storage primitives the migrator needs from a database.
///
/// Transactions are driven by the migrator: `begin_transaction`, then any
/// number of `execute_raw` and one `upsert_version`, then `commit` or
/// `rollback`.
pub trait Client {
    /// Human readable description of the database, used in messages.
    fn target(&self) -> String;

    fn can_connect(&mut self) -> bool;

    /// Force creation of the database, e.g. by opening a file-backed store once.
    fn create_database(&mut self) -> Result<(), MigratorError>;

    fn begin_transaction(&mut self) -> Result<(), MigratorError>;

    /// Execute one script fragment, which may hold several statements.
    fn execute_raw(&mut self, sql: &str) -> Result<(), MigratorError>;

    fn commit(&mut self) -> Result<(), MigratorError>;

    /// A no-op when no transaction is open.
    fn rollback(&mut self) -> Result<(), MigratorError>;

    /// `None` when the ledger table or the component row is missing.
    fn read_version(
        &mut self,
        ledger_table: &str,
        component: &str,
    ) -> Result<Option<String>, MigratorError>;

    fn upsert_version(
        &mut self,
        ledger_table: &str,
        component: &str,
        version: &str,
    ) -> Result<(), MigratorError>;
}
