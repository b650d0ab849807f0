/*!
Component-versioned SQL migrations for embedded databases.

`rtmigrator` keeps one version row per component in a ledger table and brings
each component up to date by applying SQL scripts, one transaction per step.
A reserved core component owns the ledger table itself and is always updated
first.

## Scripts

A component's scripts live in one directory:

- `create/schema.sql`, `create/tables.sql` and `create/procedures/<name>.sql` build
  the whole schema at once on a fresh database (the bootstrap step).
- `update/<from>_<to>[_<priority>].sql` moves the schema from one version to
  the next. Several files for the same `<from>_<to>` pair run in ascending
  priority within the same transaction.

Versions are dotted numbers with up to four parts (`1.0`, `2.3.1`).

Scripts are read from disk with [`DirectoryScriptSource`] or embedded at
compile time with [`embed_scripts!`].

### Example
```rust,no_run
use rtmigrator::{Config, DirectoryScriptSource, Migrator, SqliteDriver};

let migrator = Migrator::new(Config::default(), "app", DirectoryScriptSource::new("./scripts"))?;
let mut client = SqliteDriver::connect("sqlite://app.db")?;
if !migrator.ensure_database_created(&mut client)? {
    eprintln!("database is not up to date");
}
# Ok::<(), rtmigrator::MigratorError>(())
```
*/

mod config;
mod drivers;
mod ledger;
mod migrator;
#[cfg(feature = "tokio")]
pub mod runtime;

use rtmigrator_core::script;

pub use rtmigrator_macros::embed_scripts;

pub use config::Config;
pub use drivers::Client;
#[cfg(feature = "rusqlite")]
pub use drivers::{SqliteDriver, SqliteTarget};
pub use ledger::{
    ComponentVersionRecord, CoreScripts, VersionLedger, CORE_COMPONENT,
    DEFAULT_LEDGER_TABLE_NAME, MAX_COMPONENT_NAME_LEN,
};
pub use migrator::{resolve_plan, Cancellation, MigrationPlan, Migrator, MigratorError, UpdateResult};
pub use rtmigrator_core::version::VersionId;
pub use script::{
    find_sql_files, find_sql_fragments, DirectoryScriptSource, ScriptCatalog, ScriptError,
    ScriptFragment, ScriptLayout, ScriptSource, ScriptWarning, Transition, TransitionKey,
    TransitionSet,
};

#[doc(hidden)]
pub use rtmigrator_core as __core;
