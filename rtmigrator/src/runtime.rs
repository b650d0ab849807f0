//! Running a migration cycle from async code.
//!
//! Drivers are blocking, so the cycle moves to the blocking pool together
//! with the client, which is handed back once done.

use crate::drivers::Client;
use crate::migrator::{Migrator, MigratorError, UpdateResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// [`Migrator::update_database_with`] on the blocking pool.
///
/// Cancelling `cancel` stops the cycle before the next transaction; the one
/// in progress still commits or rolls back.
pub async fn update_database_async<C>(
    migrator: Arc<Migrator>,
    mut client: C,
    cancel: CancellationToken,
) -> Result<(C, UpdateResult), MigratorError>
where
    C: Client + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = migrator.update_database_with(&mut client, &cancel)?;
        Ok((client, result))
    })
    .await?
}

/// [`Migrator::ensure_database_created_with`] on the blocking pool.
pub async fn ensure_database_created_async<C>(
    migrator: Arc<Migrator>,
    mut client: C,
    cancel: CancellationToken,
) -> Result<(C, bool), MigratorError>
where
    C: Client + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let updated = migrator.ensure_database_created_with(&mut client, &cancel)?;
        Ok((client, updated))
    })
    .await?
}
