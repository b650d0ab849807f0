use super::Client;
use crate::migrator::MigratorError;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::fmt;
use std::path::PathBuf;
use url::Url;

pub(crate) const TABLE_EXISTS_QUERY: &str =
    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;";

pub(crate) const GET_VERSION_QUERY: &str =
    "SELECT version FROM %LEDGER_TABLE_NAME% WHERE component = ?1;";

pub(crate) const UPSERT_VERSION_QUERY: &str =
    "INSERT INTO %LEDGER_TABLE_NAME% (component, version) VALUES (?1, ?2)
    ON CONFLICT(component) DO UPDATE SET version = excluded.version;";

/// Where a SQLite database lives.
#[derive(Clone, Debug, PartialEq)]
pub enum SqliteTarget {
    Memory,
    File(PathBuf),
}

impl SqliteTarget {
    /// Accepts `:memory:`, `sqlite::memory:`, `sqlite://<path>`,
    /// `sqlite:<path>`, `file:` URLs and plain paths.
    pub fn parse(db_url: &str) -> Result<Self, MigratorError> {
        let db_url = db_url.trim();
        let invalid = || MigratorError::InvalidUrl {
            url: db_url.to_string(),
        };

        if db_url.is_empty() {
            return Err(invalid());
        }
        if db_url == ":memory:" || db_url == "sqlite::memory:" {
            return Ok(SqliteTarget::Memory);
        }
        if db_url.starts_with("file:") {
            let url = Url::parse(db_url).map_err(|_| invalid())?;
            return url
                .to_file_path()
                .map(SqliteTarget::File)
                .map_err(|_| invalid());
        }
        let path = db_url
            .strip_prefix("sqlite://")
            .or_else(|| db_url.strip_prefix("sqlite:"))
            .unwrap_or(db_url);
        if path.is_empty() {
            return Err(invalid());
        }
        Ok(SqliteTarget::File(PathBuf::from(path)))
    }
}

impl fmt::Display for SqliteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqliteTarget::Memory => write!(f, ":memory:"),
            SqliteTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// [`Client`] over a single `rusqlite` connection.
///
/// File databases are opened lazily and never created implicitly; see
/// [`Client::create_database`].
pub struct SqliteDriver {
    target: SqliteTarget,
    conn: Option<Connection>,
}

impl SqliteDriver {
    pub fn connect(db_url: &str) -> Result<Self, MigratorError> {
        Self::with_target(SqliteTarget::parse(db_url)?)
    }

    pub fn with_target(target: SqliteTarget) -> Result<Self, MigratorError> {
        let conn = match target {
            SqliteTarget::Memory => Some(Connection::open_in_memory()?),
            SqliteTarget::File(_) => None,
        };
        Ok(SqliteDriver { target, conn })
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection) -> Self {
        let target = match conn.path() {
            Some(path) if !path.is_empty() => SqliteTarget::File(PathBuf::from(path)),
            _ => SqliteTarget::Memory,
        };
        SqliteDriver {
            target,
            conn: Some(conn),
        }
    }

    pub fn sqlite_target(&self) -> &SqliteTarget {
        &self.target
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    pub fn into_connection(self) -> Option<Connection> {
        self.conn
    }

    fn open_existing(&self) -> Result<Connection, MigratorError> {
        match &self.target {
            SqliteTarget::Memory => Ok(Connection::open_in_memory()?),
            SqliteTarget::File(path) => Ok(Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?),
        }
    }

    fn conn(&mut self) -> Result<&mut Connection, MigratorError> {
        if self.conn.is_none() {
            let conn = self
                .open_existing()
                .map_err(|_| MigratorError::DatabaseUnavailable {
                    target: self.target.to_string(),
                })?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| MigratorError::DatabaseUnavailable {
                target: self.target.to_string(),
            })
    }
}

fn probe(conn: &Connection) -> bool {
    conn.query_row("SELECT count(*) FROM sqlite_master;", [], |row| {
        row.get::<_, i64>(0)
    })
    .is_ok()
}

impl Client for SqliteDriver {
    fn target(&self) -> String {
        self.target.to_string()
    }

    fn can_connect(&mut self) -> bool {
        if let Some(conn) = self.conn.as_ref() {
            return probe(conn);
        }
        match self.open_existing() {
            Ok(conn) if probe(&conn) => {
                self.conn = Some(conn);
                true
            }
            _ => false,
        }
    }

    fn create_database(&mut self) -> Result<(), MigratorError> {
        match &self.target {
            SqliteTarget::Memory => Ok(()),
            SqliteTarget::File(path) => {
                let conn = Connection::open(path)?;
                conn.close().map_err(|(_, e)| MigratorError::from(e))
            }
        }
    }

    fn begin_transaction(&mut self) -> Result<(), MigratorError> {
        self.conn()?.execute_batch("BEGIN;")?;
        Ok(())
    }

    fn execute_raw(&mut self, sql: &str) -> Result<(), MigratorError> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), MigratorError> {
        self.conn()?.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), MigratorError> {
        let conn = self.conn()?;
        // SQLite may already have rolled back on its own.
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn read_version(
        &mut self,
        ledger_table: &str,
        component: &str,
    ) -> Result<Option<String>, MigratorError> {
        let conn = self.conn()?;
        let tables: i64 = conn.query_row(TABLE_EXISTS_QUERY, [ledger_table], |row| row.get(0))?;
        if tables == 0 {
            return Ok(None);
        }
        let version = conn
            .query_row(
                &GET_VERSION_QUERY.replace("%LEDGER_TABLE_NAME%", ledger_table),
                [component],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    fn upsert_version(
        &mut self,
        ledger_table: &str,
        component: &str,
        version: &str,
    ) -> Result<(), MigratorError> {
        self.conn()?.execute(
            &UPSERT_VERSION_QUERY.replace("%LEDGER_TABLE_NAME%", ledger_table),
            [component, version],
        )?;
        Ok(())
    }
}
