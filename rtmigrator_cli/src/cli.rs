//! Defines the CLI application

use rtmigrator::{MigratorError, ScriptError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(clap::Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Database URL (`sqlite://<path>`, `:memory:` or a plain path)
    #[arg(short = 'D', long, env = "RTMIGRATOR_DB_URL")]
    pub db_url: Option<String>,

    /// Component scripts directory path
    #[arg(short = 'S', long, default_value = "./scripts")]
    pub scripts: PathBuf,

    /// Component name recorded in the ledger
    #[arg(short = 'c', long, default_value = "app")]
    pub component: String,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Set ledger table name
    #[arg(long)]
    pub ledger_table_name: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Create the database if missing and bring it up to date.
    CreateDb,

    /// Main migrate operation
    Migrate,

    /// Show resolved transitions of every component
    ShowScripts,

    /// Display pending transitions
    ShowPlan,

    /// Display recorded component versions
    Version,

    /// Check the overall status of DB schema and pending transitions
    ///
    /// The current status is printed on stdout.
    /// Returns exit code 0 for `up-to-date`, 10 for `pending-migrations`
    /// and 11 for `version-gap`.
    Status(StatusArgs),
}

#[derive(clap::Args, Debug, Copy, Clone)]
pub struct StatusArgs {
    /// Suppress output on stdout
    #[arg(short = 'q', long, default_value = "false")]
    pub quiet: bool,
}

/// An Error occurred while running a command
#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown command")]
    UnknownCommand,

    #[error("database url is required, use --db-url or RTMIGRATOR_DB_URL")]
    MissingDbUrl,

    #[error("database update failed: {error}")]
    UpdateFailed { error: String },

    #[error(transparent)]
    IoError(std::io::Error),

    #[error(transparent)]
    MigratorError(MigratorError),
}

impl From<MigratorError> for CliError {
    fn from(err: MigratorError) -> CliError {
        CliError::MigratorError(err)
    }
}

impl From<ScriptError> for CliError {
    fn from(err: ScriptError) -> CliError {
        CliError::MigratorError(MigratorError::Script(err))
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> CliError {
        CliError::IoError(err)
    }
}

impl From<tokio::task::JoinError> for CliError {
    fn from(err: tokio::task::JoinError) -> CliError {
        CliError::MigratorError(MigratorError::Join(err))
    }
}
