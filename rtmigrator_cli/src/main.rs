//! Main entry point for the rtmigrator cli tool

mod cli;

use crate::cli::{CliError, Command};
use clap::Parser;
use cli::Cli;
use comfy_table::{Cell, Color, Table};
use console::{Style, Term};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use rtmigrator::{
    Cancellation, Config, DirectoryScriptSource, MigrationPlan, Migrator, MigratorError,
    SqliteDriver, Transition,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

fn main() {
    human_panic::setup_panic!(human_panic::Metadata::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    ));
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = crate::inner_main() {
        eprintln!("{e}");
        std::process::exit(1)
    }
}

fn inner_main() -> Result<(), CliError> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::ShowScripts) => {
            let migrator = load_migrator(&cli)?;
            show_scripts(&migrator)
        }
        Some(Command::Status(args)) => match status(&cli) {
            Ok(status) => {
                if !args.quiet {
                    println!("{}", status.label());
                }
                std::process::exit(status.exit_code())
            }
            Err(e) => {
                if !args.quiet {
                    println!(
                        "{}",
                        match e {
                            CliError::MissingDbUrl => "config-error",
                            CliError::IoError(_) => "io-error",
                            CliError::MigratorError(e) => match e {
                                MigratorError::DatabaseUnavailable { .. } => "db-unavailable",
                                MigratorError::Sqlite(_) => "db-error",
                                MigratorError::Script(_) => "script-error",
                                MigratorError::Config(_) => "config-error",
                                _ => "internal-error",
                            },
                            _ => "internal-error",
                        }
                    );
                }
                std::process::exit(1)
            }
        },
        Some(Command::CreateDb)
        | Some(Command::Migrate)
        | Some(Command::ShowPlan)
        | Some(Command::Version) => database_command(&cli),
        None => Err(CliError::UnknownCommand),
    }
}

fn load_migrator(cli: &Cli) -> Result<Migrator, CliError> {
    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };
    if let Some(name) = &cli.ledger_table_name {
        config.ledger_table_name = Some(name.clone());
    }
    Ok(Migrator::new(
        config,
        cli.component.clone(),
        DirectoryScriptSource::new(&cli.scripts),
    )?)
}

fn connect(cli: &Cli) -> Result<SqliteDriver, CliError> {
    let db_url = cli.db_url.as_deref().ok_or(CliError::MissingDbUrl)?;
    Ok(SqliteDriver::connect(db_url)?)
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL_CONDENSED)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

fn version_cell(version: Option<rtmigrator::VersionId>) -> Cell {
    match version {
        Some(version) => Cell::new(version),
        None => Cell::new("none").fg(Color::Yellow),
    }
}

fn show_scripts(migrator: &Migrator) -> Result<(), CliError> {
    let mut table = new_table(vec!["Component", "Transition", "Statements", "Checksum"]);
    let mut warnings = Vec::new();
    for component in migrator.components() {
        let set = migrator.transitions(component)?;
        for transition in set.transitions.iter() {
            table.add_row(vec![
                Cell::new(component),
                Cell::new(transition).fg(if transition.is_bootstrap() {
                    Color::Cyan
                } else {
                    Color::Green
                }),
                Cell::new(transition.executable_statements().count()),
                Cell::new(transition.checksum32()),
            ]);
        }
        warnings.extend(
            set.warnings
                .into_iter()
                .map(|warning| format!("{component}: {warning}")),
        );
    }
    println!("Transitions:\n{table}");

    let yellow = Style::new().yellow();
    for warning in warnings {
        println!("{:>12} {}", yellow.apply_to("Warning"), warning);
    }
    Ok(())
}

fn show_plan(plans: &[MigrationPlan]) {
    if plans.iter().all(MigrationPlan::is_empty) {
        println!("No pending transitions.");
    } else {
        let mut table = new_table(vec!["Component", "Transition", "Checksum"]);
        for plan in plans {
            for step in plan.steps() {
                table.add_row(vec![
                    Cell::new(plan.component()),
                    Cell::new(step).fg(if step.is_bootstrap() {
                        Color::Cyan
                    } else {
                        Color::Green
                    }),
                    Cell::new(step.checksum32()),
                ]);
            }
        }
        println!("Pending transitions:\n{table}");
    }
    for plan in plans {
        if let Some(gap) = plan.version_gap() {
            println!("{:>12} {}", Style::new().red().bold().apply_to("Gap"), gap);
        }
    }
}

fn show_versions(migrator: &Migrator, client: &mut SqliteDriver) -> Result<(), CliError> {
    let mut table = new_table(vec!["Component", "Version", "Latest"]);
    for plan in migrator.plans(client)? {
        table.add_row(vec![
            Cell::new(plan.component()),
            version_cell(plan.start()),
            version_cell(plan.max_version()),
        ]);
    }
    println!("{table}");
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Status {
    UpToDate,
    Pending,
    Gap,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Status::UpToDate => "up-to-date",
            Status::Pending => "pending-migrations",
            Status::Gap => "version-gap",
        }
    }

    fn exit_code(self) -> i32 {
        match self {
            Status::UpToDate => 0,
            Status::Pending => 10,
            Status::Gap => 11,
        }
    }
}

fn status(cli: &Cli) -> Result<Status, CliError> {
    let migrator = load_migrator(cli)?;
    let mut client = connect(cli)?;
    let plans = migrator.plans(&mut client)?;
    Ok(if plans.iter().any(|plan| !plan.is_complete()) {
        Status::Gap
    } else if plans.iter().any(|plan| !plan.is_empty()) {
        Status::Pending
    } else {
        Status::UpToDate
    })
}

/// Apply every pending transition, reporting each step on a progress bar.
fn migrate(
    migrator: &Migrator,
    client: &mut SqliteDriver,
    cancel: &dyn Cancellation,
    start: &Instant,
) -> Result<(), CliError> {
    migrator.ensure_database_exists(client)?;

    let green_bold = Style::new().green().bold();
    let red_bold = Style::new().red().bold();

    let plans = migrator.plans(client)?;
    let len: usize = plans.iter().map(|plan| plan.steps().len()).sum();
    if len == 0 {
        if let Some(gap) = plans.iter().find_map(MigrationPlan::version_gap) {
            return Err(gap.into());
        }
        println!(
            "{:>12} No pending transitions.",
            green_bold.apply_to("Finished"),
        );
        return Ok(());
    }

    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(
            // bar size is fixed
            if Term::stdout().size().1 > 80 {
                "{prefix:>12.cyan.bold} [{bar:57}] {pos}/{len} {wide_msg}"
            } else {
                "{prefix:>12.cyan.bold} [{bar:57}] {pos}/{len}"
            },
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    );
    pb.set_prefix("Database migration");

    let mut result = Ok(());
    for plan in plans.iter() {
        let mut report = |step: &Transition, outcome: Result<(), &MigratorError>| {
            let err_text;
            let line = format!(
                "{:>12} {} {}",
                match outcome {
                    Ok(()) => green_bold.apply_to("Applied"),
                    Err(e) => {
                        err_text = format!("Failed - {}", e);
                        red_bold.apply_to(err_text.as_str())
                    }
                },
                plan.component(),
                step,
            );
            pb.println(line);
            if outcome.is_ok() {
                pb.inc(1);
            }
        };
        pb.set_message(format!("Applying {}...", plan.component()));
        result = match migrator.apply_plan_observed(&mut *client, plan, cancel, &mut report) {
            Ok(update) if !update.success => Err(CliError::UpdateFailed {
                error: update.error,
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(e.into()),
        };
        if result.is_err() {
            break;
        }
    }
    pb.finish_and_clear();

    if result.is_ok() {
        println!(
            "{:>12} Database migrated in {}",
            green_bold.apply_to("Finished"),
            HumanDuration(start.elapsed())
        );
    }
    result
}

fn database_command(cli: &Cli) -> Result<(), CliError> {
    let start = Instant::now();
    let migrator = Arc::new(load_migrator(cli)?);
    let mut client = connect(cli)?;

    match cli.command {
        Some(Command::ShowPlan) => {
            let plans = migrator.plans(&mut client)?;
            show_plan(&plans);
            Ok(())
        }
        Some(Command::Version) => show_versions(&migrator, &mut client),
        Some(Command::CreateDb) | Some(Command::Migrate) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async move {
                let cancel = CancellationToken::new();
                let ctrl_c = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!("cancelling after the current transition...");
                        ctrl_c.cancel();
                    }
                });

                if matches!(cli.command, Some(Command::CreateDb)) {
                    let (mut client, updated) =
                        rtmigrator::runtime::ensure_database_created_async(
                            migrator.clone(),
                            client,
                            cancel,
                        )
                        .await?;
                    if !updated {
                        let error = migrator
                            .plans(&mut client)?
                            .iter()
                            .find_map(MigrationPlan::version_gap)
                            .map(|gap| gap.to_string())
                            .unwrap_or_else(|| "see log for details".to_string());
                        return Err(CliError::UpdateFailed { error });
                    }
                    println!(
                        "{:>12} Database is up to date",
                        Style::new().green().bold().apply_to("Finished"),
                    );
                    Ok(())
                } else {
                    tokio::task::spawn_blocking(move || {
                        migrate(&migrator, &mut client, &cancel, &start)
                    })
                    .await?
                }
            })
        }
        _ => Err(CliError::UnknownCommand),
    }
}
