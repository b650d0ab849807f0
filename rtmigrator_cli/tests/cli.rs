mod cli {
    use assert_cmd::prelude::*;
    use predicates::str::contains;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;

    fn rtmigrator() -> Command {
        let mut cmd = Command::cargo_bin("rtmigrator").unwrap();
        cmd.env_remove("RTMIGRATOR_DB_URL");
        cmd
    }

    fn write(root: &Path, name: &str, sql: &str) {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, sql).unwrap();
    }

    /// Scripts of a small component reaching version 1.1.
    fn scripts(tmp_dir: &TempDir) -> PathBuf {
        let root = tmp_dir.path().join("scripts");
        write(
            &root,
            "create/tables.sql",
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL, pinned INTEGER NOT NULL DEFAULT 0);",
        );
        write(
            &root,
            "update/1.0_1.1.sql",
            "ALTER TABLE notes ADD COLUMN pinned INTEGER NOT NULL DEFAULT 0;",
        );
        root
    }

    fn run(db: &Path, scripts: &Path, command: &str) -> Command {
        let mut cmd = rtmigrator();
        cmd.arg("-D")
            .arg(db)
            .arg("-S")
            .arg(scripts)
            .args(["-c", "notes", command]);
        cmd
    }

    // `rtmigrator` with no args should exit with a non-zero code.
    #[test]
    fn cli_no_args() {
        rtmigrator().assert().failure();
    }

    #[test]
    fn cli_version() {
        rtmigrator()
            .args(["-V"])
            .assert()
            .stdout(contains(env!("CARGO_PKG_VERSION")));
    }

    // `rtmigrator migrate` without a database url should exit with a non-zero code.
    #[test]
    fn migrate_no_args() {
        rtmigrator()
            .args(["migrate"])
            .assert()
            .failure()
            .stderr(contains("database url is required"));
    }

    #[test]
    fn migrate_fresh_database() {
        let tmp_dir = TempDir::new().unwrap();
        let scripts = scripts(&tmp_dir);
        let db = tmp_dir.path().join("notes.db");

        run(&db, &scripts, "migrate")
            .assert()
            .success()
            .stdout(contains("Finished"));
        assert!(db.exists());

        run(&db, &scripts, "status")
            .assert()
            .code(0)
            .stdout(contains("up-to-date"));

        run(&db, &scripts, "version")
            .assert()
            .success()
            .stdout(contains("notes"))
            .stdout(contains("1.1"));

        run(&db, &scripts, "migrate")
            .assert()
            .success()
            .stdout(contains("No pending transitions."));
    }

    #[test]
    fn create_db() {
        let tmp_dir = TempDir::new().unwrap();
        let scripts = scripts(&tmp_dir);
        let db = tmp_dir.path().join("notes.db");

        run(&db, &scripts, "create-db")
            .assert()
            .success()
            .stdout(contains("Database is up to date"));
        run(&db, &scripts, "status").assert().code(0);
    }

    #[test]
    fn create_db_in_memory_reports_gap() {
        let tmp_dir = TempDir::new().unwrap();
        let scripts = tmp_dir.path().join("scripts");
        write(&scripts, "update/1.0_1.1.sql", "SELECT 1;");

        rtmigrator()
            .args(["-D", ":memory:", "-c", "notes", "-S"])
            .arg(&scripts)
            .arg("create-db")
            .assert()
            .failure()
            .stderr(contains(
                "database update failed: no transition bridges none to 1.1 for component `notes`",
            ));
    }

    #[test]
    fn status_reports_pending() {
        let tmp_dir = TempDir::new().unwrap();
        let scripts = scripts(&tmp_dir);
        let db = tmp_dir.path().join("notes.db");

        run(&db, &scripts, "status")
            .assert()
            .code(1)
            .stdout(contains("db-unavailable"));

        fs::File::create(&db).unwrap();
        run(&db, &scripts, "status")
            .assert()
            .code(10)
            .stdout(contains("pending-migrations"));
        run(&db, &scripts, "show-plan")
            .assert()
            .success()
            .stdout(contains("bootstrap -> 1.0"))
            .stdout(contains("bootstrap -> 1.1"));
    }

    #[test]
    fn status_reports_gap() {
        let tmp_dir = TempDir::new().unwrap();
        let scripts = scripts(&tmp_dir);
        let db = tmp_dir.path().join("notes.db");

        run(&db, &scripts, "migrate").assert().success();
        write(&scripts, "update/1.2_1.3.sql", "SELECT 1;");

        run(&db, &scripts, "status")
            .assert()
            .code(11)
            .stdout(contains("version-gap"));
        run(&db, &scripts, "migrate")
            .assert()
            .failure()
            .stderr(contains("no transition bridges 1.1 to 1.3"));
    }

    #[test]
    fn show_scripts_without_database() {
        let tmp_dir = TempDir::new().unwrap();
        let scripts = scripts(&tmp_dir);
        write(&scripts, "update/1.1_x.sql", "SELECT 1;");

        rtmigrator()
            .arg("-S")
            .arg(&scripts)
            .arg("show-scripts")
            .assert()
            .success()
            .stdout(contains("1.0 -> 1.1"))
            .stdout(contains("bootstrap -> 1.1"))
            .stdout(contains("Warning"));
    }

    #[test]
    fn custom_ledger_table_from_config() {
        let tmp_dir = TempDir::new().unwrap();
        let scripts = scripts(&tmp_dir);
        let db = tmp_dir.path().join("notes.db");
        let config = tmp_dir.path().join("rtmigrator.toml");
        fs::write(&config, "ledger_table_name = \"versions\"\n").unwrap();

        rtmigrator()
            .arg("--config")
            .arg(&config)
            .arg("-D")
            .arg(&db)
            .arg("-S")
            .arg(&scripts)
            .arg("migrate")
            .assert()
            .success();

        // the default ledger table holds nothing
        run(&db, &scripts, "status")
            .assert()
            .code(10)
            .stdout(contains("pending-migrations"));
    }
}
