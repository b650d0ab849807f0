use crate::config::Config;
use crate::drivers::Client;
use crate::ledger::{
    validate_component, validate_table_name, CoreScripts, VersionLedger, CORE_COMPONENT,
};
use log::{error, info, warn};
use rtmigrator_core::script::{
    ScriptCatalog, ScriptError, ScriptLayout, ScriptSource, Transition, TransitionSet,
};
use rtmigrator_core::version::VersionId;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// An Error occurred during a migration cycle
#[derive(Debug, Error)]
pub enum MigratorError {
    #[error(transparent)]
    Script(ScriptError),

    #[error("cannot access or create database `{target}`")]
    DatabaseUnavailable { target: String },

    #[error("invalid database url `{url}`")]
    InvalidUrl { url: String },

    /// The failed step was rolled back; `reached` is the version the
    /// component stays at and `applied` the steps committed before it.
    #[error("cannot apply transition {transition} for component `{component}`")]
    TransitionApply {
        component: String,
        transition: String,
        reached: Option<VersionId>,
        applied: Vec<String>,
        #[source]
        source: Box<MigratorError>,
    },

    #[error("no transition bridges {current} to {max} for component `{component}`")]
    VersionGap {
        component: String,
        current: String,
        max: String,
    },

    #[error("invalid component `{component}`: {reason}")]
    InvalidComponent {
        component: String,
        reason: &'static str,
    },

    #[error("invalid ledger table name `{name}`")]
    InvalidLedgerTable { name: String },

    #[error("migration cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(std::io::Error),

    #[cfg(feature = "rusqlite")]
    #[error(transparent)]
    Sqlite(rusqlite::Error),

    #[cfg(feature = "tokio")]
    #[error(transparent)]
    Join(tokio::task::JoinError),

    #[cfg(feature = "toml")]
    #[error("invalid configuration")]
    Config(#[source] toml::de::Error),
}

impl From<ScriptError> for MigratorError {
    fn from(err: ScriptError) -> MigratorError {
        MigratorError::Script(err)
    }
}

impl From<std::io::Error> for MigratorError {
    fn from(err: std::io::Error) -> MigratorError {
        MigratorError::Io(err)
    }
}

#[cfg(feature = "rusqlite")]
impl From<rusqlite::Error> for MigratorError {
    fn from(err: rusqlite::Error) -> MigratorError {
        MigratorError::Sqlite(err)
    }
}

#[cfg(feature = "tokio")]
impl From<tokio::task::JoinError> for MigratorError {
    fn from(err: tokio::task::JoinError) -> MigratorError {
        MigratorError::Join(err)
    }
}

#[cfg(feature = "toml")]
impl From<toml::de::Error> for MigratorError {
    fn from(err: toml::de::Error) -> MigratorError {
        MigratorError::Config(err)
    }
}

impl MigratorError {
    /// The failed [`UpdateResult`] a rolled back transition leaves behind.
    pub fn update_result(&self) -> Option<UpdateResult> {
        match self {
            MigratorError::TransitionApply {
                reached, applied, ..
            } => Some(UpdateResult {
                success: false,
                new_version: *reached,
                error: self.to_string(),
                applied: applied.clone(),
            }),
            _ => None,
        }
    }
}

fn display_version(version: Option<VersionId>) -> String {
    match version {
        Some(version) => version.to_string(),
        None => "none".to_string(),
    }
}

/// Checked before each transaction begins. A started transaction always runs
/// to commit or rollback.
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

impl Cancellation for () {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Cancellation for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "tokio")]
impl Cancellation for tokio_util::sync::CancellationToken {
    fn is_cancelled(&self) -> bool {
        tokio_util::sync::CancellationToken::is_cancelled(self)
    }
}

/// Transitions resolved for one component, not yet applied.
#[derive(Clone, Debug)]
pub struct MigrationPlan {
    component: String,
    start: Option<VersionId>,
    steps: Vec<Transition>,
    target: Option<VersionId>,
    max: Option<VersionId>,
}

impl MigrationPlan {
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Version recorded in the ledger when the plan was made.
    pub fn start(&self) -> Option<VersionId> {
        self.start
    }

    pub fn steps(&self) -> &[Transition] {
        &self.steps
    }

    /// Version reached once every step is applied.
    pub fn target(&self) -> Option<VersionId> {
        self.target
    }

    /// Highest version known to the catalog.
    pub fn max_version(&self) -> Option<VersionId> {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.target == self.max
    }

    /// The gap left once the plan is applied, if any.
    pub fn version_gap(&self) -> Option<MigratorError> {
        if self.is_complete() {
            None
        } else {
            Some(self.gap_error(self.target))
        }
    }

    fn gap_error(&self, current: Option<VersionId>) -> MigratorError {
        MigratorError::VersionGap {
            component: self.component.clone(),
            current: display_version(current),
            max: display_version(self.max),
        }
    }
}

/// Walk the transitions in ascending `from` order, taking each one that
/// starts at the version reached so far.
///
/// Several transitions with the same `from` are not alternatives: the first
/// one in catalog order wins and the others never match again.
pub fn resolve_plan(
    component: &str,
    current: Option<VersionId>,
    transitions: &[Transition],
) -> MigrationPlan {
    let mut ordered: Vec<&Transition> = transitions.iter().collect();
    ordered.sort_by(|a, b| a.from_version().cmp(&b.from_version()));

    let mut target = current;
    let mut max = current;
    let mut steps = Vec::new();
    for transition in ordered {
        let to = Some(transition.to_version());
        if max < to {
            max = to;
        }
        if transition.from_version() == target {
            steps.push(transition.clone());
            target = to;
        }
    }

    MigrationPlan {
        component: component.to_string(),
        start: current,
        steps,
        target,
        max,
    }
}

/// Outcome of bringing one component up to date.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateResult {
    pub success: bool,
    pub new_version: Option<VersionId>,
    /// Empty on success.
    pub error: String,
    /// Transitions committed by this call, in order.
    pub applied: Vec<String>,
}

impl UpdateResult {
    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Brings the reserved core component and one application component up to
/// date in a shared database.
pub struct Migrator {
    config: Config,
    catalog: ScriptCatalog,
    core_catalog: ScriptCatalog,
    core_source: CoreScripts,
    component: String,
    source: Box<dyn ScriptSource + Send + Sync>,
}

impl Migrator {
    pub fn new(
        config: Config,
        component: impl Into<String>,
        source: impl ScriptSource + Send + Sync + 'static,
    ) -> Result<Self, MigratorError> {
        let component = component.into();
        validate_component(&component)?;
        if component == CORE_COMPONENT {
            return Err(MigratorError::InvalidComponent {
                component,
                reason: "name is reserved",
            });
        }
        validate_table_name(config.effective_ledger_table_name())?;

        let catalog = ScriptCatalog::new(config.layout.clone())?;
        let core_catalog = ScriptCatalog::new(ScriptLayout::default())?;
        let core_source = CoreScripts::new(config.effective_ledger_table_name());
        Ok(Migrator {
            config,
            catalog,
            core_catalog,
            core_source,
            component,
            source: Box::new(source),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Components in the order they are updated.
    pub fn components(&self) -> [&str; 2] {
        [CORE_COMPONENT, &self.component]
    }

    pub fn ledger(&self) -> VersionLedger<'_> {
        VersionLedger::new(self.config.effective_ledger_table_name())
    }

    /// Catalogue the scripts of `component`, which must be one of [`Self::components`].
    pub fn transitions(&self, component: &str) -> Result<TransitionSet, MigratorError> {
        let set = if component == CORE_COMPONENT {
            self.core_catalog.resolve(&self.core_source)?
        } else if component == self.component {
            self.catalog.resolve(self.source.as_ref())?
        } else {
            return Err(MigratorError::InvalidComponent {
                component: component.to_string(),
                reason: "unknown component",
            });
        };
        Ok(set)
    }

    pub fn get_version<C: Client + ?Sized>(
        &self,
        client: &mut C,
        component: &str,
    ) -> Result<Option<VersionId>, MigratorError> {
        self.ledger().read_version(client, component)
    }

    pub fn plan<C: Client + ?Sized>(
        &self,
        client: &mut C,
        component: &str,
    ) -> Result<MigrationPlan, MigratorError> {
        let set = self.transitions(component)?;
        let current = self.get_version(client, component)?;
        Ok(resolve_plan(component, current, &set.transitions))
    }

    /// Plans for every component, read from the current ledger state.
    pub fn plans<C: Client + ?Sized>(
        &self,
        client: &mut C,
    ) -> Result<Vec<MigrationPlan>, MigratorError> {
        self.components()
            .iter()
            .map(|component| self.plan(client, component))
            .collect()
    }

    /// Apply one transition atomically together with its ledger update.
    pub fn apply_transition<C: Client + ?Sized>(
        &self,
        client: &mut C,
        component: &str,
        transition: &Transition,
    ) -> Result<(), MigratorError> {
        let ledger = self.ledger();
        let result = client.begin_transaction().and_then(|_| {
            for statement in transition.executable_statements() {
                client.execute_raw(statement)?;
            }
            ledger.write(&mut *client, component, transition.to_version())?;
            client.commit()
        });

        result.map_err(|e| {
            if let Err(rollback_err) = client.rollback() {
                error!(
                    "rollback of transition {} for component `{}` failed: {}",
                    transition, component, rollback_err
                );
            }
            MigratorError::TransitionApply {
                component: component.to_string(),
                transition: transition.to_string(),
                reached: transition.from_version(),
                applied: Vec::new(),
                source: Box::new(e),
            }
        })
    }

    pub fn apply_plan<C: Client + ?Sized>(
        &self,
        client: &mut C,
        plan: &MigrationPlan,
        cancel: &dyn Cancellation,
    ) -> Result<UpdateResult, MigratorError> {
        self.apply_plan_observed(client, plan, cancel, &mut |_, _| {})
    }

    /// [`Self::apply_plan`], calling `on_step` after every attempted step
    /// with its outcome.
    pub fn apply_plan_observed<C: Client + ?Sized>(
        &self,
        client: &mut C,
        plan: &MigrationPlan,
        cancel: &dyn Cancellation,
        on_step: &mut dyn FnMut(&Transition, Result<(), &MigratorError>),
    ) -> Result<UpdateResult, MigratorError> {
        let mut current = plan.start();
        let mut applied = Vec::new();
        for step in plan.steps() {
            if cancel.is_cancelled() {
                warn!(
                    "component `{}`: cancelled at version {}",
                    plan.component(),
                    display_version(current)
                );
                return Err(MigratorError::Cancelled);
            }
            if let Err(mut e) = self.apply_transition(client, plan.component(), step) {
                if let MigratorError::TransitionApply {
                    reached,
                    applied: committed,
                    ..
                } = &mut e
                {
                    *reached = current;
                    *committed = applied;
                }
                on_step(step, Err(&e));
                return Err(e);
            }
            info!("component `{}`: applied {}", plan.component(), step);
            on_step(step, Ok(()));
            current = Some(step.to_version());
            applied.push(step.to_string());
        }

        if current != plan.max_version() {
            let gap = plan.gap_error(current);
            warn!("{}", gap);
            return Ok(UpdateResult {
                success: false,
                new_version: current,
                error: gap.to_string(),
                applied,
            });
        }
        Ok(UpdateResult {
            success: true,
            new_version: current,
            error: String::new(),
            applied,
        })
    }

    pub fn update_component<C: Client + ?Sized>(
        &self,
        client: &mut C,
        component: &str,
        cancel: &dyn Cancellation,
    ) -> Result<UpdateResult, MigratorError> {
        if cancel.is_cancelled() {
            return Err(MigratorError::Cancelled);
        }
        let plan = self.plan(client, component)?;
        self.apply_plan(client, &plan, cancel)
    }

    /// Apply pending transitions of the core component, then of the
    /// application component.
    ///
    /// A failed core update is returned as is, the application component is
    /// not touched then.
    pub fn update_database<C: Client + ?Sized>(
        &self,
        client: &mut C,
    ) -> Result<UpdateResult, MigratorError> {
        self.update_database_with(client, &())
    }

    pub fn update_database_with<C: Client + ?Sized>(
        &self,
        client: &mut C,
        cancel: &dyn Cancellation,
    ) -> Result<UpdateResult, MigratorError> {
        let core = self.update_component(client, CORE_COMPONENT, cancel)?;
        if !core.success {
            return Ok(core);
        }
        self.update_component(client, &self.component, cancel)
    }

    /// Make sure the database exists and every component is up to date.
    ///
    /// Safe to call on every startup. Returns whether the update succeeded;
    /// an unreachable database is an error.
    pub fn ensure_database_created<C: Client + ?Sized>(
        &self,
        client: &mut C,
    ) -> Result<bool, MigratorError> {
        self.ensure_database_created_with(client, &())
    }

    /// Probe the database, creating it when allowed by
    /// [`Config::auto_create`].
    pub fn ensure_database_exists<C: Client + ?Sized>(
        &self,
        client: &mut C,
    ) -> Result<(), MigratorError> {
        if client.can_connect() {
            return Ok(());
        }
        if self.config.auto_create {
            info!("creating database {}", client.target());
            if let Err(e) = client.create_database() {
                warn!("cannot create database {}: {}", client.target(), e);
            }
            if client.can_connect() {
                return Ok(());
            }
        }
        Err(MigratorError::DatabaseUnavailable {
            target: client.target(),
        })
    }

    pub fn ensure_database_created_with<C: Client + ?Sized>(
        &self,
        client: &mut C,
        cancel: &dyn Cancellation,
    ) -> Result<bool, MigratorError> {
        if cancel.is_cancelled() {
            return Err(MigratorError::Cancelled);
        }
        self.ensure_database_exists(client)?;

        let result = self.update_database_with(client, cancel)?;
        if !result.success {
            error!("database update failed: {}", result.error);
        }
        Ok(result.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtmigrator_core::script::ScriptFragment;
    use std::collections::HashMap;

    fn v(s: &str) -> VersionId {
        s.parse().unwrap()
    }

    fn step(from: &str, to: &str) -> Transition {
        Transition::new(Some(v(from)), v(to), vec![format!("{from}->{to}").into()])
    }

    fn bootstrap(to: &str) -> Transition {
        Transition::new(None, v(to), vec!["create".into()])
    }

    #[derive(Debug, PartialEq)]
    enum Op {
        Begin,
        Execute(String),
        Upsert(String, String),
        Commit,
        Rollback,
    }

    /// Ledger kept in memory; statements containing `FAIL` fail.
    #[derive(Default)]
    struct MemoryClient {
        reachable: bool,
        creatable: bool,
        versions: HashMap<String, String>,
        pending: Option<HashMap<String, String>>,
        ops: Vec<Op>,
    }

    impl MemoryClient {
        fn new() -> Self {
            MemoryClient {
                reachable: true,
                creatable: true,
                ..Default::default()
            }
        }

        fn with_version(mut self, component: &str, version: &str) -> Self {
            self.versions
                .insert(component.to_string(), version.to_string());
            self
        }

        fn version(&self, component: &str) -> Option<&str> {
            self.versions.get(component).map(String::as_str)
        }

        fn begins(&self) -> usize {
            self.ops.iter().filter(|op| **op == Op::Begin).count()
        }
    }

    impl Client for MemoryClient {
        fn target(&self) -> String {
            "memory".to_string()
        }

        fn can_connect(&mut self) -> bool {
            self.reachable
        }

        fn create_database(&mut self) -> Result<(), MigratorError> {
            if self.creatable {
                self.reachable = true;
                Ok(())
            } else {
                Err(MigratorError::Io(std::io::Error::other("read-only")))
            }
        }

        fn begin_transaction(&mut self) -> Result<(), MigratorError> {
            self.ops.push(Op::Begin);
            self.pending = Some(self.versions.clone());
            Ok(())
        }

        fn execute_raw(&mut self, sql: &str) -> Result<(), MigratorError> {
            self.ops.push(Op::Execute(sql.to_string()));
            if sql.contains("FAIL") {
                return Err(MigratorError::Io(std::io::Error::other("statement failed")));
            }
            Ok(())
        }

        fn commit(&mut self) -> Result<(), MigratorError> {
            self.ops.push(Op::Commit);
            if let Some(pending) = self.pending.take() {
                self.versions = pending;
            }
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), MigratorError> {
            self.ops.push(Op::Rollback);
            self.pending = None;
            Ok(())
        }

        fn read_version(
            &mut self,
            _ledger_table: &str,
            component: &str,
        ) -> Result<Option<String>, MigratorError> {
            Ok(self.versions.get(component).cloned())
        }

        fn upsert_version(
            &mut self,
            _ledger_table: &str,
            component: &str,
            version: &str,
        ) -> Result<(), MigratorError> {
            self.ops
                .push(Op::Upsert(component.to_string(), version.to_string()));
            match self.pending.as_mut() {
                Some(pending) => {
                    pending.insert(component.to_string(), version.to_string());
                    Ok(())
                }
                None => Err(MigratorError::Io(std::io::Error::other(
                    "no transaction",
                ))),
            }
        }
    }

    fn migrator(fragments: Vec<ScriptFragment>) -> Migrator {
        Migrator::new(Config::default(), "app", fragments).unwrap()
    }

    fn app_scripts() -> Vec<ScriptFragment> {
        vec![
            ScriptFragment::new("create/tables.sql", "create app"),
            ScriptFragment::new("update/1.0_1.1.sql", "app 1.1"),
            ScriptFragment::new("update/1.1_1.2.sql", "app 1.2"),
        ]
    }

    #[test]
    fn plan_follows_the_chain() {
        let transitions = vec![step("1.1", "1.2"), step("1.0", "1.1")];
        let plan = resolve_plan("app", Some(v("1.0")), &transitions);

        assert_eq!(plan.steps().len(), 2);
        assert_eq!(plan.steps()[0].to_string(), "1.0 -> 1.1");
        assert_eq!(plan.steps()[1].to_string(), "1.1 -> 1.2");
        assert_eq!(plan.target(), Some(v("1.2")));
        assert!(plan.is_complete());
    }

    #[test]
    fn plan_stops_at_gap() {
        let transitions = vec![step("1.0", "1.1"), step("1.2", "1.3")];
        let plan = resolve_plan("app", Some(v("1.0")), &transitions);

        assert_eq!(plan.steps().len(), 1);
        assert_eq!(plan.target(), Some(v("1.1")));
        assert_eq!(plan.max_version(), Some(v("1.3")));
        assert!(!plan.is_complete());
        assert_eq!(
            plan.version_gap().unwrap().to_string(),
            "no transition bridges 1.1 to 1.3 for component `app`"
        );
    }

    #[test]
    fn plan_prefers_bootstrap_on_empty_ledger() {
        let transitions = vec![step("1.0", "1.1"), step("1.1", "1.2"), bootstrap("1.2")];
        let plan = resolve_plan("app", None, &transitions);

        assert_eq!(plan.steps().len(), 1);
        assert!(plan.steps()[0].is_bootstrap());
        assert_eq!(plan.target(), Some(v("1.2")));
        assert!(plan.is_complete());

        let plan = resolve_plan("app", Some(v("1.0")), &transitions);
        assert_eq!(plan.steps().len(), 2);
        assert!(plan.steps().iter().all(|t| !t.is_bootstrap()));
    }

    #[test]
    fn plan_without_bootstrap_on_empty_ledger() {
        let plan = resolve_plan("app", None, &[step("1.0", "1.1")]);
        assert!(plan.is_empty());
        assert_eq!(plan.target(), None);
        assert!(!plan.is_complete());
    }

    #[test]
    fn plan_up_to_date() {
        let transitions = vec![step("1.0", "1.1"), bootstrap("1.1")];
        let plan = resolve_plan("app", Some(v("1.1")), &transitions);
        assert!(plan.is_empty());
        assert!(plan.is_complete());

        let plan = resolve_plan("app", None, &[]);
        assert!(plan.is_empty());
        assert!(plan.is_complete());
    }

    #[test]
    fn plan_branches_take_first_in_catalog_order() {
        let transitions = vec![step("1.0", "1.1"), step("1.0", "2.0"), step("1.1", "2.0")];
        let plan = resolve_plan("app", Some(v("1.0")), &transitions);

        let steps: Vec<String> = plan.steps().iter().map(|t| t.to_string()).collect();
        assert_eq!(steps, vec!["1.0 -> 1.1", "1.1 -> 2.0"]);
        assert!(plan.is_complete());
    }

    #[test]
    fn plan_ignores_transitions_below_current() {
        let transitions = vec![step("1.0", "1.1"), step("1.1", "1.2"), step("1.2", "1.3")];
        let plan = resolve_plan("app", Some(v("1.2")), &transitions);

        assert_eq!(plan.steps().len(), 1);
        assert_eq!(plan.target(), Some(v("1.3")));
    }

    #[test]
    fn apply_transition_is_atomic() {
        let migrator = migrator(app_scripts());
        let mut client = MemoryClient::new().with_version("app", "1.0");
        let transition = Transition::new(
            Some(v("1.0")),
            v("1.1"),
            vec!["first".into(), "FAIL".into(), "third".into()],
        );

        let err = migrator
            .apply_transition(&mut client, "app", &transition)
            .unwrap_err();
        match &err {
            MigratorError::TransitionApply {
                component,
                transition,
                reached,
                applied,
                ..
            } => {
                assert_eq!(component, "app");
                assert_eq!(transition, "1.0 -> 1.1");
                assert_eq!(*reached, Some(v("1.0")));
                assert!(applied.is_empty());
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            err.to_string(),
            "cannot apply transition 1.0 -> 1.1 for component `app`"
        );
        assert_eq!(client.version("app"), Some("1.0"));
        assert_eq!(
            client.ops,
            vec![
                Op::Begin,
                Op::Execute("first".to_string()),
                Op::Execute("FAIL".to_string()),
                Op::Rollback,
            ]
        );
    }

    #[test]
    fn apply_transition_skips_blank_statements() {
        let migrator = migrator(app_scripts());
        let mut client = MemoryClient::new();
        let transition = Transition::new(
            Some(v("1.0")),
            v("1.1"),
            vec!["a".into(), " \n ".into(), "b".into()],
        );

        migrator
            .apply_transition(&mut client, "app", &transition)
            .unwrap();
        assert_eq!(
            client.ops,
            vec![
                Op::Begin,
                Op::Execute("a".to_string()),
                Op::Execute("b".to_string()),
                Op::Upsert("app".to_string(), "1.1".to_string()),
                Op::Commit,
            ]
        );
        assert_eq!(client.version("app"), Some("1.1"));
    }

    #[test]
    fn update_reports_gap() {
        let migrator = migrator(vec![
            ScriptFragment::new("update/1.0_1.1.sql", "a"),
            ScriptFragment::new("update/1.2_1.3.sql", "b"),
        ]);
        let mut client = MemoryClient::new()
            .with_version("_core", "1.0")
            .with_version("app", "1.0");

        let result = migrator.update_database(&mut client).unwrap();
        assert!(!result.success);
        assert_eq!(result.new_version, Some(v("1.1")));
        assert_eq!(
            result.error,
            "no transition bridges 1.1 to 1.3 for component `app`"
        );
        assert_eq!(result.applied, vec!["1.0 -> 1.1"]);
        assert_eq!(client.version("app"), Some("1.1"));
    }

    #[test]
    fn update_stops_on_failed_transition() {
        let migrator = migrator(vec![
            ScriptFragment::new("update/1.0_1.1.sql", "a"),
            ScriptFragment::new("update/1.1_1.2.sql", "FAIL"),
            ScriptFragment::new("update/1.2_1.3.sql", "c"),
        ]);
        let mut client = MemoryClient::new()
            .with_version("_core", "1.0")
            .with_version("app", "1.0");

        let err = migrator.update_database(&mut client).unwrap_err();
        match &err {
            MigratorError::TransitionApply {
                transition,
                reached,
                applied,
                ..
            } => {
                assert_eq!(transition, "1.1 -> 1.2");
                assert_eq!(*reached, Some(v("1.1")));
                assert_eq!(applied, &vec!["1.0 -> 1.1".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        let result = err.update_result().unwrap();
        assert!(!result.success);
        assert_eq!(result.new_version, Some(v("1.1")));
        assert_eq!(
            result.error,
            "cannot apply transition 1.1 -> 1.2 for component `app`"
        );
        assert!(MigratorError::Cancelled.update_result().is_none());
        assert_eq!(client.version("app"), Some("1.1"));
        assert!(!client.ops.contains(&Op::Execute("c".to_string())));
    }

    #[test]
    fn observer_sees_every_attempted_step() {
        let migrator = migrator(vec![
            ScriptFragment::new("update/1.0_1.1.sql", "a"),
            ScriptFragment::new("update/1.1_1.2.sql", "FAIL"),
        ]);
        let mut client = MemoryClient::new().with_version("app", "1.0");
        let plan = migrator.plan(&mut client, "app").unwrap();

        let mut seen = Vec::new();
        let mut record = |step: &Transition, outcome: Result<(), &MigratorError>| {
            seen.push((step.to_string(), outcome.is_ok()));
        };
        let result = migrator.apply_plan_observed(&mut client, &plan, &(), &mut record);
        assert!(result.is_err());
        assert_eq!(
            seen,
            vec![
                ("1.0 -> 1.1".to_string(), true),
                ("1.1 -> 1.2".to_string(), false),
            ]
        );
    }

    #[test]
    fn update_bootstraps_core_then_component() {
        let migrator = migrator(app_scripts());
        let mut client = MemoryClient::new();

        let result = migrator.update_database(&mut client).unwrap();
        assert!(result.success);
        assert_eq!(result.new_version, Some(v("1.2")));
        assert_eq!(result.applied, vec!["bootstrap -> 1.2"]);
        assert_eq!(client.version("_core"), Some("1.0"));
        assert_eq!(client.version("app"), Some("1.2"));

        let upserts: Vec<&Op> = client
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Upsert(..)))
            .collect();
        assert_eq!(
            upserts,
            vec![
                &Op::Upsert("_core".to_string(), "1.0".to_string()),
                &Op::Upsert("app".to_string(), "1.2".to_string()),
            ]
        );
    }

    #[test]
    fn failed_core_update_leaves_component_alone() {
        let migrator = migrator(app_scripts());
        // the ledger claims a core version no script knows about
        let mut client = MemoryClient::new().with_version("_core", "0.5");

        let result = migrator.update_database(&mut client).unwrap();
        assert!(!result.success);
        assert!(result.error.contains("`_core`"));
        assert_eq!(client.version("app"), None);
        assert_eq!(client.begins(), 0);
    }

    #[test]
    fn ensure_database_is_idempotent() {
        let migrator = migrator(app_scripts());
        let mut client = MemoryClient::new();

        assert!(migrator.ensure_database_created(&mut client).unwrap());
        let begins = client.begins();
        assert_eq!(begins, 2);

        assert!(migrator.ensure_database_created(&mut client).unwrap());
        assert_eq!(client.begins(), begins);
        assert_eq!(
            migrator.get_version(&mut client, "app").unwrap(),
            Some(v("1.2"))
        );
    }

    #[test]
    fn ensure_database_creates_missing_store() {
        let migrator = migrator(app_scripts());
        let mut client = MemoryClient::new();
        client.reachable = false;

        assert!(migrator.ensure_database_created(&mut client).unwrap());
        assert!(client.reachable);
    }

    #[test]
    fn ensure_database_unavailable() {
        let migrator = migrator(app_scripts());
        let mut client = MemoryClient::new();
        client.reachable = false;
        client.creatable = false;

        assert!(matches!(
            migrator.ensure_database_created(&mut client),
            Err(MigratorError::DatabaseUnavailable { .. })
        ));

        let config = Config {
            auto_create: false,
            ..Config::default()
        };
        let migrator = Migrator::new(config, "app", app_scripts()).unwrap();
        let mut client = MemoryClient::new();
        client.reachable = false;
        assert!(matches!(
            migrator.ensure_database_created(&mut client),
            Err(MigratorError::DatabaseUnavailable { .. })
        ));
        assert!(!client.reachable);
    }

    #[test]
    fn cancellation_before_a_step() {
        let migrator = migrator(app_scripts());
        let mut client = MemoryClient::new();
        let cancel = AtomicBool::new(true);

        assert!(matches!(
            migrator.update_database_with(&mut client, &cancel),
            Err(MigratorError::Cancelled)
        ));
        assert!(client.ops.is_empty());

        let plan = migrator.plan(&mut client, "_core").unwrap();
        assert!(matches!(
            migrator.apply_plan(&mut client, &plan, &cancel),
            Err(MigratorError::Cancelled)
        ));
        assert!(client.ops.is_empty());
    }

    /// Raises the flag once the first transaction commits.
    struct CancelOnCommit<'a> {
        inner: MemoryClient,
        cancel: &'a AtomicBool,
    }

    impl Client for CancelOnCommit<'_> {
        fn target(&self) -> String {
            self.inner.target()
        }

        fn can_connect(&mut self) -> bool {
            self.inner.can_connect()
        }

        fn create_database(&mut self) -> Result<(), MigratorError> {
            self.inner.create_database()
        }

        fn begin_transaction(&mut self) -> Result<(), MigratorError> {
            self.inner.begin_transaction()
        }

        fn execute_raw(&mut self, sql: &str) -> Result<(), MigratorError> {
            self.inner.execute_raw(sql)
        }

        fn commit(&mut self) -> Result<(), MigratorError> {
            self.inner.commit()?;
            self.cancel.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), MigratorError> {
            self.inner.rollback()
        }

        fn read_version(
            &mut self,
            ledger_table: &str,
            component: &str,
        ) -> Result<Option<String>, MigratorError> {
            self.inner.read_version(ledger_table, component)
        }

        fn upsert_version(
            &mut self,
            ledger_table: &str,
            component: &str,
            version: &str,
        ) -> Result<(), MigratorError> {
            self.inner.upsert_version(ledger_table, component, version)
        }
    }

    #[test]
    fn cancellation_between_steps_keeps_committed_work() {
        let migrator = migrator(app_scripts());
        let cancel = AtomicBool::new(false);
        let mut client = CancelOnCommit {
            inner: MemoryClient::new()
                .with_version("_core", "1.0")
                .with_version("app", "1.0"),
            cancel: &cancel,
        };

        assert!(matches!(
            migrator.update_database_with(&mut client, &cancel),
            Err(MigratorError::Cancelled)
        ));
        assert_eq!(client.inner.version("app"), Some("1.1"));
        assert_eq!(client.inner.begins(), 1);
        assert!(!client.inner.ops.contains(&Op::Execute("app 1.2".to_string())));
    }

    #[test]
    fn duplicate_scripts_abort_the_update() {
        let migrator = migrator(vec![
            ScriptFragment::new("update/1.0_1.1_0.sql", "a"),
            ScriptFragment::new("update/1.0_1.1_0.sql", "b"),
        ]);
        let mut client = MemoryClient::new().with_version("_core", "1.0");

        assert!(matches!(
            migrator.update_database(&mut client),
            Err(MigratorError::Script(ScriptError::DuplicateTransition { .. }))
        ));
    }

    #[test]
    fn component_names_are_checked() {
        assert!(matches!(
            Migrator::new(Config::default(), "_core", app_scripts()),
            Err(MigratorError::InvalidComponent { .. })
        ));
        assert!(Migrator::new(Config::default(), "", app_scripts()).is_err());

        let config = Config {
            ledger_table_name: Some("bad name".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            Migrator::new(config, "app", app_scripts()),
            Err(MigratorError::InvalidLedgerTable { .. })
        ));

        let migrator = migrator(app_scripts());
        assert_eq!(migrator.components(), ["_core", "app"]);
        assert!(matches!(
            migrator.transitions("other"),
            Err(MigratorError::InvalidComponent { .. })
        ));
    }

    #[test]
    fn malformed_ledger_version_is_an_error() {
        let migrator = migrator(app_scripts());
        let mut client = MemoryClient::new().with_version("app", "one");
        assert!(matches!(
            migrator.get_version(&mut client, "app"),
            Err(MigratorError::Script(ScriptError::MalformedVersion { .. }))
        ));
    }
}
