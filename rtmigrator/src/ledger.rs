use crate::drivers::Client;
use crate::migrator::MigratorError;
use rtmigrator_core::script::{ScriptError, ScriptFragment, ScriptSource};
use rtmigrator_core::version::VersionId;
use std::borrow::Cow;
use std::fmt;

/// Reserved component owning the ledger table itself.
pub const CORE_COMPONENT: &str = "_core";

pub const DEFAULT_LEDGER_TABLE_NAME: &str = "_component_version";

pub const MAX_COMPONENT_NAME_LEN: usize = 100;

const LEDGER_TABLE_PLACEHOLDER: &str = "%LEDGER_TABLE_NAME%";

const CORE_SCRIPTS: &[ScriptFragment] = &[ScriptFragment {
    name: Cow::Borrowed("create/tables.sql"),
    sql: Cow::Borrowed(include_str!("../scripts/core/create/tables.sql")),
}];

/// A ledger row: the version currently applied for one component.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentVersionRecord {
    component: String,
    version: String,
}

impl ComponentVersionRecord {
    pub fn new(component: impl Into<String>, version: impl Into<String>) -> Self {
        ComponentVersionRecord {
            component: component.into(),
            version: version.into(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn version_id(&self) -> Result<VersionId, ScriptError> {
        VersionId::parse(&self.version)
    }
}

impl fmt::Display for ComponentVersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.component, self.version)
    }
}

pub(crate) fn validate_component(component: &str) -> Result<(), MigratorError> {
    let reason = if component.trim().is_empty() {
        "name is empty"
    } else if component.chars().count() > MAX_COMPONENT_NAME_LEN {
        "name is longer than 100 characters"
    } else {
        return Ok(());
    };
    Err(MigratorError::InvalidComponent {
        component: component.to_string(),
        reason,
    })
}

pub(crate) fn validate_table_name(name: &str) -> Result<(), MigratorError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(MigratorError::InvalidLedgerTable {
            name: name.to_string(),
        })
    }
}

/// Reads and writes component versions in one ledger table.
#[derive(Clone, Copy, Debug)]
pub struct VersionLedger<'a> {
    table_name: &'a str,
}

impl<'a> VersionLedger<'a> {
    pub fn new(table_name: &'a str) -> Self {
        VersionLedger { table_name }
    }

    pub fn table_name(&self) -> &str {
        self.table_name
    }

    /// `None` when the component was never applied, or the ledger table
    /// does not exist yet.
    pub fn read<C: Client + ?Sized>(
        &self,
        client: &mut C,
        component: &str,
    ) -> Result<Option<ComponentVersionRecord>, MigratorError> {
        validate_component(component)?;
        Ok(client
            .read_version(self.table_name, component)?
            .map(|version| ComponentVersionRecord::new(component, version)))
    }

    pub fn read_version<C: Client + ?Sized>(
        &self,
        client: &mut C,
        component: &str,
    ) -> Result<Option<VersionId>, MigratorError> {
        match self.read(client, component)? {
            Some(record) => Ok(Some(record.version_id()?)),
            None => Ok(None),
        }
    }

    /// Must run inside the transaction of the step that reached `version`.
    pub fn write<C: Client + ?Sized>(
        &self,
        client: &mut C,
        component: &str,
        version: VersionId,
    ) -> Result<(), MigratorError> {
        validate_component(component)?;
        client.upsert_version(self.table_name, component, &version.to_string())
    }
}

/// Scripts of the reserved core component, bound to a ledger table name.
#[derive(Clone, Debug)]
pub struct CoreScripts {
    table_name: String,
}

impl CoreScripts {
    pub fn new(table_name: impl Into<String>) -> Self {
        CoreScripts {
            table_name: table_name.into(),
        }
    }
}

impl ScriptSource for CoreScripts {
    fn fragments(&self) -> Result<Vec<ScriptFragment>, ScriptError> {
        Ok(CORE_SCRIPTS
            .iter()
            .map(|fragment| {
                ScriptFragment::new(
                    fragment.name.clone(),
                    fragment
                        .sql()
                        .replace(LEDGER_TABLE_PLACEHOLDER, &self.table_name),
                )
            })
            .collect())
    }
}
