use crate::ledger::DEFAULT_LEDGER_TABLE_NAME;
#[cfg(feature = "toml")]
use crate::migrator::MigratorError;
use rtmigrator_core::script::ScriptLayout;
#[cfg(feature = "toml")]
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Table holding one version row per component.
    pub ledger_table_name: Option<String>,

    /// Allow creating the database when it cannot be opened.
    pub auto_create: bool,

    /// Where update and create scripts are found within a component's scripts.
    pub layout: ScriptLayout,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ledger_table_name: None,
            auto_create: true,
            layout: ScriptLayout::default(),
        }
    }
}

impl Config {
    pub fn effective_ledger_table_name(&self) -> &str {
        self.ledger_table_name
            .as_deref()
            .unwrap_or(DEFAULT_LEDGER_TABLE_NAME)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self, MigratorError> {
        Ok(toml::from_str(content)?)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, MigratorError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
