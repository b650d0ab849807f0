use crate::version::VersionId;
use log::{debug, warn};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// An error occurred while reading or cataloguing scripts
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid regex pattern")]
    InvalidRegex(#[from] regex::Error),

    #[error("invalid script path `{path}`")]
    InvalidScriptPath {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid script file `{path}`")]
    InvalidScriptFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed version `{version}`: {reason}")]
    MalformedVersion {
        version: String,
        reason: &'static str,
    },

    #[error("transition `{key}` is defined twice (check `{name1}` and `{name2}`)")]
    DuplicateTransition {
        key: TransitionKey,
        name1: String,
        name2: String,
    },
}

/// A named piece of SQL as supplied by a [`ScriptSource`].
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptFragment {
    pub name: Cow<'static, str>,
    pub sql: Cow<'static, str>,
}

impl ScriptFragment {
    pub fn new(name: impl Into<Cow<'static, str>>, sql: impl Into<Cow<'static, str>>) -> Self {
        ScriptFragment {
            name: name.into(),
            sql: sql.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Supplies the raw script fragments backing one component.
///
/// No ordering is expected from the source, the catalog imposes its own.
pub trait ScriptSource {
    fn fragments(&self) -> Result<Vec<ScriptFragment>, ScriptError>;
}

impl ScriptSource for [ScriptFragment] {
    fn fragments(&self) -> Result<Vec<ScriptFragment>, ScriptError> {
        Ok(self.to_vec())
    }
}

impl ScriptSource for Vec<ScriptFragment> {
    fn fragments(&self) -> Result<Vec<ScriptFragment>, ScriptError> {
        Ok(self.clone())
    }
}

impl<T: ScriptSource + ?Sized> ScriptSource for &T {
    fn fragments(&self) -> Result<Vec<ScriptFragment>, ScriptError> {
        (**self).fragments()
    }
}

/// Reads `*.sql` files below a directory at the time of the call.
///
/// Fragment names are the file paths relative to the directory, joined with `/`.
#[derive(Clone, Debug)]
pub struct DirectoryScriptSource {
    root: PathBuf,
}

impl DirectoryScriptSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryScriptSource { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ScriptSource for DirectoryScriptSource {
    fn fragments(&self) -> Result<Vec<ScriptFragment>, ScriptError> {
        let mut fragments = Vec::new();
        for (path, name) in find_sql_fragments(&self.root)? {
            let sql = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ScriptError::InvalidScriptPath {
                    path: path.clone(),
                    source: e,
                },
                _ => ScriptError::InvalidScriptFile {
                    path: path.clone(),
                    source: e,
                },
            })?;
            fragments.push(ScriptFragment::new(name, sql));
        }
        Ok(fragments)
    }
}

/// Find SQLs on file system recursively across given a location
pub fn find_sql_files(
    location: impl AsRef<Path>,
) -> Result<impl Iterator<Item = PathBuf>, ScriptError> {
    let location: &Path = location.as_ref();
    let location = location
        .canonicalize()
        .map_err(|err| ScriptError::InvalidScriptPath {
            path: location.to_path_buf(),
            source: err,
        })?;

    let file_paths = WalkDir::new(location)
        .into_iter()
        .filter_map(Result::ok)
        .map(DirEntry::into_path)
        .filter(|entry| {
            entry.is_file()
                && match entry.extension() {
                    Some(ext) => ext == OsStr::new("sql"),
                    None => false,
                }
        });

    Ok(file_paths)
}

/// Relative `/`-joined name of `path` below `root`, `None` when `path` is
/// outside `root` or not valid UTF-8.
pub fn fragment_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// `*.sql` files below `location` paired with their fragment names, sorted by name.
pub fn find_sql_fragments(
    location: impl AsRef<Path>,
) -> Result<Vec<(PathBuf, String)>, ScriptError> {
    let location: &Path = location.as_ref();
    let root = location
        .canonicalize()
        .map_err(|err| ScriptError::InvalidScriptPath {
            path: location.to_path_buf(),
            source: err,
        })?;
    let mut files: Vec<(PathBuf, String)> = find_sql_files(&root)?
        .filter_map(|path| {
            let name = fragment_name(&root, &path)?;
            Some((path, name))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Identifies one fragment of an incremental step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionKey {
    pub from: VersionId,
    pub to: VersionId,
    pub priority: u32,
}

impl fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.from, self.to, self.priority)
    }
}

/// One atomic step: an ordered batch of statements moving a component from
/// `from` to `to`. `from == None` is the bootstrap step creating the whole
/// schema at once.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    from: Option<VersionId>,
    to: VersionId,
    statements: Vec<Cow<'static, str>>,
}

impl Transition {
    pub fn new(
        from: Option<VersionId>,
        to: VersionId,
        statements: Vec<Cow<'static, str>>,
    ) -> Self {
        Transition {
            from,
            to,
            statements,
        }
    }

    pub fn from_version(&self) -> Option<VersionId> {
        self.from
    }

    pub fn to_version(&self) -> VersionId {
        self.to
    }

    pub fn is_bootstrap(&self) -> bool {
        self.from.is_none()
    }

    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.statements.iter().map(|s| s.as_ref())
    }

    /// Statements that actually carry SQL.
    pub fn executable_statements(&self) -> impl Iterator<Item = &str> {
        self.statements().filter(|s| !s.trim().is_empty())
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for statement in self.statements.iter() {
            hasher.update(statement.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn checksum32(&self) -> String {
        self.checksum()[0..8].to_string()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Some(from) => write!(f, "{} -> {}", from, self.to),
            None => write!(f, "bootstrap -> {}", self.to),
        }
    }
}

/// Where each kind of fragment lives within a component's scripts.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScriptLayout {
    /// Prefix of incremental scripts, followed by `<from>_<to>[_<priority>]`.
    pub update_prefix: String,
    pub schema_script: String,
    pub tables_script: String,
    /// Prefix of procedure, view or trigger scripts appended to the bootstrap step.
    pub procedures_prefix: String,
    pub extension: String,
}

impl Default for ScriptLayout {
    fn default() -> Self {
        ScriptLayout {
            update_prefix: "update/".to_string(),
            schema_script: "create/schema.sql".to_string(),
            tables_script: "create/tables.sql".to_string(),
            procedures_prefix: "create/procedures/".to_string(),
            extension: ".sql".to_string(),
        }
    }
}

/// Non-fatal findings of a catalog run.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptWarning {
    MalformedName { name: String, reason: String },
    MissingBootstrap,
}

impl fmt::Display for ScriptWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptWarning::MalformedName { name, reason } => {
                write!(f, "update script `{}` is malformed: {}", name, reason)
            }
            ScriptWarning::MissingBootstrap => write!(f, "no create script found"),
        }
    }
}

/// Transitions of one component, incremental steps first (ordered by
/// `from`, then `to`) and the bootstrap step, if any, last.
#[derive(Clone, Debug, Default)]
pub struct TransitionSet {
    pub transitions: Vec<Transition>,
    pub warnings: Vec<ScriptWarning>,
}

impl TransitionSet {
    pub fn max_version(&self) -> Option<VersionId> {
        self.transitions.iter().map(Transition::to_version).max()
    }

    pub fn bootstrap(&self) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.is_bootstrap())
    }
}

/// Turns script fragments into [`Transition`]s according to a [`ScriptLayout`].
#[derive(Clone, Debug)]
pub struct ScriptCatalog {
    layout: ScriptLayout,
    update_regex: Regex,
    id_regex: Regex,
}

impl ScriptCatalog {
    pub fn new(layout: ScriptLayout) -> Result<Self, ScriptError> {
        let update_regex = Regex::new(&format!(
            "^{}(.+){}$",
            regex::escape(&layout.update_prefix),
            regex::escape(&layout.extension)
        ))?;
        let id_regex = Regex::new(r"^([^_]+)_([^_]+)(?:_([^_]+))?$")?;
        Ok(ScriptCatalog {
            layout,
            update_regex,
            id_regex,
        })
    }

    pub fn layout(&self) -> &ScriptLayout {
        &self.layout
    }

    /// Parse the transition key out of an update script name.
    ///
    /// `None` when the name is not an update script at all, `Some(Err(reason))`
    /// when it is one but cannot be parsed.
    pub fn parse_update_name(&self, name: &str) -> Option<Result<TransitionKey, String>> {
        let id = self.update_regex.captures(name)?.get(1)?.as_str();
        Some(self.parse_id(id))
    }

    fn parse_id(&self, id: &str) -> Result<TransitionKey, String> {
        let captures = self
            .id_regex
            .captures(id)
            .ok_or_else(|| "name must be `<from>_<to>[_<priority>]`".to_string())?;
        let from = VersionId::parse(&captures[1]).map_err(|e| e.to_string())?;
        let to = VersionId::parse(&captures[2]).map_err(|e| e.to_string())?;
        let priority = match captures.get(3) {
            Some(priority) => {
                let priority = priority.as_str();
                let invalid =
                    || format!("priority `{}` is not a non-negative integer", priority);
                if !priority.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                priority.parse::<u32>().map_err(|_| invalid())?
            }
            None => 0,
        };
        if from >= to {
            return Err(format!(
                "from version {} must be lower than to version {}",
                from, to
            ));
        }
        Ok(TransitionKey { from, to, priority })
    }

    fn is_procedure(&self, name: &str) -> bool {
        name.starts_with(&self.layout.procedures_prefix) && name.ends_with(&self.layout.extension)
    }

    pub fn resolve(&self, source: &dyn ScriptSource) -> Result<TransitionSet, ScriptError> {
        let fragments = source.fragments()?;
        let mut warnings = Vec::new();

        let mut updates: BTreeMap<TransitionKey, &ScriptFragment> = BTreeMap::new();
        let mut schema: Option<&ScriptFragment> = None;
        let mut tables: Option<&ScriptFragment> = None;
        let mut procedures: Vec<&ScriptFragment> = Vec::new();

        for fragment in fragments.iter() {
            let name = fragment.name();
            match self.parse_update_name(name) {
                Some(Ok(key)) => {
                    if let Some(existing) = updates.insert(key, fragment) {
                        return Err(ScriptError::DuplicateTransition {
                            key,
                            name1: existing.name().to_string(),
                            name2: name.to_string(),
                        });
                    }
                }
                Some(Err(reason)) => {
                    warn!("update script `{}` is malformed: {}", name, reason);
                    warnings.push(ScriptWarning::MalformedName {
                        name: name.to_string(),
                        reason,
                    });
                }
                None if name == self.layout.schema_script => schema = Some(fragment),
                None if name == self.layout.tables_script => tables = Some(fragment),
                None if self.is_procedure(name) => procedures.push(fragment),
                None => debug!("ignoring script `{}`", name),
            }
        }

        let mut transitions: Vec<Transition> = Vec::new();
        for (key, fragment) in updates {
            let sql = fragment.sql.clone();
            if let Some(last) = transitions
                .last_mut()
                .filter(|last| last.from == Some(key.from) && last.to == key.to)
            {
                last.statements.push(sql);
            } else {
                transitions.push(Transition::new(Some(key.from), key.to, vec![sql]));
            }
        }

        procedures.sort_by(|a, b| a.name().cmp(b.name()));
        let create: Vec<Cow<'static, str>> = schema
            .into_iter()
            .chain(tables)
            .chain(procedures)
            .map(|fragment| fragment.sql.clone())
            .collect();
        if create.is_empty() {
            warn!("create script not found");
            warnings.push(ScriptWarning::MissingBootstrap);
        } else {
            let to = transitions
                .iter()
                .map(Transition::to_version)
                .max()
                .unwrap_or(VersionId::DEFAULT);
            transitions.push(Transition::new(None, to, create));
        }

        Ok(TransitionSet {
            transitions,
            warnings,
        })
    }
}
