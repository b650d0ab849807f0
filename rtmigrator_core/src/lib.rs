//! Script discovery and version-transition parsing shared by `rtmigrator`
//! and its proc-macro.

pub mod script;
pub mod version;
