use crate::script::ScriptError;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const MAX_PARTS: usize = 4;

/// A dotted numeric version (`major.minor[.build[.revision]]`).
///
/// Missing trailing parts compare as zero, so `1.0` and `1.0.0` are equal and
/// hash the same. The parts are kept as written for display.
#[derive(Clone, Copy, Debug)]
pub struct VersionId {
    parts: [u32; MAX_PARTS],
    len: u8,
}

impl VersionId {
    /// Version used by a bootstrap script when no update script names one.
    pub const DEFAULT: VersionId = VersionId::new(1, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        VersionId {
            parts: [major, minor, 0, 0],
            len: 2,
        }
    }

    pub fn parse(version: &str) -> Result<Self, ScriptError> {
        let malformed = |reason: &'static str| ScriptError::MalformedVersion {
            version: version.to_string(),
            reason,
        };

        if version.is_empty() {
            return Err(malformed("empty version"));
        }
        let mut parts = [0u32; MAX_PARTS];
        let mut len = 0;
        for segment in version.split('.') {
            if len == MAX_PARTS {
                return Err(malformed("more than four parts"));
            }
            if segment.is_empty() {
                return Err(malformed("empty part"));
            }
            if !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed("non-numeric part"));
            }
            parts[len] = segment
                .parse()
                .map_err(|_| malformed("part out of range"))?;
            len += 1;
        }
        Ok(VersionId {
            parts,
            len: len as u8,
        })
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts[..self.len as usize]
    }

    pub fn major(&self) -> u32 {
        self.parts[0]
    }

    pub fn minor(&self) -> u32 {
        self.parts[1]
    }
}

impl FromStr for VersionId {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionId::parse(s)
    }
}

impl PartialEq for VersionId {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for VersionId {}

impl Hash for VersionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.parts().iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}
