#![forbid(unsafe_code)]

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

pub trait PathApproval: Send + Sync {
    /// Decide whether a changed file should be queued for scanning.
    fn approve(&self, path: &Path) -> bool;
}

impl<F> PathApproval for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn approve(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl PathApproval for ApproveAll {
    fn approve(&self, _path: &Path) -> bool {
        true
    }
}

/// Include/exclude list of path prefixes. A leading `!` excludes, the
/// longest matching prefix decides and unmatched paths are accepted.
///
/// Prefixes are compared as raw bytes, so file names that are not valid
/// UTF-8 are judged like any other.
#[derive(Debug, Clone, Default)]
pub struct PrefixApproval {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: OsString,
    include: bool,
}

impl Rule {
    fn parse(raw: OsString) -> Self {
        match raw.as_bytes().strip_prefix(b"!") {
            Some(rest) => Self {
                prefix: OsStr::from_bytes(rest).to_owned(),
                include: false,
            },
            None => Self {
                prefix: raw,
                include: true,
            },
        }
    }

    fn matches(&self, path: &[u8]) -> bool {
        path.starts_with(self.prefix.as_bytes())
    }
}

impl PrefixApproval {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            rules: prefixes.into_iter().map(|raw| Rule::parse(raw.into())).collect(),
        }
    }

    pub fn from_paths(prefixes: &[PathBuf]) -> Self {
        Self::new(prefixes.iter().map(|prefix| prefix.as_os_str().to_owned()))
    }
}

impl PathApproval for PrefixApproval {
    fn approve(&self, path: &Path) -> bool {
        let path = path.as_os_str().as_bytes();
        let mut decisive: Option<&Rule> = None;
        for rule in self.rules.iter().filter(|rule| rule.matches(path)) {
            // first listed wins a tie
            if decisive.is_none_or(|best| best.prefix.len() < rule.prefix.len()) {
                decisive = Some(rule);
            }
        }
        decisive.is_none_or(|rule| rule.include)
    }
}
