//! Guard Policy
//!
//! Process-wide, read-only settings for the SQL guard: the forbidden-token
//! set and the row cap. Comments and CTEs are never permitted.

use crate::error::{GenieError, Result};
use std::fmt;

/// Row cap applied when nothing else is configured.
pub const DEFAULT_MAX_ROWS: u64 = 100;

/// Data-modifying, administrative, procedure-execution and batch keywords.
/// A trailing `*` matches by prefix.
pub const DEFAULT_FORBIDDEN_TOKENS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "MERGE",
    "DROP",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "GRANT",
    "REVOKE",
    "DENY",
    "EXEC",
    "EXECUTE",
    "INTO",
    "DECLARE",
    "SET",
    "USE",
    "GO",
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "SAVE",
    "TRAN",
    "TRANSACTION",
    "BACKUP",
    "RESTORE",
    "DBCC",
    "KILL",
    "SHUTDOWN",
    "RECONFIGURE",
    "WAITFOR",
    "BULK",
    "OPENROWSET",
    "OPENDATASOURCE",
    "OPENQUERY",
    "OPENXML",
    "xp_*",
    "sp_*",
];

/// One entry of the forbidden set, stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForbiddenPattern {
    Exact(String),
    Prefix(String),
}

impl ForbiddenPattern {
    /// Parses a configured entry. Blank entries and a bare `*` are ignored.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim().to_uppercase();
        match entry.strip_suffix('*') {
            Some(prefix) if !prefix.is_empty() => Some(Self::Prefix(prefix.to_string())),
            Some(_) => None,
            None if entry.is_empty() => None,
            None => Some(Self::Exact(entry)),
        }
    }

    /// `word` must already be upper-cased.
    pub fn matches(&self, word: &str) -> bool {
        match self {
            Self::Exact(exact) => word == exact,
            Self::Prefix(prefix) => word.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for ForbiddenPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(exact) => write!(f, "{}", exact),
            Self::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPolicy {
    forbidden: Vec<ForbiddenPattern>,
    max_rows: u64,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            forbidden: parse_patterns(DEFAULT_FORBIDDEN_TOKENS),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

impl GuardPolicy {
    /// Builds a policy from an explicit forbidden set. The row cap must be at
    /// least 1.
    pub fn new<I, S>(max_rows: u64, forbidden: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if max_rows == 0 {
            return Err(GenieError::Config(
                "SQL guard row cap must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            forbidden: parse_patterns(forbidden),
            max_rows,
        })
    }

    /// Adds entries to the forbidden set, skipping duplicates.
    pub fn with_extra_forbidden<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in parse_patterns(extra) {
            if !self.forbidden.contains(&pattern) {
                self.forbidden.push(pattern);
            }
        }
        self
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    pub fn forbidden_patterns(&self) -> &[ForbiddenPattern] {
        &self.forbidden
    }

    pub const fn allows_comments(&self) -> bool {
        false
    }

    pub const fn allows_ctes(&self) -> bool {
        false
    }

    /// Returns the upper-cased word when it hits the forbidden set.
    pub fn forbidden_match(&self, word: &str) -> Option<String> {
        let upper = word.to_uppercase();
        self.forbidden
            .iter()
            .any(|pattern| pattern.matches(&upper))
            .then_some(upper)
    }
}

fn parse_patterns<I, S>(entries: I) -> Vec<ForbiddenPattern>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut patterns: Vec<ForbiddenPattern> = Vec::new();
    for pattern in entries
        .into_iter()
        .filter_map(|entry| ForbiddenPattern::parse(entry.as_ref()))
    {
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }
    patterns
}
