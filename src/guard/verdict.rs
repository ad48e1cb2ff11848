//! Guard inputs and outcomes.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a candidate was refused. Every guard failure is one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "token", rename_all = "snake_case")]
pub enum RejectionKind {
    #[error("SQL could not be parsed safely")]
    MalformedInput,

    #[error("Multiple statements are not allowed")]
    MultipleStatements,

    #[error("Only SELECT statements are allowed")]
    ForbiddenStatementKind,

    #[error("SQL comments are not allowed")]
    CommentsNotAllowed,

    #[error("CTEs (WITH ...) are not allowed")]
    CtesNotAllowed,

    #[error("Forbidden token detected: {0}")]
    ForbiddenToken(String),

    #[error("TOP clause is malformed or misplaced")]
    MalformedLimitClause,
}

impl RejectionKind {
    /// Stable machine-readable name.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedInput => "malformed_input",
            Self::MultipleStatements => "multiple_statements",
            Self::ForbiddenStatementKind => "forbidden_statement_kind",
            Self::CommentsNotAllowed => "comments_not_allowed",
            Self::CtesNotAllowed => "ctes_not_allowed",
            Self::ForbiddenToken(_) => "forbidden_token",
            Self::MalformedLimitClause => "malformed_limit_clause",
        }
    }
}

/// SQL text that passed the guard. Only the guard constructs it, and the
/// database collaborator only accepts this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub(crate) fn new(sql: String) -> Self {
        Self(sql)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for ValidatedSql {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationVerdict {
    Accepted { normalized_sql: ValidatedSql },
    Rejected { reason: RejectionKind },
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn normalized_sql(&self) -> Option<&ValidatedSql> {
        match self {
            Self::Accepted { normalized_sql } => Some(normalized_sql),
            Self::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&RejectionKind> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { reason } => Some(reason),
        }
    }

    pub fn into_result(self) -> std::result::Result<ValidatedSql, RejectionKind> {
        match self {
            Self::Accepted { normalized_sql } => Ok(normalized_sql),
            Self::Rejected { reason } => Err(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    ModelOutput,
}

/// Unmodified generator output awaiting validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    text: String,
    source: CandidateSource,
}

impl RawCandidate {
    pub fn from_model_output(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: CandidateSource::ModelOutput,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> CandidateSource {
        self.source
    }
}
