//! SQL Guard
//!
//! Sits between untrusted model output and a live database connection.
//! `SqlGuard::validate` tokenizes the candidate, runs the grammar gate and
//! rewrites the row-limiting clause. Every failure is a
//! [`ValidationVerdict::Rejected`]; nothing here panics or does I/O.

pub mod gate;
pub mod lexer;
pub mod limit;
pub mod policy;
pub mod verdict;

pub use gate::GrammarGate;
pub use lexer::{LexError, Lexer, Token, TokenKind, TokenStream};
pub use limit::RowLimitNormalizer;
pub use policy::{ForbiddenPattern, GuardPolicy, DEFAULT_FORBIDDEN_TOKENS, DEFAULT_MAX_ROWS};
pub use verdict::{CandidateSource, RawCandidate, RejectionKind, ValidatedSql, ValidationVerdict};

use std::sync::Arc;
use tracing::{debug, warn};

/// Validator façade. Cheap to clone; the policy is shared read-only.
#[derive(Debug, Clone, Default)]
pub struct SqlGuard {
    policy: Arc<GuardPolicy>,
}

impl SqlGuard {
    pub fn new(policy: GuardPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    pub fn validate_candidate(&self, candidate: &RawCandidate) -> ValidationVerdict {
        self.validate(candidate.text())
    }

    pub fn validate(&self, raw: &str) -> ValidationVerdict {
        match self.accept(raw) {
            Ok(sql) => ValidationVerdict::Accepted {
                normalized_sql: ValidatedSql::new(sql),
            },
            Err(reason) => {
                debug!(reason = reason.code(), "SQL candidate rejected");
                ValidationVerdict::Rejected { reason }
            }
        }
    }

    /// Normalizes, then requires the output to be a fixed point of the same
    /// pipeline. Anything else fails closed.
    fn accept(&self, raw: &str) -> Result<String, RejectionKind> {
        let normalized = self.normalize(raw)?;
        match self.normalize(&normalized) {
            Ok(again) if again == normalized => Ok(normalized),
            outcome => {
                warn!(?outcome, "normalized SQL did not re-validate; rejecting");
                Err(RejectionKind::MalformedInput)
            }
        }
    }

    fn normalize(&self, raw: &str) -> Result<String, RejectionKind> {
        let stream = Lexer::new(raw).tokenize().map_err(|err| {
            if lexer::contains_comment_marker(raw) {
                RejectionKind::CommentsNotAllowed
            } else {
                debug!(error = %err, "SQL candidate could not be tokenized");
                RejectionKind::MalformedInput
            }
        })?;

        GrammarGate::new(&self.policy).check(&stream)?;
        RowLimitNormalizer::new(self.policy.max_rows()).normalize(&stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SqlGuard {
        SqlGuard::default()
    }

    fn accepted(sql: &str) -> String {
        match guard().validate(sql) {
            ValidationVerdict::Accepted { normalized_sql } => normalized_sql.into_inner(),
            other => panic!("expected {sql:?} to be accepted, got {other:?}"),
        }
    }

    fn rejected(sql: &str) -> RejectionKind {
        match guard().validate(sql) {
            ValidationVerdict::Rejected { reason } => reason,
            other => panic!("expected {sql:?} to be rejected, got {other:?}"),
        }
    }

    #[test]
    fn scenario_inserts_default_cap() {
        assert_eq!(
            accepted("SELECT name FROM Customers"),
            "SELECT TOP (100) name FROM Customers"
        );
    }

    #[test]
    fn scenario_keeps_small_top() {
        assert_eq!(
            accepted("SELECT TOP (10) name FROM Customers"),
            "SELECT TOP (10) name FROM Customers"
        );
    }

    #[test]
    fn scenario_caps_large_top() {
        assert_eq!(
            accepted("SELECT TOP (500) name FROM Customers"),
            "SELECT TOP (100) name FROM Customers"
        );
    }

    #[test]
    fn scenario_rejections() {
        assert_eq!(
            rejected("SELECT * FROM Orders; DROP TABLE Orders"),
            RejectionKind::MultipleStatements
        );
        assert_eq!(
            rejected("WITH c AS (SELECT 1) SELECT * FROM c"),
            RejectionKind::CtesNotAllowed
        );
        assert_eq!(
            rejected("SELECT * FROM Orders -- drop everything"),
            RejectionKind::CommentsNotAllowed
        );
    }

    #[test]
    fn only_the_outer_select_may_limit_rows() {
        assert_eq!(
            rejected("SELECT a FROM (SELECT TOP 1000 a FROM t) x"),
            RejectionKind::MalformedLimitClause
        );
        assert_eq!(
            rejected("SELECT TOP (10) a FROM t WHERE a IN (SELECT TOP (5) b FROM u)"),
            RejectionKind::MalformedLimitClause
        );
        assert_eq!(
            rejected("SELECT a FROM t ORDER BY a OFFSET 0 ROWS FETCH NEXT 5000 ROWS ONLY"),
            RejectionKind::MalformedLimitClause
        );
    }

    #[test]
    fn batches_without_terminator_are_multiple_statements() {
        assert_eq!(
            rejected("SELECT 1 WHILE 1=1 PRINT 'x'"),
            RejectionKind::MultipleStatements
        );
        assert_eq!(
            rejected("SELECT 1 IF 1=1 RAISERROR('boom', 16, 1)"),
            RejectionKind::MultipleStatements
        );
        assert_eq!(
            rejected("SELECT a FROM t CHECKPOINT"),
            RejectionKind::MultipleStatements
        );
    }

    #[test]
    fn set_operator_branches_stay_unlimited_in_text() {
        assert_eq!(
            accepted("SELECT a FROM t UNION ALL SELECT b FROM u"),
            "SELECT TOP (100) a FROM t UNION ALL SELECT b FROM u"
        );
    }

    #[test]
    fn lexing_failure_is_malformed_input() {
        assert_eq!(rejected("SELECT 'abc FROM t"), RejectionKind::MalformedInput);
        assert_eq!(rejected(""), RejectionKind::MalformedInput);
    }

    #[test]
    fn lexing_failure_with_comment_marker_is_a_comment_rejection() {
        assert_eq!(
            rejected("SELECT 'abc -- FROM t"),
            RejectionKind::CommentsNotAllowed
        );
        assert_eq!(
            rejected("SELECT `x` /* hidden */"),
            RejectionKind::CommentsNotAllowed
        );
    }

    #[test]
    fn custom_cap_is_honoured() {
        let guard = SqlGuard::new(GuardPolicy::new(5, DEFAULT_FORBIDDEN_TOKENS).unwrap());
        let verdict = guard.validate("SELECT TOP 10 a FROM t");
        assert_eq!(
            verdict.normalized_sql().map(ValidatedSql::as_str),
            Some("SELECT TOP (5) a FROM t")
        );
    }

    #[test]
    fn candidate_wrapper_validates_its_text() {
        let candidate = RawCandidate::from_model_output("SELECT 1");
        assert_eq!(candidate.source(), CandidateSource::ModelOutput);
        assert!(guard().validate_candidate(&candidate).is_accepted());
    }
}
