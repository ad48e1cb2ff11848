//! Grammar Gate
//!
//! Whitelist checks over a token stream. Each rule is a single forward pass
//! over tokens that were already classified by the lexer; nothing here looks
//! at raw text.

use super::lexer::{Token, TokenKind, TokenStream};
use super::policy::GuardPolicy;
use super::verdict::RejectionKind;

pub struct GrammarGate<'p> {
    policy: &'p GuardPolicy,
}

impl<'p> GrammarGate<'p> {
    pub fn new(policy: &'p GuardPolicy) -> Self {
        Self { policy }
    }

    /// First failing rule wins. Comments are checked before everything else
    /// so that any comment marker yields `CommentsNotAllowed`.
    pub fn check(&self, stream: &TokenStream<'_>) -> Result<(), RejectionKind> {
        let significant: Vec<&Token<'_>> = stream.significant().map(|(_, tok)| tok).collect();

        self.check_comments(stream)?;
        check_single_statement(&significant)?;
        check_statement_shape(&significant)?;
        self.check_no_ctes(&significant)?;
        self.check_forbidden_tokens(&significant)
    }

    fn check_comments(&self, stream: &TokenStream<'_>) -> Result<(), RejectionKind> {
        if !self.policy.allows_comments() && stream.has_comment_marker() {
            return Err(RejectionKind::CommentsNotAllowed);
        }
        Ok(())
    }

    fn check_no_ctes(&self, significant: &[&Token<'_>]) -> Result<(), RejectionKind> {
        if !self.policy.allows_ctes() && significant.iter().any(|tok| tok.is_keyword("WITH")) {
            return Err(RejectionKind::CtesNotAllowed);
        }
        Ok(())
    }

    /// Keywords and bare identifiers are matched as written; quoted
    /// identifiers by their inner text. String literals are data, not code.
    fn check_forbidden_tokens(&self, significant: &[&Token<'_>]) -> Result<(), RejectionKind> {
        for tok in significant {
            let word = match tok.kind {
                TokenKind::Keyword | TokenKind::Identifier => Some(tok.text),
                TokenKind::QuotedIdentifier => tok.quoted_inner(),
                _ => None,
            };
            if let Some(hit) = word.and_then(|w| self.policy.forbidden_match(w)) {
                return Err(RejectionKind::ForbiddenToken(hit));
            }
        }
        Ok(())
    }
}

/// At most one `;`, and only as the last significant token.
fn check_single_statement(significant: &[&Token<'_>]) -> Result<(), RejectionKind> {
    let mut terminated = false;
    for tok in significant {
        if terminated {
            return Err(RejectionKind::MultipleStatements);
        }
        if tok.is_punct(";") {
            terminated = true;
        }
    }
    Ok(())
}

/// Keywords that can only open a statement of their own. T-SQL batches need
/// no `;`, so seeing one after the leading `SELECT` means a second statement.
const STATEMENT_STARTERS: &[&str] = &[
    "BREAK",
    "CHECKPOINT",
    "CLOSE",
    "CONTINUE",
    "DEALLOCATE",
    "GOTO",
    "IF",
    "OPEN",
    "PRINT",
    "RAISERROR",
    "RETURN",
    "REVERT",
    "THROW",
    "WHILE",
];

fn starts_statement(tok: &Token<'_>) -> bool {
    STATEMENT_STARTERS.iter().any(|kw| tok.is_keyword(kw))
}

/// Leading `SELECT`, balanced parentheses, no statement-opening keyword
/// after it, and no second top-level `SELECT` unless it is joined by a set
/// operator.
fn check_statement_shape(significant: &[&Token<'_>]) -> Result<(), RejectionKind> {
    match significant.first() {
        None => return Err(RejectionKind::MalformedInput),
        Some(tok) if tok.is_keyword("SELECT") => {}
        Some(tok) if tok.is_keyword("WITH") => return Err(RejectionKind::CtesNotAllowed),
        Some(_) => return Err(RejectionKind::ForbiddenStatementKind),
    }

    let mut depth: usize = 0;
    for (idx, tok) in significant.iter().enumerate() {
        if tok.is_punct("(") {
            depth += 1;
        } else if tok.is_punct(")") {
            depth = depth.checked_sub(1).ok_or(RejectionKind::MalformedInput)?;
        } else if idx > 0 && starts_statement(tok) {
            return Err(RejectionKind::MultipleStatements);
        } else if idx > 0
            && depth == 0
            && tok.is_keyword("SELECT")
            && !follows_set_operator(significant, idx)
        {
            return Err(RejectionKind::MultipleStatements);
        }
    }

    if depth != 0 {
        return Err(RejectionKind::MalformedInput);
    }
    Ok(())
}

fn follows_set_operator(significant: &[&Token<'_>], idx: usize) -> bool {
    let is_set_op = |tok: &Token<'_>| {
        tok.is_keyword("UNION") || tok.is_keyword("EXCEPT") || tok.is_keyword("INTERSECT")
    };
    match idx.checked_sub(1).and_then(|i| significant.get(i)) {
        Some(prev) if is_set_op(prev) => true,
        Some(prev) if prev.is_keyword("ALL") => idx
            .checked_sub(2)
            .and_then(|i| significant.get(i))
            .map_or(false, |tok| tok.is_keyword("UNION")),
        _ => false,
    }
}
