//! Row-Limit Normalizer
//!
//! The only guard stage that produces new SQL text. Works on a stream that
//! already passed the gate, so it can rely on a leading `SELECT` and at most
//! one trailing `;`.

use super::lexer::{Token, TokenStream};
use super::verdict::RejectionKind;

pub struct RowLimitNormalizer {
    cap: u64,
}

/// Parsed `TOP n` / `TOP (n)` clause, as positions in the significant-token
/// list.
struct TopClause {
    value: u64,
    /// index of the `TOP` keyword
    start: usize,
    /// one past the last token of the clause
    end: usize,
}

enum Edit {
    InsertAfter(usize, String),
    Replace { from: usize, to: usize, text: String },
}

impl RowLimitNormalizer {
    pub fn new(cap: u64) -> Self {
        Self { cap }
    }

    pub fn normalize(&self, stream: &TokenStream<'_>) -> Result<String, RejectionKind> {
        let tokens = stream.tokens();
        // indexes into `tokens` of everything but whitespace
        let sig: Vec<usize> = stream.significant().map(|(idx, _)| idx).collect();
        let at = |k: usize| sig.get(k).and_then(|&idx| tokens.get(idx));

        if !at(0).map_or(false, |t| t.is_keyword("SELECT")) {
            return Err(RejectionKind::MalformedInput);
        }

        // skip the modifier that must precede TOP
        let mut next = 1;
        if at(next).map_or(false, |t| t.is_keyword("DISTINCT") || t.is_keyword("ALL")) {
            next += 1;
        }

        let mut edit = None;
        let body_start = if at(next).map_or(false, |t| t.is_keyword("TOP")) {
            let clause = self.parse_top(&sig, tokens, next)?;
            if clause.value > self.cap {
                edit = Some(Edit::Replace {
                    from: sig[clause.start],
                    to: sig[clause.end - 1],
                    text: format!("TOP ({})", self.cap),
                });
            }
            clause.end
        } else {
            edit = Some(Edit::InsertAfter(sig[next - 1], format!(" TOP ({})", self.cap)));
            next
        };

        // the outer TOP is the only row-limiting clause allowed
        let second_limit = sig[body_start..].iter().any(|&idx| {
            let tok = &tokens[idx];
            tok.is_keyword("TOP") || tok.is_keyword("OFFSET") || tok.is_keyword("FETCH")
        });
        if second_limit {
            return Err(RejectionKind::MalformedLimitClause);
        }

        let terminator = sig
            .last()
            .copied()
            .filter(|&idx| tokens[idx].is_punct(";"));

        let mut out = String::with_capacity(stream.len() * 4 + 16);
        let mut idx = 0;
        while idx < tokens.len() {
            if Some(idx) == terminator {
                idx += 1;
                continue;
            }
            match edit.as_ref().filter(|edit| edit_starts_at(edit, idx)) {
                Some(Edit::Replace { to, text, .. }) => {
                    out.push_str(text);
                    idx = to + 1;
                }
                Some(Edit::InsertAfter(_, text)) => {
                    out.push_str(tokens[idx].text);
                    out.push_str(text);
                    idx += 1;
                }
                None => {
                    out.push_str(tokens[idx].text);
                    idx += 1;
                }
            }
        }

        Ok(out.trim().to_string())
    }

    /// `TOP` followed by an unsigned integer, optionally parenthesized.
    /// `PERCENT` and any non-literal expression are refused.
    fn parse_top(
        &self,
        sig: &[usize],
        tokens: &[Token<'_>],
        start: usize,
    ) -> Result<TopClause, RejectionKind> {
        let at = |k: usize| sig.get(k).and_then(|&idx| tokens.get(idx));

        let (literal, end) = match at(start + 1) {
            Some(open) if open.is_punct("(") => match (at(start + 2), at(start + 3)) {
                (Some(num), Some(close)) if num.is_unsigned_integer() && close.is_punct(")") => {
                    (num, start + 4)
                }
                _ => return Err(RejectionKind::MalformedLimitClause),
            },
            Some(num) if num.is_unsigned_integer() => (num, start + 2),
            _ => return Err(RejectionKind::MalformedLimitClause),
        };

        if at(end).map_or(false, |t| t.is_keyword("PERCENT")) {
            return Err(RejectionKind::MalformedLimitClause);
        }

        // digits only, so a parse failure means it overflowed: treat as huge
        let value = literal.text.parse::<u64>().unwrap_or(u64::MAX);
        Ok(TopClause { value, start, end })
    }
}

fn edit_starts_at(edit: &Edit, idx: usize) -> bool {
    match edit {
        Edit::InsertAfter(at, _) => *at == idx,
        Edit::Replace { from, .. } => *from == idx,
    }
}
