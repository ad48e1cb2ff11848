//! SQL Tokenizer / Classifier
//!
//! Segments untrusted model output into a [`TokenStream`] without evaluating
//! anything. Every byte of the input lands in exactly one token, so the
//! original text can be rebuilt by concatenating token texts.
//!
//! Comment markers (`--`, `/*`, `*/`) are never swallowed: outside literals
//! they become [`TokenKind::CommentMarker`] tokens, inside a string literal or
//! quoted identifier they flag the enclosing token.

use thiserror::Error;

/// Lexical category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Identifier,
    /// `[name]` or `"name"`
    QuotedIdentifier,
    /// `'text'` or `N'text'`
    StringLiteral,
    NumericLiteral,
    Punctuation,
    CommentMarker,
    Whitespace,
}

/// A single token borrowed from the candidate text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// A comment marker appears inside this literal or quoted identifier.
    pub hides_comment_marker: bool,
}

impl<'a> Token<'a> {
    fn new(kind: TokenKind, text: &'a str) -> Self {
        Self {
            kind,
            text,
            hides_comment_marker: false,
        }
    }

    /// Case-insensitive keyword comparison.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_punct(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == symbol
    }

    pub fn is_whitespace(&self) -> bool {
        self.kind == TokenKind::Whitespace
    }

    /// Identifier text between the delimiters of a quoted identifier.
    pub fn quoted_inner(&self) -> Option<&'a str> {
        if self.kind != TokenKind::QuotedIdentifier || self.text.len() < 2 {
            return None;
        }
        self.text.get(1..self.text.len() - 1)
    }

    /// True when the token is an unsigned integer literal (digits only).
    pub fn is_unsigned_integer(&self) -> bool {
        self.kind == TokenKind::NumericLiteral
            && !self.text.is_empty()
            && self.text.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Ordered tokens of one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStream<'a> {
    tokens: Vec<Token<'a>>,
}

impl<'a> TokenStream<'a> {
    pub fn tokens(&self) -> &[Token<'a>] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens other than whitespace, paired with their index in the stream.
    pub fn significant(&self) -> impl Iterator<Item = (usize, &Token<'a>)> + '_ {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, tok)| !tok.is_whitespace())
    }

    /// Any comment marker, either as its own token or hidden in a literal.
    pub fn has_comment_marker(&self) -> bool {
        self.tokens
            .iter()
            .any(|tok| tok.kind == TokenKind::CommentMarker || tok.hides_comment_marker)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated string literal starting at byte {0}")]
    UnterminatedString(usize),

    #[error("unterminated quoted identifier starting at byte {0}")]
    UnterminatedIdentifier(usize),

    #[error("nested '[' inside bracketed identifier at byte {0}")]
    NestedBracket(usize),

    #[error("unexpected character '{ch}' at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },
}

const COMMENT_MARKERS: [&str; 3] = ["--", "/*", "*/"];

/// Raw check used only to pick a rejection reason once lexing has failed.
pub fn contains_comment_marker(text: &str) -> bool {
    COMMENT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Closed T-SQL keyword table. Anything else made of word characters is an
/// identifier.
fn is_keyword(upper: &str) -> bool {
    matches!(
        upper,
        "ADD"
            | "ALL"
            | "ALTER"
            | "AND"
            | "ANY"
            | "APPLY"
            | "AS"
            | "ASC"
            | "BACKUP"
            | "BEGIN"
            | "BETWEEN"
            | "BREAK"
            | "BULK"
            | "BY"
            | "CASE"
            | "CAST"
            | "CHECKPOINT"
            | "CLOSE"
            | "COLLATE"
            | "COMMIT"
            | "CONTINUE"
            | "CONVERT"
            | "CREATE"
            | "CROSS"
            | "CURRENT"
            | "CURSOR"
            | "DATABASE"
            | "DBCC"
            | "DEALLOCATE"
            | "DECLARE"
            | "DEFAULT"
            | "DELETE"
            | "DENY"
            | "DESC"
            | "DISTINCT"
            | "DROP"
            | "ELSE"
            | "END"
            | "ESCAPE"
            | "EXCEPT"
            | "EXEC"
            | "EXECUTE"
            | "EXISTS"
            | "FETCH"
            | "FIRST"
            | "FOR"
            | "FROM"
            | "FULL"
            | "GO"
            | "GOTO"
            | "GRANT"
            | "GROUP"
            | "HAVING"
            | "IF"
            | "IN"
            | "INNER"
            | "INSERT"
            | "INTERSECT"
            | "INTO"
            | "IS"
            | "JOIN"
            | "KILL"
            | "LEFT"
            | "LIKE"
            | "MERGE"
            | "NEXT"
            | "NOT"
            | "NULL"
            | "OFFSET"
            | "ON"
            | "ONLY"
            | "OPEN"
            | "OPENDATASOURCE"
            | "OPENQUERY"
            | "OPENROWSET"
            | "OPENXML"
            | "OPTION"
            | "OR"
            | "ORDER"
            | "OUTER"
            | "OVER"
            | "PARTITION"
            | "PERCENT"
            | "PIVOT"
            | "PRINT"
            | "PROC"
            | "PROCEDURE"
            | "RAISERROR"
            | "RECONFIGURE"
            | "RESTORE"
            | "RETURN"
            | "REVERT"
            | "REVOKE"
            | "RIGHT"
            | "ROLLBACK"
            | "ROW"
            | "ROWS"
            | "SAVE"
            | "SELECT"
            | "SET"
            | "SHUTDOWN"
            | "SOME"
            | "TABLE"
            | "THEN"
            | "THROW"
            | "TIES"
            | "TOP"
            | "TRAN"
            | "TRANSACTION"
            | "TRUNCATE"
            | "UNION"
            | "UNPIVOT"
            | "UPDATE"
            | "USE"
            | "VALUES"
            | "VIEW"
            | "WAITFOR"
            | "WHEN"
            | "WHERE"
            | "WHILE"
            | "WITH"
            | "WITHIN"
    )
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '@' || ch == '#'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '@' | '#' | '$')
}

fn is_punctuation(ch: char) -> bool {
    matches!(
        ch,
        '(' | ')'
            | ','
            | '.'
            | ';'
            | '+'
            | '-'
            | '*'
            | '/'
            | '%'
            | '='
            | '<'
            | '>'
            | '!'
            | '&'
            | '|'
            | '^'
            | '~'
            | ':'
    )
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Tokenize the whole input. Empty input yields an empty stream.
    pub fn tokenize(mut self) -> Result<TokenStream<'a>, LexError> {
        let mut tokens = Vec::new();
        while let Some(tok) = self.next_token()? {
            tokens.push(tok);
        }
        Ok(TokenStream { tokens })
    }

    // -- helpers ------------------------------------------------------------

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.rest().chars().nth(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn advance_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().map_or(false, &pred) {
            self.advance();
        }
    }

    fn at_comment_marker(&self) -> bool {
        let rest = self.rest();
        COMMENT_MARKERS.iter().any(|marker| rest.starts_with(marker))
    }

    // -- main scanner -------------------------------------------------------

    fn next_token(&mut self) -> Result<Option<Token<'a>>, LexError> {
        let start = self.pos;
        let ch = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let mut hides_comment_marker = false;
        let kind = if ch.is_whitespace() {
            self.advance_while(char::is_whitespace);
            TokenKind::Whitespace
        } else if self.at_comment_marker() {
            self.read_comment();
            TokenKind::CommentMarker
        } else if ch == '\'' {
            hides_comment_marker = self.read_delimited('\'', start)?;
            TokenKind::StringLiteral
        } else if (ch == 'N' || ch == 'n') && self.peek_at(1) == Some('\'') {
            self.advance();
            hides_comment_marker = self.read_delimited('\'', start)?;
            TokenKind::StringLiteral
        } else if ch == '[' {
            hides_comment_marker = self.read_delimited(']', start)?;
            TokenKind::QuotedIdentifier
        } else if ch == '"' {
            hides_comment_marker = self.read_delimited('"', start)?;
            TokenKind::QuotedIdentifier
        } else if ch.is_ascii_digit()
            || (ch == '.' && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()))
        {
            self.read_number();
            TokenKind::NumericLiteral
        } else if is_ident_start(ch) {
            self.advance_while(is_ident_continue);
            if is_keyword(&self.input[start..self.pos].to_ascii_uppercase()) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            }
        } else if is_punctuation(ch) {
            self.advance();
            TokenKind::Punctuation
        } else {
            return Err(LexError::UnexpectedChar { ch, pos: start });
        };

        let mut token = Token::new(kind, &self.input[start..self.pos]);
        token.hides_comment_marker = hides_comment_marker;
        Ok(Some(token))
    }

    /// `--` runs to end of line, `/*` to the matching `*/` or end of input,
    /// a stray `*/` is just the two characters.
    fn read_comment(&mut self) {
        let rest = self.rest();
        if rest.starts_with("--") {
            let len = rest.find('\n').unwrap_or(rest.len());
            self.pos += len;
        } else if rest.starts_with("/*") {
            let len = rest[2..].find("*/").map_or(rest.len(), |end| end + 4);
            self.pos += len;
        } else {
            self.pos += 2;
        }
    }

    /// Reads a literal or quoted identifier whose closing delimiter is
    /// escaped by doubling. Returns whether a comment marker was seen inside.
    fn read_delimited(&mut self, close: char, start: usize) -> Result<bool, LexError> {
        let bracketed = close == ']';
        self.advance(); // opening delimiter
        let mut saw_marker = false;
        loop {
            if self.at_comment_marker() {
                saw_marker = true;
            }
            match self.advance() {
                None if close == '\'' => return Err(LexError::UnterminatedString(start)),
                None => return Err(LexError::UnterminatedIdentifier(start)),
                Some('[') if bracketed => {
                    return Err(LexError::NestedBracket(self.pos - 1));
                }
                Some(c) if c == close => {
                    if self.peek() == Some(close) {
                        self.advance();
                    } else {
                        return Ok(saw_marker);
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn read_number(&mut self) {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.pos += 2;
            self.advance_while(|c| c.is_ascii_hexdigit());
            return;
        }

        self.advance_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.advance();
            self.advance_while(|c| c.is_ascii_digit());
        }

        // Exponent only when digits follow, so `1e` stays number + identifier.
        if matches!(self.peek(), Some('e') | Some('E')) {
            let digit_at = match self.peek_at(1) {
                Some('+') | Some('-') => 2,
                _ => 1,
            };
            if self.peek_at(digit_at).map_or(false, |c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    self.advance();
                }
                self.advance_while(|c| c.is_ascii_digit());
            }
        }
    }
}
