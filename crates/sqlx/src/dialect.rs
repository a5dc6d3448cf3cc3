//! SQL dialect adapter.
//!
//! Canonical queries are written once, in the SQLite dialect
//! (lowercase keywords, `?` placeholders, `glob`, `rowid`). The
//! adapter rewrites them for the active engine:
//! - `?` placeholders become `$1, $2, ...` on PostgreSQL
//! - `glob` becomes `ilike` (bytea operands wrapped in `convert_from`)
//! - `rowid` becomes `id` (the typed tables carry identity columns)
//! - `limit offset, count` becomes `limit count offset offset`
//!
//! The rewriter works on a token stream, not raw substrings, so string
//! literals pass through untouched. A clause it does not recognize is
//! left unchanged and surfaces as a database error downstream.

use std::borrow::Cow;

/// Target SQL engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Rewrites a canonical query for this engine.
    /// SQLite input is returned as-is.
    pub fn prepare<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        match self {
            Dialect::Sqlite => Cow::Borrowed(sql),
            Dialect::Postgres => Cow::Owned(rewrite_postgres(sql)),
        }
    }

    /// Translates a glob pattern argument for this engine.
    /// SQLite matches with `glob` natively; PostgreSQL gets the
    /// LIKE-translated form for `ilike`.
    pub fn pattern(&self, glob: &str) -> String {
        match self {
            Dialect::Sqlite => glob.to_string(),
            Dialect::Postgres => glob_to_like(glob),
        }
    }
}

/// A lexed fragment of a SQL string.
#[derive(Debug, PartialEq)]
enum Token {
    /// Identifier or keyword, possibly qualified (`rlist.rowid`).
    Word(String),
    /// Quoted string literal, quotes included.
    Literal(String),
    /// Numeric literal.
    Number(String),
    /// A `?` placeholder.
    Placeholder,
    /// Whitespace run.
    Space(String),
    /// Any other single character.
    Punct(char),
}

impl Token {
    fn is_space(&self) -> bool {
        matches!(self, Token::Space(_))
    }
}

fn lex(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch == '?' {
            chars.next();
            tokens.push(Token::Placeholder);
        } else if ch == '\'' {
            // String literal; doubled quotes stay inside it.
            let mut lit = String::new();
            lit.push(chars.next().unwrap());
            while let Some(c) = chars.next() {
                lit.push(c);
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        lit.push(chars.next().unwrap());
                    } else {
                        break;
                    }
                }
            }
            tokens.push(Token::Literal(lit));
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                    word.push(chars.next().unwrap());
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(word));
        } else if ch.is_ascii_digit() {
            let mut num = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    num.push(chars.next().unwrap());
                } else {
                    break;
                }
            }
            tokens.push(Token::Number(num));
        } else if ch.is_whitespace() {
            let mut ws = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    ws.push(chars.next().unwrap());
                } else {
                    break;
                }
            }
            tokens.push(Token::Space(ws));
        } else {
            chars.next();
            tokens.push(Token::Punct(ch));
        }
    }
    tokens
}

/// Rewrites a canonical (SQLite-flavored) query for PostgreSQL.
fn rewrite_postgres(sql: &str) -> String {
    let tokens = lex(sql);
    let mut out = String::with_capacity(sql.len() + 16);
    let mut placeholder = 0usize;
    let mut i = 0usize;

    while i < tokens.len() {
        match &tokens[i] {
            Token::Placeholder => {
                placeholder += 1;
                out.push('$');
                out.push_str(&placeholder.to_string());
                i += 1;
            }
            Token::Word(word) => {
                let lower = word.to_ascii_lowercase();
                if lower == "rowid" || lower.ends_with(".rowid") {
                    out.push_str(&word[..word.len() - "rowid".len()]);
                    out.push_str("id");
                    i += 1;
                } else if lower == "limit" {
                    match rewrite_limit(&tokens, i, &mut placeholder) {
                        Some((text, next)) => {
                            out.push_str(&text);
                            i = next;
                        }
                        None => {
                            out.push_str(word);
                            i += 1;
                        }
                    }
                } else if next_word_is(&tokens, i, "glob") {
                    // `X glob ?` -> `X ilike ?`, with bytea operands
                    // matched as text.
                    if lower == "elem" || lower.ends_with(".elem") {
                        out.push_str("convert_from(");
                        out.push_str(word);
                        out.push_str(", 'UTF8')");
                    } else {
                        out.push_str(word);
                    }
                    i += 1;
                } else if lower == "glob" {
                    out.push_str("ilike");
                    i += 1;
                } else {
                    out.push_str(word);
                    i += 1;
                }
            }
            Token::Literal(lit) => {
                out.push_str(lit);
                i += 1;
            }
            Token::Number(num) => {
                out.push_str(num);
                i += 1;
            }
            Token::Space(ws) => {
                out.push_str(ws);
                i += 1;
            }
            Token::Punct(ch) => {
                out.push(*ch);
                i += 1;
            }
        }
    }
    out
}

/// Reports whether the next non-space token after `i` is the given word.
fn next_word_is(tokens: &[Token], i: usize, word: &str) -> bool {
    tokens[i + 1..]
        .iter()
        .find(|t| !t.is_space())
        .map(|t| match t {
            Token::Word(w) => w.eq_ignore_ascii_case(word),
            _ => false,
        })
        .unwrap_or(false)
}

/// Rewrites `limit X, Y` (offset, count) into `limit Y offset X`.
/// Only the simple two-term shape with placeholder or numeric terms is
/// recognized; returns `None` otherwise so the clause passes through.
fn rewrite_limit(
    tokens: &[Token],
    start: usize,
    placeholder: &mut usize,
) -> Option<(String, usize)> {
    let mut i = start + 1;
    let skip_space = |i: &mut usize| {
        while *i < tokens.len() && tokens[*i].is_space() {
            *i += 1;
        }
    };

    skip_space(&mut i);
    let offset = limit_term(tokens.get(i)?)?;
    i += 1;
    skip_space(&mut i);
    match tokens.get(i) {
        Some(Token::Punct(',')) => i += 1,
        _ => return None,
    }
    skip_space(&mut i);
    let count = limit_term(tokens.get(i)?)?;
    i += 1;

    // Placeholders are numbered in appearance order: offset first.
    let offset = render_term(offset, placeholder);
    let count = render_term(count, placeholder);
    Some((format!("limit {count} offset {offset}"), i))
}

enum LimitTerm<'a> {
    Number(&'a str),
    Placeholder,
}

fn limit_term(token: &Token) -> Option<LimitTerm<'_>> {
    match token {
        Token::Number(n) => Some(LimitTerm::Number(n)),
        Token::Placeholder => Some(LimitTerm::Placeholder),
        _ => None,
    }
}

fn render_term(term: LimitTerm<'_>, placeholder: &mut usize) -> String {
    match term {
        LimitTerm::Number(n) => n.to_string(),
        LimitTerm::Placeholder => {
            *placeholder += 1;
            format!("${placeholder}", placeholder = *placeholder)
        }
    }
}

/// Expands an `in (:name)` macro into `in (?,?,...)` with `count`
/// placeholders. The first occurrence of `marker` is replaced.
pub fn expand_in(sql: &str, marker: &str, count: usize) -> String {
    let placeholders = vec!["?"; count.max(1)].join(",");
    sql.replacen(marker, &placeholders, 1)
}

/// Translates a glob pattern to a LIKE pattern:
/// `*` -> `%`, `?` -> `_`, literal `%`/`_`/`\` escaped.
/// Character classes are passed through unchanged.
pub fn glob_to_like(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len());
    for ch in glob.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}
