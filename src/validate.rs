//! Read-only SQL validation.
//!
//! [`validate`] turns untrusted SQL text into a single, comment-free, read-only
//! statement or rejects it with [`LitehouseError::InvalidQuery`]. It never
//! touches the engine. The steps, in order:
//!
//! 1. strip `-- line` and `/* block */` comments (non-nested)
//! 2. trim every line and join the non-empty ones with single spaces
//! 3. drop one trailing `;`
//! 4. reject any denylisted keyword appearing as a whole word (case-insensitive)
//! 5. require the statement to start with `SELECT` or `WITH`
//!
//! Comments are removed before the keyword scan, so a keyword that only appears
//! inside a comment never triggers a rejection.

use std::sync::LazyLock;

use regex::Regex;

use crate::{LitehouseError, Result};

/// Keywords that make a statement unsafe or non-read-only
pub const BANNED_TOKENS: &[&str] = &[
    "INSTALL", "LOAD", "COPY", "ATTACH", "DETACH", "PRAGMA", "SET", "CREATE", "DROP", "ALTER",
    "INSERT", "UPDATE", "DELETE", "TRUNCATE",
];

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\n]*").expect("line comment pattern"));

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment pattern"));

static BANNED_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    BANNED_TOKENS
        .iter()
        .map(|token| {
            let pattern = format!(r"\b{}\b", regex::escape(token));
            (*token, Regex::new(&pattern).expect("banned token pattern"))
        })
        .collect()
});

static READ_ONLY_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(SELECT|WITH)\b").expect("statement start pattern"));

/// Clean and validate client SQL, returning the cleaned statement.
pub fn validate(sql: &str) -> Result<String> {
    let without_line = LINE_COMMENT.replace_all(sql, "");
    let without_comments = BLOCK_COMMENT.replace_all(&without_line, " ");

    let joined = without_comments
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let cleaned = joined.strip_suffix(';').unwrap_or(&joined).trim();

    let upper = cleaned.to_uppercase();
    if let Some((token, _)) = BANNED_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(&upper))
    {
        return Err(LitehouseError::InvalidQuery(format!(
            "SQL contains prohibited token: {}",
            token
        )));
    }

    if cleaned.is_empty() {
        return Err(LitehouseError::InvalidQuery(
            "No SQL query found".to_string(),
        ));
    }

    if !READ_ONLY_START.is_match(&upper) {
        return Err(LitehouseError::InvalidQuery(
            "Only SELECT and WITH queries are allowed".to_string(),
        ));
    }

    Ok(cleaned.to_string())
}

/// A validated query together with the requested page.
///
/// Built per request and consumed by the composer; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub sql: String,
    pub limit: usize,
    pub offset: usize,
}

impl QuerySpec {
    /// Validate `raw_sql` and pair it with the requested page
    pub fn new(raw_sql: &str, limit: usize, offset: usize) -> Result<Self> {
        Ok(Self {
            sql: validate(raw_sql)?,
            limit,
            offset,
        })
    }
}
