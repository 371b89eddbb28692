//! Splits snapshot text into individually executable statements.
//!
//! Two strategies are available:
//!
//! - [`split_statements`] is quote-aware: `;` and `--` inside quoted
//!   literals or identifiers are ordinary characters, and `--` anywhere
//!   else starts a comment that runs to the end of the line.
//! - [`split_naive`] drops comment lines and splits on every `;`. It
//!   mis-splits any literal containing a `;`, and it corrupts literals
//!   that contain a line starting with `--`. It is kept for compatibility
//!   with snapshots produced and restored by older tooling.
//!
//! Dollar-quoted bodies (`$$ ... $$`) and `/* */` comments are not
//! recognised, so `pg_dump` output belongs to the dump bridge.

use std::str::FromStr;

use serde::Serialize;

use crate::error::SnapshotError;

/// Statement splitting strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Tokenize, tracking quoted literals and identifiers.
    #[default]
    QuoteAware,
    /// Blind split on `;` after dropping comment lines.
    Naive,
}

impl FromStr for SplitMode {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quote_aware" | "quote-aware" => Ok(Self::QuoteAware),
            "naive" => Ok(Self::Naive),
            other => Err(SnapshotError::Configuration(format!(
                "invalid SNAPSHOT_SPLIT_MODE: {other} (expected quote_aware or naive)"
            ))),
        }
    }
}

/// Splits `text` with the given strategy.
#[must_use]
pub fn split(text: &str, mode: SplitMode) -> Vec<String> {
    match mode {
        SplitMode::QuoteAware => split_statements(text),
        SplitMode::Naive => split_naive(text),
    }
}

/// Drops blank and `--` lines, rejoins the rest and splits on every `;`.
#[must_use]
pub fn split_naive(text: &str) -> Vec<String> {
    let mut joined = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        if !joined.is_empty() {
            joined.push('\n');
        }
        joined.push_str(line);
    }

    joined
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits on `;` outside single-quoted literals and double-quoted
/// identifiers. A `--` outside them comments out the rest of its line,
/// quotes and terminators included.
#[must_use]
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_literal = false;
    let mut in_identifier = false;
    let mut in_comment = false;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
                current.push(ch);
            }
            continue;
        }

        let quoted = in_literal || in_identifier;
        match ch {
            '\'' if !in_identifier => {
                in_literal = !in_literal;
                current.push(ch);
            }
            '"' if !in_literal => {
                in_identifier = !in_identifier;
                current.push(ch);
            }
            '-' if !quoted && chars.peek() == Some(&'-') => in_comment = true,
            ';' if !quoted => {
                push_trimmed(&mut statements, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    push_trimmed(&mut statements, &current);

    statements
}

fn push_trimmed(statements: &mut Vec<String>, fragment: &str) {
    let trimmed = fragment.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}
