//! Typed snapshot statements.
//!
//! The generator tags every statement it emits with its [`StatementKind`]
//! and [`Entity`], so replay attributes affected rows without inspecting
//! SQL text. Statements recovered from uploaded text carry no tags and are
//! classified by [`Statement::classify`].

use serde::Serialize;

use crate::persistence::Entity;

/// What a statement does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// `CREATE TABLE IF NOT EXISTS` and similar guards.
    SchemaGuard,
    /// Batched data insert.
    Insert,
    /// `setval` on an identity sequence.
    SequenceReset,
    /// Anything else.
    Other,
}

/// One independently executable SQL statement, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    kind: StatementKind,
    entity: Option<Entity>,
    sql: String,
}

impl Statement {
    /// Creates a tagged statement.
    #[must_use]
    pub fn new(kind: StatementKind, entity: Option<Entity>, sql: impl Into<String>) -> Self {
        Self {
            kind,
            entity,
            sql: sql.into(),
        }
    }

    /// Infers the tags of an untyped statement.
    ///
    /// Inserts are attributed with a case-insensitive containment check for
    /// `insert into users` / `insert into posts`, checked in that order.
    /// This is adequate for snapshot text, which never mentions both
    /// tables in one statement.
    #[must_use]
    pub fn classify(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let lower = sql.to_lowercase();

        let (kind, entity) = if lower.contains("insert into users") {
            (StatementKind::Insert, Some(Entity::Users))
        } else if lower.contains("insert into posts") {
            (StatementKind::Insert, Some(Entity::Posts))
        } else if lower.starts_with("create table") || lower.starts_with("create index") {
            (StatementKind::SchemaGuard, None)
        } else if lower.contains("setval(") {
            (StatementKind::SequenceReset, None)
        } else {
            (StatementKind::Other, None)
        };

        Self { kind, entity, sql }
    }

    /// Statement kind.
    #[must_use]
    pub const fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Entity the statement belongs to, if any.
    #[must_use]
    pub const fn entity(&self) -> Option<Entity> {
        self.entity
    }

    /// The entity whose restored-row tally this statement's affected rows
    /// count towards. Only inserts restore rows.
    #[must_use]
    pub const fn restores(&self) -> Option<Entity> {
        match self.kind {
            StatementKind::Insert => self.entity,
            _ => None,
        }
    }

    /// SQL text without the trailing `;`.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// First `max_chars` characters of the statement for log output.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.sql.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}
