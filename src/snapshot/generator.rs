//! Snapshot generation from the source database.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{Connection, PgConnection};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::literal::{
    sql_opt_bool, sql_opt_int, sql_opt_string, sql_opt_timestamp, sql_string,
};
use super::statement::{Statement, StatementKind};
use crate::deadline::{bounded, is_interrupted};
use crate::error::SnapshotError;
use crate::persistence::postgres::{load_posts, load_users};
use crate::persistence::schema::{CREATE_POSTS_TABLE, CREATE_USERS_TABLE};
use crate::persistence::{Database, Entity, PostRow, UserRow};

/// Product banner written on the second header line.
pub const SNAPSHOT_BANNER: &str = "Phosphor Vibe Post Application";

const USER_COLUMNS: &str = "id, email, password, email_verified, verification_token, \
                            verification_token_expires, reset_token, reset_token_expires, created_at";

const POST_COLUMNS: &str = "id, user_id, platform, topic, content, ascii_art, created_at";

/// Columns overwritten when a snapshot user collides with an existing email.
const USER_UPSERT_COLUMNS: [&str; 6] = [
    "password",
    "email_verified",
    "verification_token",
    "verification_token_expires",
    "reset_token",
    "reset_token_expires",
];

/// Row and size statistics for a generated snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct SnapshotStats {
    /// Number of user rows captured.
    pub users: usize,
    /// Number of post rows captured.
    pub posts: usize,
    /// UTF-8 byte length of the rendered snapshot.
    pub bytes: usize,
}

/// A rendered snapshot: typed statements plus the text form.
#[derive(Debug, Clone)]
pub struct Snapshot {
    generated_at: DateTime<Utc>,
    statements: Vec<Statement>,
    sql: String,
    stats: SnapshotStats,
}

impl Snapshot {
    /// Builds a snapshot from already-loaded rows.
    ///
    /// Rows are emitted in the order given; [`SnapshotGenerator`] passes
    /// them sorted by id so output is deterministic.
    #[must_use]
    pub fn from_rows(users: &[UserRow], posts: &[PostRow], generated_at: DateTime<Utc>) -> Self {
        let mut statements = Vec::with_capacity(6);
        let mut sql = String::new();

        let _ = writeln!(
            sql,
            "-- Database Backup Generated: {}",
            generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let _ = writeln!(sql, "-- {SNAPSHOT_BANNER}\n");

        sql.push_str("-- Create tables if they don't exist\n");
        push_statement(
            &mut sql,
            &mut statements,
            Statement::new(StatementKind::SchemaGuard, Some(Entity::Users), CREATE_USERS_TABLE),
        );
        sql.push('\n');
        push_statement(
            &mut sql,
            &mut statements,
            Statement::new(StatementKind::SchemaGuard, Some(Entity::Posts), CREATE_POSTS_TABLE),
        );
        sql.push('\n');

        if !users.is_empty() {
            sql.push_str("-- Insert users data\n");
            push_statement(&mut sql, &mut statements, users_insert(users));
            sql.push('\n');
        }

        if !posts.is_empty() {
            sql.push_str("-- Insert posts data\n");
            push_statement(&mut sql, &mut statements, posts_insert(posts));
            sql.push('\n');
        }

        sql.push_str("-- Reset sequences\n");
        for entity in Entity::ALL {
            push_statement(&mut sql, &mut statements, sequence_reset(entity));
        }
        sql.push('\n');
        sql.push_str("-- Backup completed successfully\n");

        let stats = SnapshotStats {
            users: users.len(),
            posts: posts.len(),
            bytes: sql.len(),
        };

        Self {
            generated_at,
            statements,
            sql,
            stats,
        }
    }

    /// When the snapshot was generated.
    #[must_use]
    pub const fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Typed statements in execution order.
    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Rendered snapshot text.
    #[must_use]
    pub fn to_sql(&self) -> &str {
        &self.sql
    }

    /// Consumes the snapshot, returning its text.
    #[must_use]
    pub fn into_sql(self) -> String {
        self.sql
    }

    /// Row and size statistics.
    #[must_use]
    pub const fn stats(&self) -> SnapshotStats {
        self.stats
    }

    /// Download file name, e.g.
    /// `phosphor-vibe-backup-2024-01-01T00-00-00-000Z.sql`.
    #[must_use]
    pub fn file_name(&self) -> String {
        let stamp = self
            .generated_at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("phosphor-vibe-backup-{stamp}.sql")
    }
}

fn push_statement(sql: &mut String, statements: &mut Vec<Statement>, statement: Statement) {
    sql.push_str(statement.sql());
    sql.push_str(";\n");
    statements.push(statement);
}

fn users_insert(users: &[UserRow]) -> Statement {
    let tuples = users
        .iter()
        .map(|u| {
            format!(
                "({}, {}, {}, {}, {}, {}, {}, {}, {})",
                u.id,
                sql_string(&u.email),
                sql_string(&u.password),
                sql_opt_bool(u.email_verified),
                sql_opt_string(u.verification_token.as_deref()),
                sql_opt_timestamp(u.verification_token_expires.as_ref()),
                sql_opt_string(u.reset_token.as_deref()),
                sql_opt_timestamp(u.reset_token_expires.as_ref()),
                sql_opt_timestamp(u.created_at.as_ref()),
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    let updates = USER_UPSERT_COLUMNS
        .iter()
        .map(|c| format!("  {c} = EXCLUDED.{c}"))
        .collect::<Vec<_>>()
        .join(",\n");

    Statement::new(
        StatementKind::Insert,
        Some(Entity::Users),
        format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES\n{tuples}\nON CONFLICT (email) DO UPDATE SET\n{updates}"
        ),
    )
}

fn posts_insert(posts: &[PostRow]) -> Statement {
    let tuples = posts
        .iter()
        .map(|p| {
            format!(
                "({}, {}, {}, {}, {}, {}, {})",
                p.id,
                sql_opt_int(p.user_id),
                sql_string(&p.platform),
                sql_string(&p.topic),
                sql_string(&p.content),
                sql_opt_string(p.ascii_art.as_deref()),
                sql_opt_timestamp(p.created_at.as_ref()),
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    Statement::new(
        StatementKind::Insert,
        Some(Entity::Posts),
        format!("INSERT INTO posts ({POST_COLUMNS}) VALUES\n{tuples}\nON CONFLICT (id) DO NOTHING"),
    )
}

fn sequence_reset(entity: Entity) -> Statement {
    Statement::new(
        StatementKind::SequenceReset,
        Some(entity),
        format!(
            "SELECT setval('{}', (SELECT COALESCE(MAX(id), 1) FROM {}))",
            entity.id_sequence(),
            entity.table()
        ),
    )
}

/// Reads the tracked tables and renders a [`Snapshot`].
#[derive(Debug, Clone, Copy)]
pub struct SnapshotGenerator {
    query_timeout: Duration,
}

impl SnapshotGenerator {
    /// Creates a generator whose reads are bounded by `query_timeout`.
    #[must_use]
    pub const fn new(query_timeout: Duration) -> Self {
        Self { query_timeout }
    }

    /// Loads all users and posts in one read-only repeatable-read
    /// transaction and renders them.
    ///
    /// The fetch is all-or-nothing; no partial snapshot is ever returned.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Connectivity`] on any read failure,
    /// [`SnapshotError::Timeout`] if acquiring a connection or reading takes
    /// longer than the query timeout, or [`SnapshotError::Cancelled`].
    pub async fn generate(
        &self,
        db: &Database,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, SnapshotError> {
        let mut conn = bounded("connection acquire", self.query_timeout, cancel, db.acquire()).await?;

        let fetched = bounded(
            "snapshot read",
            self.query_timeout,
            cancel,
            read_consistent(&mut conn),
        )
        .await;

        let (users, posts) = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                if is_interrupted(&e) {
                    conn.close_on_drop();
                }
                tracing::error!(error = %e, "snapshot generation failed");
                return Err(e);
            }
        };
        drop(conn);

        let snapshot = Snapshot::from_rows(&users, &posts, Utc::now());
        let stats = snapshot.stats();
        tracing::info!(
            users = stats.users,
            posts = stats.posts,
            bytes = stats.bytes,
            "snapshot generated"
        );
        Ok(snapshot)
    }
}

async fn read_consistent(
    conn: &mut PgConnection,
) -> Result<(Vec<UserRow>, Vec<PostRow>), SnapshotError> {
    let mut tx = conn.begin().await.map_err(SnapshotError::connectivity)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await
        .map_err(SnapshotError::connectivity)?;

    let users = load_users(&mut tx).await?;
    let posts = load_posts(&mut tx).await?;

    tx.commit().await.map_err(SnapshotError::connectivity)?;
    Ok((users, posts))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::snapshot::splitter::{split_naive, split_statements};
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};

    fn ts(h: u32) -> NaiveDateTime {
        let Some(t) = NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(h, 0, 0))
        else {
            panic!("valid timestamp");
        };
        t
    }

    fn user(id: i32, email: &str) -> UserRow {
        UserRow {
            id,
            email: email.to_string(),
            password: "$2b$10$hash".to_string(),
            email_verified: Some(true),
            verification_token: None,
            verification_token_expires: None,
            reset_token: None,
            reset_token_expires: None,
            created_at: Some(ts(8)),
        }
    }

    fn post(id: i32, user_id: i32, content: &str) -> PostRow {
        PostRow {
            id,
            user_id: Some(user_id),
            platform: "twitter".to_string(),
            topic: "rust".to_string(),
            content: content.to_string(),
            ascii_art: None,
            created_at: Some(ts(9)),
        }
    }

    fn generated_at() -> DateTime<Utc> {
        let chrono::LocalResult::Single(t) = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0) else {
            panic!("valid timestamp");
        };
        t
    }

    fn example() -> Snapshot {
        let users = [user(1, "a@x.com"), user(2, "b@x.com")];
        let posts = [
            post(1, 1, "hello"),
            post(2, 1, "world"),
            post(3, 2, "it's here"),
        ];
        Snapshot::from_rows(&users, &posts, generated_at())
    }

    #[test]
    fn example_scenario_has_one_batched_insert_per_entity() {
        let snapshot = example();
        let sql = snapshot.to_sql();

        assert_eq!(sql.matches("INSERT INTO users").count(), 1);
        assert_eq!(sql.matches("INSERT INTO posts").count(), 1);
        assert!(sql.contains("ON CONFLICT (email) DO UPDATE SET"));
        assert!(sql.contains("ON CONFLICT (id) DO NOTHING"));

        let Some(posts) = snapshot
            .statements()
            .iter()
            .find(|s| s.restores() == Some(Entity::Posts))
        else {
            panic!("posts insert missing");
        };
        assert_eq!(posts.sql().matches("\n(").count(), 3);
    }

    #[test]
    fn statements_are_ordered_guard_insert_reset() {
        let kinds: Vec<StatementKind> = example().statements().iter().map(Statement::kind).collect();
        assert_eq!(
            kinds,
            vec![
                StatementKind::SchemaGuard,
                StatementKind::SchemaGuard,
                StatementKind::Insert,
                StatementKind::Insert,
                StatementKind::SequenceReset,
                StatementKind::SequenceReset,
            ]
        );
    }

    #[test]
    fn header_and_trailer() {
        let snapshot = example();
        let sql = snapshot.to_sql();
        assert!(sql.starts_with("-- Database Backup Generated: 2024-06-01T12:30:00.000Z\n"));
        assert!(sql.contains("-- Phosphor Vibe Post Application\n"));
        assert!(sql.contains(
            "SELECT setval('users_id_seq', (SELECT COALESCE(MAX(id), 1) FROM users));\n"
        ));
        assert!(sql.contains(
            "SELECT setval('posts_id_seq', (SELECT COALESCE(MAX(id), 1) FROM posts));\n"
        ));
        assert!(sql.ends_with("-- Backup completed successfully\n"));
    }

    #[test]
    fn upsert_overwrites_every_mutable_column() {
        let snapshot = example();
        for column in USER_UPSERT_COLUMNS {
            assert!(snapshot
                .to_sql()
                .contains(&format!("  {column} = EXCLUDED.{column}")));
        }
        assert!(!snapshot.to_sql().contains("email = EXCLUDED.email"));
    }

    #[test]
    fn values_are_escaped_and_nulls_explicit() {
        let sql = example().into_sql();
        assert!(sql.contains("'it''s here'"));
        assert!(sql.contains(
            "(1, 'a@x.com', '$2b$10$hash', true, NULL, NULL, NULL, NULL, '2024-05-01T08:00:00.000000')"
        ));
        assert!(sql.contains("(3, 2, 'twitter', 'rust', 'it''s here', NULL, '2024-05-01T09:00:00.000000')"));
    }

    #[test]
    fn empty_tables_emit_no_inserts() {
        let snapshot = Snapshot::from_rows(&[], &[], generated_at());
        assert_eq!(snapshot.statements().len(), 4);
        assert!(!snapshot.to_sql().contains("INSERT INTO"));
        assert_eq!(snapshot.stats().users, 0);
        assert_eq!(snapshot.stats().posts, 0);
    }

    #[test]
    fn stats_report_bytes_of_rendered_text() {
        let snapshot = example();
        let stats = snapshot.stats();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.posts, 3);
        assert_eq!(stats.bytes, snapshot.to_sql().len());
    }

    #[test]
    fn rendered_text_splits_back_into_typed_statements() {
        let snapshot = example();
        let split = split_statements(snapshot.to_sql());
        assert_eq!(split.len(), snapshot.statements().len());
        for (text, typed) in split.iter().zip(snapshot.statements()) {
            assert_eq!(text, typed.sql());
            assert_eq!(Statement::classify(text.as_str()).restores(), typed.restores());
        }
        assert_eq!(split_naive(snapshot.to_sql()).len(), split.len());
    }

    #[test]
    fn generation_is_deterministic() {
        assert_eq!(example().to_sql(), example().to_sql());
    }

    #[test]
    fn file_name_has_no_colons() {
        assert_eq!(
            example().file_name(),
            "phosphor-vibe-backup-2024-06-01T12-30-00-000Z.sql"
        );
    }

    #[test]
    fn orphaned_post_keeps_null_owner() {
        let mut orphan = post(9, 1, "x");
        orphan.user_id = None;
        orphan.ascii_art = Some(String::new());
        let sql = Snapshot::from_rows(&[], &[orphan], generated_at()).into_sql();
        assert!(sql.contains("(9, NULL, 'twitter', 'rust', 'x', '', '2024-05-01T09:00:00.000000')"));
    }
}
