//! Database models for the tracked entities.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A tracked table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    /// The `users` table.
    Users,
    /// The `posts` table.
    Posts,
}

impl Entity {
    /// Both tracked entities, in dependency order (users before posts).
    pub const ALL: [Self; 2] = [Self::Users, Self::Posts];

    /// Table name.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Posts => "posts",
        }
    }

    /// Name of the identity sequence backing the `SERIAL` primary key.
    #[must_use]
    pub const fn id_sequence(self) -> &'static str {
        match self {
            Self::Users => "users_id_seq",
            Self::Posts => "posts_id_seq",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A row from the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    /// `SERIAL` primary key.
    pub id: i32,
    /// Unique, case-sensitive login email.
    pub email: String,
    /// Opaque password hash.
    pub password: String,
    /// Email verification state; nullable in older databases.
    pub email_verified: Option<bool>,
    /// Pending email verification token.
    pub verification_token: Option<String>,
    /// Expiry of the verification token.
    pub verification_token_expires: Option<NaiveDateTime>,
    /// Pending password reset token.
    pub reset_token: Option<String>,
    /// Expiry of the reset token.
    pub reset_token_expires: Option<NaiveDateTime>,
    /// Row creation time.
    pub created_at: Option<NaiveDateTime>,
}

/// A row from the `posts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostRow {
    /// `SERIAL` primary key.
    pub id: i32,
    /// Owning user; rows cascade away when the user is deleted.
    pub user_id: Option<i32>,
    /// Target platform tag (e.g. `"twitter"`).
    pub platform: String,
    /// Topic the post was generated for.
    pub topic: String,
    /// Generated post body.
    pub content: String,
    /// Optional rendered ASCII art.
    pub ascii_art: Option<String>,
    /// Row creation time.
    pub created_at: Option<NaiveDateTime>,
}
