//! Persistence layer: PostgreSQL connection provider, tracked-entity rows
//! and schema bootstrap.
//!
//! [`postgres::Database`] owns the `sqlx::PgPool` for one connection
//! string and is handed explicitly to every component that touches the
//! store. The row types in [`models`] mirror the two tracked tables.

pub mod models;
pub mod postgres;
pub mod schema;

pub use models::{Entity, PostRow, UserRow};
pub use postgres::{Database, DatabaseSettings, TableCounts};
