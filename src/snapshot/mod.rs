//! Logical snapshots: generation, statement splitting and replay.
//!
//! A [`Snapshot`] is a self-contained SQL program made of schema guards,
//! idempotent batched inserts and sequence resets. The
//! [`SnapshotGenerator`] builds one from the source database, the
//! [`splitter`] turns snapshot text back into statements, and the
//! [`ReplayEngine`] applies them to a target with per-statement fault
//! isolation.
//!
//! ```text
//! Database ──load──▶ SnapshotGenerator ──▶ Snapshot ──to_sql──▶ file / HTTP
//!                                                              │
//! Database ◀──execute── ReplayEngine ◀── Statement[] ◀── splitter
//! ```

pub mod generator;
pub mod literal;
pub mod replay;
pub mod splitter;
pub mod statement;

pub use generator::{Snapshot, SnapshotGenerator, SnapshotStats};
pub use replay::{ReplayEngine, ReplayMode, ReplayOptions, ReplayReport, StatementFailure};
pub use splitter::SplitMode;
pub use statement::{Statement, StatementKind};
