//! # phosphor-snapshot
//!
//! Database snapshot, replay and cross-instance migration for the
//! Phosphor Vibe Post application.
//!
//! The crate works at two levels:
//!
//! - **Logical**: [`snapshot`] renders the `users` and `posts` tables as a
//!   replayable SQL program and replays such programs with per-statement
//!   fault isolation. The admin HTTP endpoints and the `export` / `import`
//!   commands use this path.
//! - **Physical**: [`bridge`] drives `pg_dump` / `psql`, and [`migrate`]
//!   chains dump, a human checkpoint, restore and verification into a
//!   guided migration between two database instances.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, CLI)
//!     │
//!     ├── Admin handlers (api/)        ├── Orchestrator (migrate/)
//!     │                                │
//!     ├── SnapshotGenerator            ├── DumpBridge (bridge)
//!     ├── ReplayEngine (snapshot/)     │     └── pg_dump / psql
//!     │                                │
//!     └── Database (persistence/) ◀────┘
//!             └── PostgreSQL
//! ```
//!
//! Every blocking step is bounded by a timeout and a
//! [`tokio_util::sync::CancellationToken`] (see [`deadline`]).

pub mod api;
pub mod app_state;
pub mod bridge;
pub mod config;
pub mod deadline;
pub mod error;
pub mod migrate;
pub mod persistence;
pub mod snapshot;
