//! Guided migration between two database instances.
//!
//! [`Orchestrator`] dumps the current `DATABASE_URL`, waits for the
//! operator to repoint it, restores the dump into the new target and
//! verifies the result. The prompt, the connection target and the steps
//! themselves are injected through [`Confirm`], [`TargetSource`] and
//! [`MigrationSteps`].

pub mod confirm;
pub mod orchestrator;
pub mod steps;

pub use confirm::{AssumeYes, Confirm, DialoguerConfirm, LineConfirm};
pub use orchestrator::{MigrationOutcome, MigrationPhase, MigrationReport, Orchestrator};
pub use steps::{CutoverSteps, EnvTarget, MigrationSteps, TargetSource};
