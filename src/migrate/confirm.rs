//! The human checkpoint between backup and restore.

use std::io::{BufRead, Write};

use crate::error::SnapshotError;

/// A synchronous yes/no question.
pub trait Confirm {
    /// Asks `prompt` and blocks for the answer.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Prompt`] if the answer cannot be read.
    fn confirm(&mut self, prompt: &str) -> Result<bool, SnapshotError>;
}

/// Interactive terminal prompt. Defaults to "no".
#[derive(Debug, Clone, Copy, Default)]
pub struct DialoguerConfirm;

impl Confirm for DialoguerConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool, SnapshotError> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| SnapshotError::Prompt(e.to_string()))
    }
}

/// Always answers yes. Backs `migrate --yes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, prompt: &str) -> Result<bool, SnapshotError> {
        tracing::info!(prompt, "confirmation skipped");
        Ok(true)
    }
}

/// Line-oriented prompt over any reader/writer pair.
///
/// Writes `<prompt> (y/n): `, reads one line and accepts `y` or `yes` in
/// any case. End of input counts as "no".
#[derive(Debug)]
pub struct LineConfirm<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LineConfirm<R, W> {
    /// Creates a prompt reading from `reader` and writing to `writer`.
    pub const fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: BufRead, W: Write> Confirm for LineConfirm<R, W> {
    fn confirm(&mut self, prompt: &str) -> Result<bool, SnapshotError> {
        write!(self.writer, "{prompt} (y/n): ")?;
        self.writer.flush()?;

        let mut answer = String::new();
        self.reader.read_line(&mut answer)?;
        Ok(is_affirmative(&answer))
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
