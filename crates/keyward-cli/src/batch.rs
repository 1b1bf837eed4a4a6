//! Batch-file runner.
//!
//! A batch file holds one command per line, written exactly as on the command
//! line without the program name:
//!
//! ```text
//! # set up
//! generate billing
//! authorize invoicer billing
//! encrypt billing card ending 4242
//! ```
//!
//! Blank lines and `#` comments are skipped. A failing line is reported and
//! the runner moves on to the next one.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use keyward_vault::KeyManager;

use crate::commands::KeyCommand;

#[derive(Debug, Parser)]
#[command(name = "batch", no_binary_name = true, disable_help_subcommand = true)]
struct BatchLine {
    #[command(subcommand)]
    command: KeyCommand,
}

/// Counts reported after a batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Parse one batch line. Returns `None` for blank lines and comments.
pub fn parse_line(line: &str) -> Option<Result<KeyCommand>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let parsed = BatchLine::try_parse_from(trimmed.split_whitespace())
        .map(|line| line.command)
        .map_err(|e| anyhow::anyhow!("{}", e.render().to_string().trim_end()));
    Some(parsed)
}

/// Execute every command read from `input`, echoing progress to `out`.
pub fn run<R: BufRead, W: Write>(manager: &KeyManager, input: R, out: &mut W) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read batch line {}", index + 1))?;
        let Some(parsed) = parse_line(&line) else {
            continue;
        };

        writeln!(out, "\n> {}", line.trim())?;

        match parsed.and_then(|command| command.execute(manager)) {
            Ok(message) => {
                summary.succeeded += 1;
                writeln!(out, "✓ {message}")?;
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(line = index + 1, error = %e, "batch command failed");
                writeln!(out, "✗ Error: {e:#}")?;
            }
        }
    }

    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "batch finished"
    );
    Ok(summary)
}
