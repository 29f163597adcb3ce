// src/review/session.rs

use anyhow::{Context, Result};
use log::{info, warn};
use std::io::{self, BufRead, Write};

use crate::models::{EmployerField, ReviewSummary};
use crate::review::review_gate::{ReviewGate, ReviewItem, ReviewResponse, SubmitOutcome};

/// How a review session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The per-session limit was reached.
    Completed,
    /// Nothing left to review.
    Exhausted,
    /// The reviewer quit, or input ended.
    Quit,
}

/// The human side of a review session.
pub trait ReviewPrompter {
    /// Shows a cluster before the reviewer is asked about it.
    fn present(&mut self, item: &ReviewItem) -> Result<()>;

    /// Reads one raw answer. `None` means input has ended.
    fn read_answer(&mut self) -> Result<Option<String>>;

    /// Called for input that is not a valid answer; the question is asked again.
    fn reject_answer(&mut self, answer: &str) -> Result<()>;
}

/// Drives `gate` until `limit` items were answered, the queue is drained or
/// the reviewer quits. Decisions still queued are flushed in every case.
pub async fn run_review_session(
    mut gate: ReviewGate,
    prompter: &mut dyn ReviewPrompter,
    limit: Option<usize>,
) -> Result<(ReviewOutcome, ReviewSummary)> {
    let mut answered = 0usize;
    let outcome = loop {
        if limit.map_or(false, |max| answered >= max) {
            break ReviewOutcome::Completed;
        }
        let Some(item) = gate.next_pending().await? else {
            break ReviewOutcome::Exhausted;
        };
        prompter.present(&item)?;

        let response = loop {
            match prompter.read_answer()? {
                None => {
                    warn!("Review input closed; ending session");
                    break ReviewResponse::Quit;
                }
                Some(raw) => match ReviewResponse::parse(&raw) {
                    Some(response) => break response,
                    None => prompter.reject_answer(&raw)?,
                },
            }
        };

        match gate.submit(&item, response).await? {
            SubmitOutcome::Quit => break ReviewOutcome::Quit,
            SubmitOutcome::Checkpointed(n) => info!("Checkpoint: {} review decisions saved", n),
            SubmitOutcome::Recorded | SubmitOutcome::Skipped => {}
        }
        answered += 1;
    };

    let summary = gate.finish().await?;
    info!(
        "Review session ended ({:?}): {} presented, {} accepted, {} rejected, {} unsure, {} committed",
        outcome,
        summary.presented,
        summary.accepted,
        summary.rejected,
        summary.unsure,
        summary.committed
    );
    Ok((outcome, summary))
}

/// Renders the cluster as a text table, starring the row under review.
pub fn render_cluster_table(item: &ReviewItem) -> String {
    let mut header = vec!["*".to_string(), "ID".to_string()];
    header.extend(
        ["Name", "Trade Name", "City", "State", "Country", "Phone"]
            .iter()
            .map(|h| h.to_string()),
    );

    let mut rows: Vec<Vec<String>> = vec![header];
    for record in &item.members {
        let mut row = vec![
            if item.is_flagged(record) { "*" } else { "" }.to_string(),
            record.id.to_string(),
        ];
        row.extend(
            EmployerField::ALL
                .iter()
                .map(|f| record.fields.get(*f).unwrap_or("").to_string()),
        );
        rows.push(row);
    }

    let widths: Vec<usize> = (0..rows[0].len())
        .map(|col| rows.iter().map(|r| r[col].chars().count()).max().unwrap_or(0))
        .collect();

    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        out.push_str(cells.join(" | ").trim_end());
        out.push('\n');
        if i == 0 {
            let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            out.push_str(&rule.join("-+-"));
            out.push('\n');
        }
    }
    out
}

/// Terminal prompter used by the `review` subcommand.
pub struct StdinPrompter<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl StdinPrompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self {
            input: io::stdin().lock(),
            output: io::stdout(),
        }
    }
}

impl<R: BufRead, W: Write> StdinPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self) -> Result<()> {
        write!(
            self.output,
            "Does the starred row belong in this cluster? (y)es / (n)o / (u)nsure / (q)uit: "
        )?;
        self.output.flush().context("Failed to flush prompt")
    }
}

impl<R: BufRead, W: Write> ReviewPrompter for StdinPrompter<R, W> {
    fn present(&mut self, item: &ReviewItem) -> Result<()> {
        writeln!(
            self.output,
            "\nReviewed {} of {} (cluster {}, score {:.3})",
            item.position - 1,
            item.total_pending,
            item.row.canon_id,
            item.row.cluster_score
        )?;
        writeln!(self.output, "{}", render_cluster_table(item))?;
        self.ask()
    }

    fn read_answer(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("Failed to read review answer")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn reject_answer(&mut self, answer: &str) -> Result<()> {
        writeln!(
            self.output,
            "'{}' is not a valid answer. Please enter y, n, u or q.",
            answer
        )?;
        self.ask()
    }
}
