// src/review/review_gate.rs

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::{ClusterMembership, EmployerRecord, ReviewCursor, ReviewDecision, ReviewSummary};
use crate::store::ResolutionStore;
use crate::utils::pipeline_config::PipelineConfig;

/// A low-confidence membership row together with its whole cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewItem {
    pub row: ClusterMembership,
    /// Every member of the row's cluster, ordered by id.
    pub members: Vec<EmployerRecord>,
    /// 1-based position within this session.
    pub position: usize,
    /// Rows needing review when the session started.
    pub total_pending: u64,
}

impl ReviewItem {
    pub fn is_flagged(&self, record: &EmployerRecord) -> bool {
        record.id == self.row.record_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewResponse {
    Yes,
    No,
    Unsure,
    Quit,
}

impl ReviewResponse {
    /// Case-insensitive; anything unrecognised is `None`.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" => Some(ReviewResponse::Yes),
            "n" | "no" => Some(ReviewResponse::No),
            "u" | "unsure" => Some(ReviewResponse::Unsure),
            "q" | "quit" => Some(ReviewResponse::Quit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued for the next checkpoint.
    Recorded,
    /// Queued and the checkpoint committed this many decisions.
    Checkpointed(usize),
    /// Left pending.
    Skipped,
    /// Queued decisions were flushed and the session is over.
    Quit,
}

/// Pull-based review workflow over the rows needing a human verdict.
///
/// Rows come in `(cluster_score, record_id)` order through a keyset cursor,
/// so a session never presents a row twice. Decisions are buffered and
/// committed every `checkpoint_every` decisions; dropping the gate loses only
/// the decisions after the last checkpoint.
pub struct ReviewGate {
    store: Arc<dyn ResolutionStore>,
    review_threshold: f64,
    page_size: usize,
    checkpoint_every: usize,
    cursor: Option<ReviewCursor>,
    page: VecDeque<ClusterMembership>,
    exhausted: bool,
    queued: Vec<ReviewDecision>,
    presented: usize,
    total_pending: u64,
    summary: ReviewSummary,
}

impl ReviewGate {
    pub async fn open(store: Arc<dyn ResolutionStore>, config: &PipelineConfig) -> Result<Self> {
        let total_pending = store
            .count_pending_reviews(config.review_threshold)
            .await
            .context("Failed to count pending reviews")?;
        info!("{} cluster memberships need review", total_pending);
        Ok(Self {
            store,
            review_threshold: config.review_threshold,
            page_size: config.review_page_size.max(1),
            checkpoint_every: config.review_checkpoint_every.max(1),
            cursor: None,
            page: VecDeque::new(),
            exhausted: false,
            queued: Vec::new(),
            presented: 0,
            total_pending,
            summary: ReviewSummary::default(),
        })
    }

    pub fn summary(&self) -> &ReviewSummary {
        &self.summary
    }

    /// The next row needing review, or None when the queue is drained.
    pub async fn next_pending(&mut self) -> Result<Option<ReviewItem>> {
        if self.page.is_empty() && !self.exhausted {
            let rows = self
                .store
                .fetch_pending_reviews(self.review_threshold, self.cursor, self.page_size)
                .await
                .context("Failed to fetch pending reviews")?;
            if rows.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = rows.last() {
                self.cursor = Some(last.review_cursor());
            }
            debug!("Fetched {} pending review rows", rows.len());
            self.page.extend(rows);
        }

        let Some(row) = self.page.pop_front() else {
            return Ok(None);
        };
        let members = self
            .store
            .fetch_cluster_members(row.canon_id)
            .await
            .with_context(|| format!("Failed to load members of cluster {}", row.canon_id))?;
        self.presented += 1;
        self.summary.presented += 1;
        Ok(Some(ReviewItem {
            row,
            members,
            position: self.presented,
            total_pending: self.total_pending,
        }))
    }

    pub async fn submit(&mut self, item: &ReviewItem, response: ReviewResponse) -> Result<SubmitOutcome> {
        let is_valid_cluster = match response {
            ReviewResponse::Yes => {
                self.summary.accepted += 1;
                true
            }
            ReviewResponse::No => {
                self.summary.rejected += 1;
                false
            }
            ReviewResponse::Unsure => {
                self.summary.unsure += 1;
                return Ok(SubmitOutcome::Skipped);
            }
            ReviewResponse::Quit => {
                self.checkpoint().await?;
                self.summary.quit = true;
                return Ok(SubmitOutcome::Quit);
            }
        };

        self.queued.push(ReviewDecision {
            record_id: item.row.record_id,
            is_valid_cluster,
            review_date: Utc::now().naive_utc(),
        });
        if self.queued.len() >= self.checkpoint_every {
            let committed = self.checkpoint().await?;
            return Ok(SubmitOutcome::Checkpointed(committed));
        }
        Ok(SubmitOutcome::Recorded)
    }

    /// Commits every queued decision in one transaction. On failure the
    /// decisions stay queued.
    pub async fn checkpoint(&mut self) -> Result<usize> {
        if self.queued.is_empty() {
            return Ok(0);
        }
        self.store
            .apply_review_decisions(&self.queued)
            .await
            .context("Failed to commit review decisions")?;
        let committed = self.queued.len();
        self.queued.clear();
        self.summary.committed += committed;
        self.summary.checkpoints += 1;
        debug!("Review checkpoint: {} decisions committed", committed);
        Ok(committed)
    }

    /// Flushes outstanding decisions and ends the session.
    pub async fn finish(mut self) -> Result<ReviewSummary> {
        self.checkpoint().await?;
        Ok(self.summary)
    }
}
