//! Batch lead analysis over stored conversations.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::error::Error;
use crate::lead::LeadExtractor;
use crate::store::{LeadStore, turns_to_transcript};

/// Counts from one analysis run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    /// Conversations looked at.
    pub processed: usize,
    /// Leads extracted and written.
    pub extracted: usize,
    /// Conversations whose extraction or write failed.
    pub failed: usize,
    /// Conversations skipped because a lead already exists.
    pub skipped: usize,
}

/// Conversations analyzed at once unless `LEAD_ASSIST_ANALYSIS_CONCURRENCY` says otherwise.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Re-runs lead extraction on stored transcripts.
pub struct LeadAnalyzer {
    store: Arc<dyn LeadStore>,
    extractor: Arc<LeadExtractor>,
    concurrency: usize,
}

enum Outcome {
    Skipped,
    Extracted,
    Failed,
}

impl LeadAnalyzer {
    pub fn new(store: Arc<dyn LeadStore>, extractor: Arc<LeadExtractor>) -> Self {
        Self {
            store,
            extractor,
            concurrency: 1,
        }
    }

    /// Number of conversations analyzed at the same time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Extract a lead for every stored conversation. With `only_missing`,
    /// conversations that already have one are skipped.
    ///
    /// Failures of single conversations are logged and counted; only a
    /// failure to list conversations aborts the run.
    pub async fn run(&self, only_missing: bool) -> Result<AnalysisReport, Error> {
        let conversations = self.store.list_conversations().await?;
        info!(
            count = conversations.len(),
            only_missing,
            concurrency = self.concurrency,
            "Starting lead analysis"
        );

        let outcomes: Vec<Outcome> = stream::iter(conversations)
            .map(|conversation_id| async move { self.process(&conversation_id, only_missing).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = AnalysisReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Skipped => report.skipped += 1,
                Outcome::Extracted => {
                    report.processed += 1;
                    report.extracted += 1;
                }
                Outcome::Failed => {
                    report.processed += 1;
                    report.failed += 1;
                }
            }
        }

        info!(
            processed = report.processed,
            extracted = report.extracted,
            failed = report.failed,
            skipped = report.skipped,
            "Lead analysis finished"
        );
        Ok(report)
    }

    async fn process(&self, conversation_id: &str, only_missing: bool) -> Outcome {
        if only_missing {
            match self.store.lead_record(conversation_id).await {
                Ok(Some(_)) => return Outcome::Skipped,
                Ok(None) => {}
                Err(e) => warn!(conversation_id, error = %e, "Could not check for existing lead"),
            }
        }
        if self.analyze_one(conversation_id).await {
            Outcome::Extracted
        } else {
            Outcome::Failed
        }
    }

    async fn analyze_one(&self, conversation_id: &str) -> bool {
        let turns = match self.store.conversation_turns(conversation_id).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(conversation_id, error = %e, "Failed to load conversation");
                return false;
            }
        };
        let user_id = turns.iter().find_map(|t| t.user_id.as_deref());
        let transcript = turns_to_transcript(&turns);

        let record = match self.extractor.extract(conversation_id, user_id, &transcript).await {
            Ok(record) => record,
            Err(e) => {
                warn!(conversation_id, error = %e, "Lead extraction failed");
                return false;
            }
        };
        if let Err(e) = self.store.write_lead_record(&record).await {
            warn!(conversation_id, error = %e, "Failed to write lead");
            return false;
        }
        true
    }
}
