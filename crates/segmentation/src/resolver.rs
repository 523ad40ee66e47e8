//! Segmentation resolver: turns a campaign's rule into the ordered,
//! deduplicated set of lead ids it targets.
//!
//! The corpus is walked page by page through a cursor, so memory stays
//! bounded by one page and a scan can be restarted from the beginning. The
//! cancellation token is checked between pages; pausing or archiving a
//! campaign cancels its scan.

use std::collections::BTreeSet;

use campaign_core::config::SegmentationConfig;
use campaign_core::rules::SegmentationRule;
use campaign_core::types::Lead;
use campaign_core::{CampaignError, CampaignResult, LeadStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::predicates::matches;
use crate::validate::validate_rule;

/// A finite, ordered, restartable source of leads.
pub trait LeadCorpus: Send + Sync {
    /// Up to `limit` leads with ids strictly greater than `after`, in id order.
    fn page(&self, after: Option<Uuid>, limit: usize) -> Vec<Lead>;
}

impl LeadCorpus for LeadStore {
    fn page(&self, after: Option<Uuid>, limit: usize) -> Vec<Lead> {
        LeadStore::page(self, after, limit)
    }
}

/// Lazy page iterator over a corpus.
pub struct CorpusCursor<'a> {
    corpus: &'a dyn LeadCorpus,
    after: Option<Uuid>,
    page_size: usize,
    exhausted: bool,
}

impl<'a> CorpusCursor<'a> {
    pub fn new(corpus: &'a dyn LeadCorpus, page_size: usize) -> Self {
        Self {
            corpus,
            after: None,
            page_size: page_size.max(1),
            exhausted: false,
        }
    }

    pub fn restart(&mut self) {
        self.after = None;
        self.exhausted = false;
    }
}

impl Iterator for CorpusCursor<'_> {
    type Item = Vec<Lead>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let page = self.corpus.page(self.after, self.page_size);
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => {
                self.after = Some(last.id);
                Some(page)
            }
            None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentationResolver {
    page_size: usize,
    max_depth: usize,
}

impl SegmentationResolver {
    pub fn new(config: &SegmentationConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            max_depth: config.max_rule_depth,
        }
    }

    pub fn validate(&self, rule: &SegmentationRule) -> CampaignResult<()> {
        validate_rule(rule, self.max_depth)
    }

    /// Resolves `rule` against `corpus`. Leads already in a terminal funnel
    /// stage (bounced, unsubscribed) are never targeted.
    pub async fn resolve(
        &self,
        rule: &SegmentationRule,
        corpus: &dyn LeadCorpus,
        cancel: &CancellationToken,
    ) -> CampaignResult<Vec<Uuid>> {
        self.validate(rule)?;

        let mut selected = BTreeSet::new();
        let mut scanned = 0usize;
        let mut pages = 0usize;

        for page in CorpusCursor::new(corpus, self.page_size) {
            if cancel.is_cancelled() {
                info!(scanned, "Segmentation scan cancelled");
                metrics::counter!("segmentation.scans_cancelled").increment(1);
                return Err(CampaignError::ScanCancelled);
            }

            scanned += page.len();
            pages += 1;
            selected.extend(
                page.iter()
                    .filter(|lead| !lead.stage.is_terminal() && matches(rule, lead))
                    .map(|lead| lead.id),
            );

            tokio::task::yield_now().await;
        }

        if cancel.is_cancelled() {
            return Err(CampaignError::ScanCancelled);
        }

        debug!(scanned, pages, matched = selected.len(), "Segmentation scan complete");
        metrics::counter!("segmentation.leads_scanned").increment(scanned as u64);
        metrics::counter!("segmentation.leads_matched").increment(selected.len() as u64);

        Ok(selected.into_iter().collect())
    }
}

impl Default for SegmentationResolver {
    fn default() -> Self {
        Self::new(&SegmentationConfig::default())
    }
}
