//! Event ingestor: validates, deduplicates and records engagement events,
//! advancing each lead's funnel stage.
//!
//! Updates for one lead are serialized under that lead's store lock, so touch
//! history order equals acceptance order. An inbound callback that arrives
//! before the lead's `sent` event is recorded right away, but its stage
//! transition is held back until `sent` shows up or the reorder wait runs
//! out.

use std::sync::Arc;

use campaign_core::config::IngestConfig;
use campaign_core::idempotency::{derive_key, MAX_KEY_LEN};
use campaign_core::types::{Campaign, Event, EventKind, FunnelStage, RawEvent};
use campaign_core::{CampaignDirectory, CampaignError, CampaignResult, EventSink, LeadStore};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::funnel::advance;
use crate::log::EventLog;

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub event: Event,
    /// Lead stage after this event.
    pub stage: FunnelStage,
    /// The stage transition is waiting for the lead's `sent` event.
    pub deferred: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted(IngestReceipt),
    Duplicate { key: String, existing_event_id: Uuid },
    Rejected { code: &'static str, reason: String },
}

impl IngestOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            IngestOutcome::Accepted(_) => "accepted",
            IngestOutcome::Duplicate { .. } => "duplicate",
            IngestOutcome::Rejected { .. } => "rejected",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted(_))
    }

    fn rejected(err: CampaignError) -> Self {
        IngestOutcome::Rejected {
            code: err.code(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTransition {
    event_id: Uuid,
    kind: EventKind,
    buffered_at: DateTime<Utc>,
}

type LeadKey = (Uuid, Uuid);

pub struct EventIngestor {
    directory: Arc<dyn CampaignDirectory>,
    leads: Arc<LeadStore>,
    sink: Arc<dyn EventSink>,
    config: IngestConfig,
    log: EventLog,
    /// (campaign, lead) pairs whose `sent` event is recorded.
    sent_recorded: DashSet<LeadKey>,
    pending: DashMap<LeadKey, Vec<PendingTransition>>,
}

impl EventIngestor {
    pub fn new(
        directory: Arc<dyn CampaignDirectory>,
        leads: Arc<LeadStore>,
        sink: Arc<dyn EventSink>,
        config: IngestConfig,
    ) -> Self {
        info!(
            reorder_wait_ms = config.reorder_wait_ms,
            max_pending_per_lead = config.max_pending_per_lead,
            "Event ingestor initialized"
        );
        Self {
            directory,
            leads,
            sink,
            config,
            log: EventLog::new(),
            sent_recorded: DashSet::new(),
            pending: DashMap::new(),
        }
    }

    pub fn ingest(&self, raw: RawEvent) -> IngestOutcome {
        let now = Utc::now();
        self.release_expired(now);

        let campaign = match self.validate(&raw, now) {
            Ok(campaign) => campaign,
            Err(e) => {
                warn!(
                    campaign_id = %raw.campaign_id,
                    lead_id = %raw.lead_id,
                    kind = %raw.kind,
                    error = %e,
                    "Event rejected"
                );
                metrics::counter!("ingest.rejected", "code" => e.code()).increment(1);
                return IngestOutcome::rejected(e);
            }
        };

        let key = match raw.idempotency_key.as_deref() {
            Some(key) => key.to_string(),
            None => derive_key(&raw),
        };
        let event = Event {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            lead_id: raw.lead_id,
            channel: raw.channel,
            kind: raw.kind,
            occurred_at: raw.occurred_at,
            recorded_at: now,
            idempotency_key: key,
            provider_message_id: raw.provider_message_id,
            detail: raw.detail,
            attempts: raw.attempts,
        };

        let recorded = self
            .leads
            .update(&event.lead_id, |lead| -> Result<(FunnelStage, bool), Uuid> {
                self.log.append(event.clone())?;
                lead.touches.push(event.id);
                let deferred = self.transition(&mut lead.stage, &event, now);
                Ok((lead.stage, deferred))
            });

        match recorded {
            None => {
                let e = CampaignError::unknown_lead(event.lead_id);
                metrics::counter!("ingest.rejected", "code" => e.code()).increment(1);
                IngestOutcome::rejected(e)
            }
            Some(Err(existing_event_id)) => {
                debug!(
                    campaign_id = %event.campaign_id,
                    lead_id = %event.lead_id,
                    kind = %event.kind,
                    key = %event.idempotency_key,
                    "Duplicate event ignored"
                );
                metrics::counter!("ingest.duplicate", "kind" => event.kind.as_str()).increment(1);
                IngestOutcome::Duplicate {
                    key: event.idempotency_key,
                    existing_event_id,
                }
            }
            Some(Ok((stage, deferred))) => {
                debug!(
                    event_id = %event.id,
                    campaign_id = %event.campaign_id,
                    lead_id = %event.lead_id,
                    kind = %event.kind,
                    stage = stage.as_str(),
                    deferred,
                    "Event accepted"
                );
                metrics::counter!(
                    "ingest.accepted",
                    "channel" => event.channel.as_str(),
                    "kind" => event.kind.as_str()
                )
                .increment(1);
                if deferred {
                    metrics::counter!("ingest.deferred").increment(1);
                }
                self.sink.publish(&event);
                IngestOutcome::Accepted(IngestReceipt {
                    event,
                    stage,
                    deferred,
                })
            }
        }
    }

    /// Applies `event` to the lead's stage, or buffers it when the lead's
    /// `sent` event has not been recorded yet. Called under the lead's lock.
    fn transition(&self, stage: &mut FunnelStage, event: &Event, now: DateTime<Utc>) -> bool {
        let pair = (event.campaign_id, event.lead_id);
        match event.kind {
            EventKind::Sent => {
                self.sent_recorded.insert(pair);
                *stage = advance(*stage, EventKind::Sent);
                if let Some((_, buffered)) = self.pending.remove(&pair) {
                    metrics::counter!("ingest.released", "reason" => "sent").increment(buffered.len() as u64);
                    for pending in buffered {
                        *stage = advance(*stage, pending.kind);
                    }
                }
                false
            }
            EventKind::Failed => false,
            kind if self.sent_recorded.contains(&pair) => {
                *stage = advance(*stage, kind);
                false
            }
            kind => {
                let mut buffered = self.pending.entry(pair).or_default();
                buffered.push(PendingTransition {
                    event_id: event.id,
                    kind,
                    buffered_at: now,
                });
                if buffered.len() > self.config.max_pending_per_lead.max(1) {
                    let oldest = buffered.remove(0);
                    debug!(event_id = %oldest.event_id, "Reorder buffer full, releasing oldest");
                    metrics::counter!("ingest.released", "reason" => "overflow").increment(1);
                    *stage = advance(*stage, oldest.kind);
                }
                true
            }
        }
    }

    /// Applies buffered transitions older than the reorder wait. Returns the
    /// number released.
    pub fn release_expired(&self, now: DateTime<Utc>) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let cutoff = now - self.config.reorder_wait();
        let due: Vec<LeadKey> = self
            .pending
            .iter()
            .filter(|entry| entry.value().iter().any(|p| p.buffered_at <= cutoff))
            .map(|entry| *entry.key())
            .collect();

        let mut released = 0;
        for pair in due {
            let expired: Vec<PendingTransition> = match self.pending.get_mut(&pair) {
                Some(mut buffered) => {
                    let (expired, keep): (Vec<_>, Vec<_>) = std::mem::take(buffered.value_mut())
                        .into_iter()
                        .partition(|p| p.buffered_at <= cutoff);
                    *buffered = keep;
                    expired
                }
                None => continue,
            };
            self.pending.remove_if(&pair, |_, buffered| buffered.is_empty());
            if expired.is_empty() {
                continue;
            }

            released += expired.len();
            self.leads.update(&pair.1, |lead| {
                for pending in &expired {
                    lead.stage = advance(lead.stage, pending.kind);
                }
            });
        }

        if released > 0 {
            info!(released, "Released expired out-of-order transitions");
            metrics::counter!("ingest.released", "reason" => "expired").increment(released as u64);
        }
        released
    }

    fn validate(&self, raw: &RawEvent, now: DateTime<Utc>) -> CampaignResult<Campaign> {
        let campaign = self
            .directory
            .campaign(&raw.campaign_id)
            .ok_or_else(|| CampaignError::unknown_campaign(raw.campaign_id))?;
        let lead = self
            .leads
            .get(&raw.lead_id)
            .ok_or_else(|| CampaignError::unknown_lead(raw.lead_id))?;
        if lead.account_id != campaign.account_id {
            return Err(CampaignError::Validation(format!(
                "lead {} does not belong to the campaign's account",
                raw.lead_id
            )));
        }
        if raw.channel != campaign.channel() {
            return Err(CampaignError::Validation(format!(
                "event channel {} does not match campaign channel {}",
                raw.channel,
                campaign.channel()
            )));
        }
        if let Some(key) = &raw.idempotency_key {
            if key.trim().is_empty() {
                return Err(CampaignError::Validation("idempotency key is blank".into()));
            }
            if key.len() > MAX_KEY_LEN {
                return Err(CampaignError::Validation(format!(
                    "idempotency key exceeds {MAX_KEY_LEN} bytes"
                )));
            }
        }
        let skew = chrono::Duration::seconds(self.config.max_clock_skew_secs);
        if raw.occurred_at > now + skew {
            return Err(CampaignError::Validation(format!(
                "event occurred_at {} is in the future",
                raw.occurred_at
            )));
        }
        Ok(campaign)
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.all()
    }

    pub fn campaign_events(&self, campaign_id: Uuid) -> Vec<Event> {
        self.log.for_campaign(campaign_id)
    }

    pub fn lead_history(&self, lead_id: Uuid) -> Vec<Event> {
        self.log.for_lead(lead_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn has_sent(&self, campaign_id: Uuid, lead_id: Uuid) -> bool {
        self.sent_recorded.contains(&(campaign_id, lead_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::event_bus::{capture_sink, CaptureSink};
    use campaign_core::rules::{ComparisonOperator, SegmentationRule};
    use campaign_core::types::{CampaignContent, Channel, Lead, LifecycleState};
    use serde_json::json;

    #[derive(Default)]
    struct Directory(DashMap<Uuid, Campaign>);

    impl CampaignDirectory for Directory {
        fn campaign(&self, id: &Uuid) -> Option<Campaign> {
            self.0.get(id).map(|c| c.clone())
        }
    }

    struct Fixture {
        ingestor: EventIngestor,
        leads: Arc<LeadStore>,
        sink: Arc<CaptureSink>,
        campaign: Uuid,
        lead: Uuid,
    }

    fn fixture(config: IngestConfig) -> Fixture {
        let directory = Arc::new(Directory::default());
        let leads = Arc::new(LeadStore::new());
        let sink = capture_sink();
        let account = Uuid::new_v4();
        let now = Utc::now();

        let campaign = Campaign {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            account_id: account,
            name: "nurture".into(),
            content: CampaignContent::Email {
                subject: "s".into(),
                body_html: "b".into(),
                from_address: "f@example.com".into(),
            },
            rule: SegmentationRule::attribute("company.size", ComparisonOperator::GreaterThan, json!(50)),
            state: LifecycleState::Active,
            schedule: None,
            created_at: now,
            updated_at: now,
            archived_at: None,
        };
        let lead = Lead::new(account);
        let (campaign_id, lead_id) = (campaign.id, lead.id);
        directory.0.insert(campaign.id, campaign);
        leads.insert(lead);

        Fixture {
            ingestor: EventIngestor::new(directory, leads.clone(), sink.clone(), config),
            leads,
            sink,
            campaign: campaign_id,
            lead: lead_id,
        }
    }

    impl Fixture {
        fn raw(&self, kind: EventKind, key: Option<&str>) -> RawEvent {
            RawEvent {
                campaign_id: self.campaign,
                lead_id: self.lead,
                channel: Channel::Email,
                kind,
                occurred_at: Utc::now(),
                idempotency_key: key.map(String::from),
                provider_message_id: Some("msg-1".into()),
                detail: None,
                attempts: 1,
            }
        }

        fn stage(&self) -> FunnelStage {
            self.leads.stage(&self.lead).unwrap()
        }
    }

    #[test]
    fn test_ingest_twice_is_accepted_then_duplicate() {
        let f = fixture(IngestConfig::default());
        let first = f.ingestor.ingest(f.raw(EventKind::Sent, Some("send-1")));
        let second = f.ingestor.ingest(f.raw(EventKind::Sent, Some("send-1")));

        assert_eq!(first.status(), "accepted");
        assert_eq!(second.status(), "duplicate");
        assert_eq!(f.ingestor.events().len(), 1);
        assert_eq!(f.sink.count(), 1);
        assert_eq!(f.leads.get(&f.lead).unwrap().touches.len(), 1);
    }

    #[test]
    fn test_derived_key_dedups_provider_redelivery() {
        let f = fixture(IngestConfig::default());
        f.ingestor.ingest(f.raw(EventKind::Sent, Some("send-1")));
        let first = f.ingestor.ingest(f.raw(EventKind::Delivered, None));
        let again = f.ingestor.ingest(f.raw(EventKind::Delivered, None));

        assert!(first.is_accepted());
        assert!(matches!(again, IngestOutcome::Duplicate { .. }));
        assert_eq!(f.stage(), FunnelStage::Delivered);
    }

    #[test]
    fn test_sent_then_delivered_scenario() {
        let f = fixture(IngestConfig::default());
        f.ingestor.ingest(f.raw(EventKind::Sent, Some("k")));
        assert_eq!(f.stage(), FunnelStage::Sent);

        let delivered = f.ingestor.ingest(f.raw(EventKind::Delivered, Some("cb-1")));
        match delivered {
            IngestOutcome::Accepted(receipt) => {
                assert_eq!(receipt.stage, FunnelStage::Delivered);
                assert!(!receipt.deferred);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let dup = f.ingestor.ingest(f.raw(EventKind::Delivered, Some("cb-1")));
        assert_eq!(dup.status(), "duplicate");
        assert_eq!(f.stage(), FunnelStage::Delivered);
        assert_eq!(f.sink.count_kind(EventKind::Delivered), 1);
    }

    #[test]
    fn test_rejections() {
        let f = fixture(IngestConfig::default());

        let mut unknown_campaign = f.raw(EventKind::Sent, None);
        unknown_campaign.campaign_id = Uuid::new_v4();
        let mut unknown_lead = f.raw(EventKind::Sent, None);
        unknown_lead.lead_id = Uuid::new_v4();
        let mut wrong_channel = f.raw(EventKind::Sent, None);
        wrong_channel.channel = Channel::Text;
        let blank_key = f.raw(EventKind::Sent, Some("  "));
        let long_key = f.raw(EventKind::Sent, Some(&"k".repeat(MAX_KEY_LEN + 1)));
        let mut future = f.raw(EventKind::Sent, None);
        future.occurred_at = Utc::now() + chrono::Duration::hours(2);
        let outsider = Lead::new(Uuid::new_v4());
        let mut foreign_lead = f.raw(EventKind::Sent, None);
        foreign_lead.lead_id = outsider.id;
        f.leads.insert(outsider);

        let expected = [
            (unknown_campaign, "referential_error"),
            (unknown_lead, "referential_error"),
            (wrong_channel, "validation_error"),
            (blank_key, "validation_error"),
            (long_key, "validation_error"),
            (future, "validation_error"),
            (foreign_lead, "validation_error"),
        ];
        for (raw, code) in expected {
            match f.ingestor.ingest(raw) {
                IngestOutcome::Rejected { code: got, .. } => assert_eq!(got, code),
                other => panic!("expected rejection, got {other:?}"),
            }
        }
        assert!(f.ingestor.events().is_empty());
        assert_eq!(f.sink.count(), 0);
    }

    #[test]
    fn test_out_of_order_delivered_waits_for_sent() {
        let f = fixture(IngestConfig::default());

        let early = f.ingestor.ingest(f.raw(EventKind::Opened, Some("cb-open")));
        match early {
            IngestOutcome::Accepted(receipt) => {
                assert!(receipt.deferred);
                assert_eq!(receipt.stage, FunnelStage::New);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(f.ingestor.pending_count(), 1);
        assert_eq!(f.sink.count(), 1);

        f.ingestor.ingest(f.raw(EventKind::Sent, Some("send")));
        assert_eq!(f.stage(), FunnelStage::Opened);
        assert_eq!(f.ingestor.pending_count(), 0);

        let kinds: Vec<_> = f.ingestor.lead_history(f.lead).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Opened, EventKind::Sent]);
    }

    #[test]
    fn test_expired_buffer_is_applied_anyway() {
        let f = fixture(IngestConfig {
            reorder_wait_ms: 1_000,
            ..IngestConfig::default()
        });
        f.ingestor.ingest(f.raw(EventKind::Unsubscribed, Some("cb-unsub")));
        assert_eq!(f.stage(), FunnelStage::New);

        assert_eq!(f.ingestor.release_expired(Utc::now()), 0);
        let released = f
            .ingestor
            .release_expired(Utc::now() + chrono::Duration::seconds(2));
        assert_eq!(released, 1);
        assert_eq!(f.stage(), FunnelStage::Unsubscribed);
        assert_eq!(f.ingestor.pending_count(), 0);
    }

    #[test]
    fn test_buffer_overflow_releases_oldest() {
        let f = fixture(IngestConfig {
            max_pending_per_lead: 2,
            ..IngestConfig::default()
        });
        f.ingestor.ingest(f.raw(EventKind::Delivered, Some("a")));
        f.ingestor.ingest(f.raw(EventKind::Opened, Some("b")));
        assert_eq!(f.stage(), FunnelStage::New);

        f.ingestor.ingest(f.raw(EventKind::Clicked, Some("c")));
        assert_eq!(f.stage(), FunnelStage::Delivered);
        assert_eq!(f.ingestor.pending_count(), 2);
    }

    #[test]
    fn test_terminal_lead_stays_terminal() {
        let f = fixture(IngestConfig::default());
        f.ingestor.ingest(f.raw(EventKind::Sent, Some("s")));
        f.ingestor.ingest(f.raw(EventKind::Bounced, Some("b")));
        f.ingestor.ingest(f.raw(EventKind::Replied, Some("r")));

        assert_eq!(f.stage(), FunnelStage::Bounced);
        // Late events are still recorded.
        assert_eq!(f.ingestor.lead_history(f.lead).len(), 3);
    }

    #[test]
    fn test_failed_does_not_move_stage() {
        let f = fixture(IngestConfig::default());
        let outcome = f.ingestor.ingest(f.raw(EventKind::Failed, Some("f")));
        assert!(outcome.is_accepted());
        assert_eq!(f.stage(), FunnelStage::New);
        assert_eq!(f.ingestor.pending_count(), 0);
        assert!(!f.ingestor.has_sent(f.campaign, f.lead));
    }
}
