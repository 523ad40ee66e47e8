//! Incremental analytics over accepted events.
//!
//! Counters are keyed by (campaign, kind, time bucket) and bumped atomically;
//! distinct leads are tracked per key. An event id is applied at most once and
//! every update is a commutative increment or set insert, so any replay order
//! of the same events converges on the same snapshot.
//!
//! Live applies hold the rebuild gate shared; a rebuild holds it exclusively
//! from the clear until the replay finishes, so no accepted event is lost
//! between loading the log and swapping in the new state.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use campaign_core::config::AnalyticsConfig;
use campaign_core::types::{Channel, Event, EventKind};
use campaign_core::EventSink;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::research::{ResearchStats, ResearchStatsBuilder};
use crate::snapshot::{AnalyticsSnapshot, ConversionRates, FunnelCounts, SnapshotScope, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    campaign_id: Uuid,
    kind: EventKind,
    bucket_start: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CampaignMeta {
    pub owner_id: Uuid,
    pub account_id: Uuid,
    pub channel: Channel,
}

pub struct AnalyticsAggregator {
    bucket_secs: i64,
    counters: DashMap<BucketKey, AtomicU64>,
    leads: DashMap<BucketKey, DashSet<Uuid>>,
    applied: DashSet<Uuid>,
    campaigns: DashMap<Uuid, CampaignMeta>,
    gate: RwLock<()>,
}

impl AnalyticsAggregator {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            bucket_secs: config.bucket_secs.max(1) as i64,
            counters: DashMap::new(),
            leads: DashMap::new(),
            applied: DashSet::new(),
            campaigns: DashMap::new(),
            gate: RwLock::new(()),
        }
    }

    /// Records ownership so user and account folds can find the campaign.
    pub fn register_campaign(
        &self,
        campaign_id: Uuid,
        owner_id: Uuid,
        account_id: Uuid,
        channel: Channel,
    ) {
        self.campaigns.insert(
            campaign_id,
            CampaignMeta {
                owner_id,
                account_id,
                channel,
            },
        );
    }

    pub fn campaign_meta(&self, campaign_id: &Uuid) -> Option<CampaignMeta> {
        self.campaigns.get(campaign_id).map(|m| *m)
    }

    /// Applies one event. Returns false when the event was already applied.
    pub fn apply(&self, event: &Event) -> bool {
        let _shared = self.gate.read();
        self.apply_unlocked(event)
    }

    fn apply_unlocked(&self, event: &Event) -> bool {
        if !self.applied.insert(event.id) {
            metrics::counter!("analytics.duplicate_apply").increment(1);
            return false;
        }

        let key = BucketKey {
            campaign_id: event.campaign_id,
            kind: event.kind,
            bucket_start: self.bucket_start(event.occurred_at),
        };
        self.counters
            .entry(key)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        self.leads.entry(key).or_default().insert(event.lead_id);

        metrics::counter!("analytics.applied", "kind" => event.kind.as_str()).increment(1);
        true
    }

    /// Drops all derived state and replays the events returned by `load`.
    /// Campaign registrations are kept.
    ///
    /// `load` runs with live applies blocked, so it must read the event log
    /// without publishing to this aggregator.
    pub fn rebuild<I>(&self, load: impl FnOnce() -> I) -> usize
    where
        I: IntoIterator<Item = Event>,
    {
        let _exclusive = self.gate.write();
        self.counters.clear();
        self.leads.clear();
        self.applied.clear();

        let applied = load()
            .into_iter()
            .filter(|e| self.apply_unlocked(e))
            .count();
        info!(applied, "Analytics rebuilt from event log");
        metrics::counter!("analytics.rebuilds").increment(1);
        applied
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    fn bucket_start(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.bucket_secs) * self.bucket_secs
    }

    fn in_scope(&self, scope: &SnapshotScope, campaign_id: &Uuid) -> bool {
        match scope {
            SnapshotScope::Campaign(id) => id == campaign_id,
            SnapshotScope::User(owner) => self
                .campaigns
                .get(campaign_id)
                .is_some_and(|m| m.owner_id == *owner),
            SnapshotScope::Account(account) => self
                .campaigns
                .get(campaign_id)
                .is_some_and(|m| m.account_id == *account),
            SnapshotScope::Global => true,
        }
    }

    fn scoped_campaigns(&self, scope: &SnapshotScope) -> usize {
        match scope {
            SnapshotScope::Campaign(id) => usize::from(self.campaigns.contains_key(id)),
            SnapshotScope::User(owner) => self
                .campaigns
                .iter()
                .filter(|m| m.owner_id == *owner)
                .count(),
            SnapshotScope::Account(account) => self
                .campaigns
                .iter()
                .filter(|m| m.account_id == *account)
                .count(),
            SnapshotScope::Global => self.campaigns.len(),
        }
    }

    pub fn snapshot(&self, scope: SnapshotScope, range: TimeRange) -> AnalyticsSnapshot {
        let mut counts: BTreeMap<EventKind, u64> = BTreeMap::new();
        let mut buckets: BTreeMap<DateTime<Utc>, BTreeMap<EventKind, u64>> = BTreeMap::new();

        for entry in self.counters.iter() {
            let key = entry.key();
            let Some(start) = self.selected_bucket(&scope, &range, key) else {
                continue;
            };
            let n = entry.value().load(Ordering::Relaxed);
            *counts.entry(key.kind).or_default() += n;
            *buckets.entry(start).or_default().entry(key.kind).or_default() += n;
        }

        // Distinct leads are unioned per campaign across buckets, then summed.
        let mut per_campaign: BTreeMap<(Uuid, EventKind), HashSet<Uuid>> = BTreeMap::new();
        for entry in self.leads.iter() {
            let key = entry.key();
            if self.selected_bucket(&scope, &range, key).is_none() {
                continue;
            }
            per_campaign
                .entry((key.campaign_id, key.kind))
                .or_default()
                .extend(entry.value().iter().map(|id| *id));
        }
        let mut unique_leads: BTreeMap<EventKind, u64> = BTreeMap::new();
        for ((_, kind), leads) in per_campaign {
            *unique_leads.entry(kind).or_default() += leads.len() as u64;
        }

        let funnel = FunnelCounts::from_unique(&unique_leads);
        debug!(?scope, events = counts.values().sum::<u64>(), "Analytics snapshot built");

        AnalyticsSnapshot {
            scope,
            range,
            campaigns: self.scoped_campaigns(&scope),
            counts,
            unique_leads,
            buckets,
            rates: ConversionRates::from_funnel(&funnel),
            funnel,
        }
    }

    fn selected_bucket(
        &self,
        scope: &SnapshotScope,
        range: &TimeRange,
        key: &BucketKey,
    ) -> Option<DateTime<Utc>> {
        if !self.in_scope(scope, &key.campaign_id) {
            return None;
        }
        let start = Utc.timestamp_opt(key.bucket_start, 0).single()?;
        range.contains(start).then_some(start)
    }

    /// Per-user research fold over every campaign the user owns.
    pub fn research(&self, user_id: Uuid, range: TimeRange) -> ResearchStats {
        let mut owned: Vec<(Uuid, Channel)> = self
            .campaigns
            .iter()
            .filter(|m| m.owner_id == user_id)
            .map(|m| (*m.key(), m.channel))
            .collect();
        owned.sort();

        let mut builder = ResearchStatsBuilder::new(user_id);
        for (campaign_id, channel) in owned {
            let snapshot = self.snapshot(SnapshotScope::Campaign(campaign_id), range);
            builder.add_campaign(campaign_id, channel, &snapshot.funnel);
        }
        builder.build()
    }
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new(&AnalyticsConfig::default())
    }
}

impl EventSink for AnalyticsAggregator {
    fn publish(&self, event: &Event) {
        self.apply(event);
    }
}
