//! Read-side analytics types: scopes, time ranges, funnel counts and rates.

use std::collections::BTreeMap;

use campaign_core::types::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum SnapshotScope {
    Campaign(Uuid),
    /// Every campaign owned by the user.
    User(Uuid),
    /// Every campaign belonging to the account.
    Account(Uuid),
    Global,
}

/// Half-open `[from, to)` range; open ends are unbounded. Applied at bucket
/// granularity: a bucket is included when its start falls in the range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}

/// Unique leads reaching each funnel step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelCounts {
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub replied: u64,
    pub bounced: u64,
    pub unsubscribed: u64,
    pub failed: u64,
}

impl FunnelCounts {
    pub fn from_unique(unique: &BTreeMap<EventKind, u64>) -> Self {
        let get = |kind| unique.get(&kind).copied().unwrap_or(0);
        Self {
            sent: get(EventKind::Sent),
            delivered: get(EventKind::Delivered),
            opened: get(EventKind::Opened),
            clicked: get(EventKind::Clicked),
            replied: get(EventKind::Replied),
            bounced: get(EventKind::Bounced),
            unsubscribed: get(EventKind::Unsubscribed),
            failed: get(EventKind::Failed),
        }
    }

    pub fn add(&mut self, other: &FunnelCounts) {
        self.sent += other.sent;
        self.delivered += other.delivered;
        self.opened += other.opened;
        self.clicked += other.clicked;
        self.replied += other.replied;
        self.bounced += other.bounced;
        self.unsubscribed += other.unsubscribed;
        self.failed += other.failed;
    }
}

/// Step rates relative to leads sent. Zero when nothing was sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionRates {
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub reply_rate: f64,
    pub bounce_rate: f64,
    pub unsubscribe_rate: f64,
}

impl ConversionRates {
    pub fn from_funnel(funnel: &FunnelCounts) -> Self {
        if funnel.sent == 0 {
            return Self::default();
        }
        let sent = funnel.sent as f64;
        Self {
            delivery_rate: funnel.delivered as f64 / sent,
            open_rate: funnel.opened as f64 / sent,
            click_rate: funnel.clicked as f64 / sent,
            reply_rate: funnel.replied as f64 / sent,
            bounce_rate: funnel.bounced as f64 / sent,
            unsubscribe_rate: funnel.unsubscribed as f64 / sent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub scope: SnapshotScope,
    pub range: TimeRange,
    pub campaigns: usize,
    /// Raw event counts per kind.
    pub counts: BTreeMap<EventKind, u64>,
    /// Distinct leads per kind. For folded scopes this sums the
    /// per-campaign figures.
    pub unique_leads: BTreeMap<EventKind, u64>,
    /// Bucket start -> counts per kind.
    pub buckets: BTreeMap<DateTime<Utc>, BTreeMap<EventKind, u64>>,
    pub funnel: FunnelCounts,
    pub rates: ConversionRates,
}

impl AnalyticsSnapshot {
    pub fn total_events(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count(&self, kind: EventKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_is_half_open() {
        let a = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let range = TimeRange::between(a, b);
        assert!(range.contains(a));
        assert!(!range.contains(b));
        assert!(TimeRange::all().contains(b));
    }

    #[test]
    fn test_rates_from_funnel() {
        let funnel = FunnelCounts {
            sent: 4,
            delivered: 3,
            opened: 2,
            replied: 1,
            ..Default::default()
        };
        let rates = ConversionRates::from_funnel(&funnel);
        assert_eq!(rates.delivery_rate, 0.75);
        assert_eq!(rates.open_rate, 0.5);
        assert_eq!(rates.reply_rate, 0.25);
        assert_eq!(rates.click_rate, 0.0);
        assert_eq!(ConversionRates::from_funnel(&FunnelCounts::default()), ConversionRates::default());
    }
}
