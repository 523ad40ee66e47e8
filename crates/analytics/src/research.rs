//! Per-user research statistics: channel breakdown and best campaign.

use std::collections::BTreeMap;

use campaign_core::types::Channel;
use serde::Serialize;
use uuid::Uuid;

use crate::snapshot::{ConversionRates, FunnelCounts};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelStats {
    pub campaigns: usize,
    pub funnel: FunnelCounts,
    pub rates: ConversionRates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestCampaign {
    pub campaign_id: Uuid,
    pub channel: Channel,
    pub reply_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchStats {
    pub user_id: Uuid,
    pub campaign_count: usize,
    pub channels: BTreeMap<Channel, ChannelStats>,
    pub totals: FunnelCounts,
    pub rates: ConversionRates,
    /// Highest reply rate among campaigns that sent anything. Ties go to the
    /// lower campaign id.
    pub best_campaign: Option<BestCampaign>,
}

pub(crate) struct ResearchStatsBuilder {
    user_id: Uuid,
    campaign_count: usize,
    channels: BTreeMap<Channel, ChannelStats>,
    totals: FunnelCounts,
    best: Option<BestCampaign>,
}

impl ResearchStatsBuilder {
    pub(crate) fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            campaign_count: 0,
            channels: BTreeMap::new(),
            totals: FunnelCounts::default(),
            best: None,
        }
    }

    /// Campaigns must be added in ascending id order for stable tie-breaks.
    pub(crate) fn add_campaign(&mut self, campaign_id: Uuid, channel: Channel, funnel: &FunnelCounts) {
        self.campaign_count += 1;
        self.totals.add(funnel);

        let stats = self.channels.entry(channel).or_default();
        stats.campaigns += 1;
        stats.funnel.add(funnel);

        if funnel.sent > 0 {
            let reply_rate = ConversionRates::from_funnel(funnel).reply_rate;
            let better = self
                .best
                .as_ref()
                .map_or(true, |best| reply_rate > best.reply_rate);
            if better {
                self.best = Some(BestCampaign {
                    campaign_id,
                    channel,
                    reply_rate,
                });
            }
        }
    }

    pub(crate) fn build(mut self) -> ResearchStats {
        for stats in self.channels.values_mut() {
            stats.rates = ConversionRates::from_funnel(&stats.funnel);
        }
        ResearchStats {
            user_id: self.user_id,
            campaign_count: self.campaign_count,
            channels: self.channels,
            rates: ConversionRates::from_funnel(&self.totals),
            totals: self.totals,
            best_campaign: self.best,
        }
    }
}
