//! Campaign engine: lifecycle orchestration over the resolver, the channel
//! dispatchers, the event ingestor and the analytics aggregator.
//!
//! Activation and resume spawn one run task per campaign. A run resolves the
//! segment, skips leads the campaign already dispatched to, streams the rest
//! through the channel dispatcher and ingests every outcome. Pausing or
//! archiving cancels the scan and closes admission; sends already admitted
//! finish and are still recorded.

use std::sync::Arc;

use campaign_analytics::{AnalyticsAggregator, AnalyticsSnapshot, ResearchStats, SnapshotScope, TimeRange};
use campaign_channels::{DispatcherSet, ProviderSet};
use campaign_core::config::AppConfig;
use campaign_core::event_bus::FanoutSink;
use campaign_core::rules::SegmentationRule;
use campaign_core::types::{
    Campaign, CampaignContent, ContactInfo, Event, Lead, LifecycleState, RawEvent, ScheduleWindow,
};
use campaign_core::{
    CampaignError, CampaignResult, ConfigFeatureGate, EventSink, FeatureGate, IdentityToken,
    LeadStore,
};
use campaign_events::{EventIngestor, IngestOutcome};
use campaign_segmentation::SegmentationResolver;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::registry::{CampaignRegistry, CampaignRun};
use crate::state_machine::{Actor, LifecycleAction, TransitionRecord};

#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub content: CampaignContent,
    pub rule: SegmentationRule,
    #[serde(default)]
    pub schedule: Option<ScheduleWindow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLead {
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub company: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub activated: Vec<Uuid>,
    pub completed: Vec<Uuid>,
}

pub struct EngineBuilder {
    config: AppConfig,
    providers: Option<ProviderSet>,
    gate: Option<Arc<dyn FeatureGate>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    pub fn providers(mut self, providers: ProviderSet) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn feature_gate(mut self, gate: Arc<dyn FeatureGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Additional sink for accepted events, after the aggregator.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Arc<CampaignEngine> {
        let config = self.config;
        let registry = Arc::new(CampaignRegistry::new());
        let leads = Arc::new(LeadStore::new());
        let analytics = Arc::new(AnalyticsAggregator::new(&config.analytics));

        let mut fanout = FanoutSink::new().with(analytics.clone());
        for sink in self.sinks {
            fanout = fanout.with(sink);
        }
        let ingestor = Arc::new(EventIngestor::new(
            registry.clone(),
            leads.clone(),
            Arc::new(fanout),
            config.ingest.clone(),
        ));

        let gate = self
            .gate
            .unwrap_or_else(|| Arc::new(ConfigFeatureGate::new(&config.features)));
        let dispatchers = DispatcherSet::new(
            &config.dispatch,
            self.providers.unwrap_or_else(ProviderSet::logging),
        );

        info!(node_id = %config.node_id, "Campaign engine initialized");
        Arc::new(CampaignEngine {
            registry,
            leads,
            resolver: SegmentationResolver::new(&config.segmentation),
            dispatchers,
            ingestor,
            analytics,
            gate,
        })
    }
}

pub struct CampaignEngine {
    registry: Arc<CampaignRegistry>,
    leads: Arc<LeadStore>,
    resolver: SegmentationResolver,
    dispatchers: DispatcherSet,
    ingestor: Arc<EventIngestor>,
    analytics: Arc<AnalyticsAggregator>,
    gate: Arc<dyn FeatureGate>,
}

impl CampaignEngine {
    pub fn builder(config: AppConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            providers: None,
            gate: None,
            sinks: Vec::new(),
        }
    }

    // ─── Creation ───────────────────────────────────────────────────────────

    pub fn create_campaign(&self, token: &IdentityToken, new: NewCampaign) -> CampaignResult<Campaign> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(CampaignError::Validation("campaign name is required".into()));
        }
        if let Some(window) = &new.schedule {
            validate_window(window)?;
        }

        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            owner_id: token.user_id,
            account_id: token.account_id,
            name: name.to_string(),
            content: new.content,
            rule: new.rule,
            state: LifecycleState::Draft,
            schedule: new.schedule,
            created_at: now,
            updated_at: now,
            archived_at: None,
        };

        self.registry.insert(campaign.clone());
        self.analytics
            .register_campaign(
                campaign.id,
                campaign.owner_id,
                campaign.account_id,
                campaign.channel(),
            );
        info!(
            event = "campaign_created",
            campaign_id = %campaign.id,
            owner_id = %campaign.owner_id,
            account_id = %campaign.account_id,
            channel = %campaign.channel(),
            "Campaign created"
        );
        metrics::counter!("lifecycle.campaigns_created", "channel" => campaign.channel().as_str())
            .increment(1);
        Ok(campaign)
    }

    pub fn create_lead(&self, token: &IdentityToken, new: NewLead) -> Lead {
        let mut lead = Lead::new(token.account_id);
        lead.contact = new.contact;
        lead.company = new.company;
        lead.profile = new.profile;
        self.leads.insert(lead.clone());
        info!(lead_id = %lead.id, account_id = %lead.account_id, "Lead created");
        lead
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Draft -> Scheduled. `window` replaces any schedule set at creation.
    pub fn schedule(
        &self,
        token: &IdentityToken,
        campaign_id: Uuid,
        window: Option<ScheduleWindow>,
        reason: Option<String>,
    ) -> CampaignResult<TransitionRecord> {
        self.authorize(token, campaign_id)?;
        let resolver = &self.resolver;
        self.registry.transition(
            &campaign_id,
            LifecycleAction::Schedule,
            Actor::User(token.user_id),
            reason,
            |draft| {
                if let Some(window) = window {
                    validate_window(&window)?;
                    draft.schedule = Some(window);
                }
                if draft.schedule.is_none() {
                    return Err(CampaignError::Validation(
                        "a schedule window is required to schedule a campaign".into(),
                    ));
                }
                resolver.validate(&draft.rule)
            },
        )
    }

    /// Scheduled -> Active, then starts dispatching.
    pub fn activate(
        self: &Arc<Self>,
        token: &IdentityToken,
        campaign_id: Uuid,
        reason: Option<String>,
    ) -> CampaignResult<TransitionRecord> {
        self.authorize(token, campaign_id)?;
        self.activate_as(campaign_id, Actor::User(token.user_id), reason, Utc::now())
    }

    fn activate_as(
        self: &Arc<Self>,
        campaign_id: Uuid,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> CampaignResult<TransitionRecord> {
        let record = self.registry.transition(
            &campaign_id,
            LifecycleAction::Activate,
            actor,
            reason,
            |draft| {
                let started = draft.schedule.is_some_and(|w| w.has_started(now));
                if !started {
                    return Err(CampaignError::Validation(format!(
                        "campaign {campaign_id} has not reached its scheduled start"
                    )));
                }
                self.resolver.validate(&draft.rule)?;
                self.gate.require_dispatch(draft.account_id)
            },
        )?;
        self.start_run(campaign_id);
        Ok(record)
    }

    pub fn pause(
        &self,
        token: &IdentityToken,
        campaign_id: Uuid,
        reason: Option<String>,
    ) -> CampaignResult<TransitionRecord> {
        self.authorize(token, campaign_id)?;
        let record = self.registry.transition(
            &campaign_id,
            LifecycleAction::Pause,
            Actor::User(token.user_id),
            reason,
            |_| Ok(()),
        )?;
        self.registry.cancel_run(&campaign_id);
        Ok(record)
    }

    /// Paused -> Active. Leads the campaign already dispatched to are skipped.
    pub fn resume(
        self: &Arc<Self>,
        token: &IdentityToken,
        campaign_id: Uuid,
        reason: Option<String>,
    ) -> CampaignResult<TransitionRecord> {
        self.authorize(token, campaign_id)?;
        let record = self.registry.transition(
            &campaign_id,
            LifecycleAction::Resume,
            Actor::User(token.user_id),
            reason,
            |draft| self.gate.require_dispatch(draft.account_id),
        )?;
        self.start_run(campaign_id);
        Ok(record)
    }

    pub fn complete(
        &self,
        token: &IdentityToken,
        campaign_id: Uuid,
        reason: Option<String>,
    ) -> CampaignResult<TransitionRecord> {
        self.authorize(token, campaign_id)?;
        self.close(campaign_id, LifecycleAction::Complete, Actor::User(token.user_id), reason)
    }

    pub fn archive(
        &self,
        token: &IdentityToken,
        campaign_id: Uuid,
        reason: Option<String>,
    ) -> CampaignResult<TransitionRecord> {
        self.authorize(token, campaign_id)?;
        self.close(campaign_id, LifecycleAction::Archive, Actor::User(token.user_id), reason)
    }

    fn close(
        &self,
        campaign_id: Uuid,
        action: LifecycleAction,
        actor: Actor,
        reason: Option<String>,
    ) -> CampaignResult<TransitionRecord> {
        let record = self
            .registry
            .transition(&campaign_id, action, actor, reason, |_| Ok(()))?;
        self.registry.cancel_run(&campaign_id);
        Ok(record)
    }

    /// Starts scheduled campaigns whose window opened and completes active
    /// campaigns whose window closed.
    pub fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        for campaign in self.registry.in_state(LifecycleState::Scheduled) {
            if !campaign.schedule.is_some_and(|w| w.has_started(now)) {
                continue;
            }
            match self.activate_as(
                campaign.id,
                Actor::Scheduler,
                Some("scheduled start reached".into()),
                now,
            ) {
                Ok(_) => report.activated.push(campaign.id),
                Err(e) => warn!(campaign_id = %campaign.id, error = %e, "Scheduled activation refused"),
            }
        }

        for campaign in self.registry.in_state(LifecycleState::Active) {
            if !campaign.schedule.is_some_and(|w| w.has_ended(now)) {
                continue;
            }
            match self.close(
                campaign.id,
                LifecycleAction::Complete,
                Actor::Scheduler,
                Some("schedule window ended".into()),
            ) {
                Ok(_) => report.completed.push(campaign.id),
                Err(e) => warn!(campaign_id = %campaign.id, error = %e, "Scheduled completion refused"),
            }
        }

        report
    }

    fn authorize(&self, token: &IdentityToken, campaign_id: Uuid) -> CampaignResult<()> {
        let campaign = self.registry.get(&campaign_id)?;
        token.authorize(campaign.account_id)
    }

    // ─── Runs ───────────────────────────────────────────────────────────────

    /// Spawns the dispatch run. A new run waits for the previous one to drain
    /// so a quick pause/resume never sends to the same lead twice.
    fn start_run(self: &Arc<Self>, campaign_id: Uuid) {
        let engine = self.clone();
        let started = self.registry.start_run(&campaign_id, |previous| {
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            if let Some(previous) = &previous {
                previous.cancel.cancel();
            }

            let handle = tokio::spawn(async move {
                if let Some(previous) = previous {
                    if let Err(e) = previous.handle.await {
                        error!(campaign_id = %campaign_id, error = %e, "Previous campaign run panicked");
                    }
                }
                match engine.run_campaign(campaign_id, token).await {
                    Ok(dispatched) => info!(campaign_id = %campaign_id, dispatched, "Campaign run finished"),
                    Err(CampaignError::ScanCancelled) => {
                        info!(campaign_id = %campaign_id, "Campaign run cancelled during segmentation")
                    }
                    Err(e) => error!(campaign_id = %campaign_id, error = %e, "Campaign run failed"),
                }
            });
            CampaignRun { cancel, handle }
        });
        if let Err(e) = started {
            warn!(campaign_id = %campaign_id, error = %e, "Campaign run not started");
        }
    }

    async fn run_campaign(&self, campaign_id: Uuid, cancel: CancellationToken) -> CampaignResult<usize> {
        let campaign = self.registry.get(&campaign_id)?;
        let state = self.registry.subscribe(&campaign_id)?;
        if !state.borrow().can_dispatch() {
            return Ok(0);
        }

        let targets = self
            .resolver
            .resolve(&campaign.rule, self.leads.as_ref(), &cancel)
            .await?;
        let already = self.registry.dispatched(&campaign_id);
        // Only the campaign's own account is ever contacted.
        let leads: Vec<Lead> = targets
            .into_iter()
            .filter(|id| !already.contains(id))
            .filter_map(|id| self.leads.get(&id))
            .filter(|lead| lead.account_id == campaign.account_id)
            .collect();
        info!(
            campaign_id = %campaign_id,
            targets = leads.len(),
            skipped = already.len(),
            "Campaign segment resolved"
        );

        let mut outcomes = self
            .dispatchers
            .for_channel(campaign.channel())
            .dispatch(campaign, leads, state)?;

        let mut dispatched = 0usize;
        while let Some(outcome) = outcomes.next().await {
            self.registry.mark_dispatched(&campaign_id, outcome.lead_id);
            dispatched += 1;
            match self.ingestor.ingest(outcome.event) {
                IngestOutcome::Accepted(_) => {}
                other => warn!(
                    campaign_id = %campaign_id,
                    lead_id = %outcome.lead_id,
                    status = other.status(),
                    "Dispatch outcome not recorded"
                ),
            }
        }
        Ok(dispatched)
    }

    /// Waits until the campaign's current run (if any) has finished.
    pub async fn wait_for_run(&self, campaign_id: Uuid) {
        if let Some(run) = self.registry.take_run(&campaign_id) {
            if let Err(e) = run.handle.await {
                error!(campaign_id = %campaign_id, error = %e, "Campaign run panicked");
            }
        }
    }

    // ─── Events & reads ─────────────────────────────────────────────────────

    pub fn ingest(&self, raw: RawEvent) -> IngestOutcome {
        self.ingestor.ingest(raw)
    }

    pub fn release_expired(&self, now: DateTime<Utc>) -> usize {
        self.ingestor.release_expired(now)
    }

    pub fn campaign(&self, token: &IdentityToken, campaign_id: Uuid) -> CampaignResult<Campaign> {
        let campaign = self.registry.get(&campaign_id)?;
        token.authorize(campaign.account_id)?;
        Ok(campaign)
    }

    pub fn state(&self, campaign_id: Uuid) -> CampaignResult<LifecycleState> {
        self.registry.state(&campaign_id)
    }

    pub fn history(&self, token: &IdentityToken, campaign_id: Uuid) -> CampaignResult<Vec<TransitionRecord>> {
        self.authorize(token, campaign_id)?;
        self.registry.history(&campaign_id)
    }

    pub fn lead(&self, lead_id: Uuid) -> CampaignResult<Lead> {
        self.leads
            .get(&lead_id)
            .ok_or_else(|| CampaignError::unknown_lead(lead_id))
    }

    pub fn lead_history(&self, lead_id: Uuid) -> Vec<Event> {
        self.ingestor.lead_history(lead_id)
    }

    pub fn campaign_events(&self, campaign_id: Uuid) -> Vec<Event> {
        self.ingestor.campaign_events(campaign_id)
    }

    pub fn snapshot(&self, scope: SnapshotScope, range: TimeRange) -> CampaignResult<AnalyticsSnapshot> {
        if let SnapshotScope::Campaign(id) = scope {
            self.registry.get(&id)?;
        }
        Ok(self.analytics.snapshot(scope, range))
    }

    pub fn research(&self, user_id: Uuid, range: TimeRange) -> ResearchStats {
        self.analytics.research(user_id, range)
    }

    /// Replays the whole event log into the aggregator.
    pub fn rebuild_analytics(&self) -> usize {
        self.analytics.rebuild(|| self.ingestor.events())
    }

    pub fn registry(&self) -> &CampaignRegistry {
        &self.registry
    }

    pub fn leads(&self) -> &LeadStore {
        &self.leads
    }
}

fn validate_window(window: &ScheduleWindow) -> CampaignResult<()> {
    match window.ends_at {
        Some(end) if end <= window.starts_at => Err(CampaignError::Validation(
            "schedule window must end after it starts".into(),
        )),
        _ => Ok(()),
    }
}
