//! End-to-end campaign scenarios: segment, dispatch, callbacks, analytics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campaign_analytics::{SnapshotScope, TimeRange};
use campaign_channels::{ChannelProvider, ProviderError, ProviderReceipt, ProviderSet, SendRequest};
use campaign_core::config::AppConfig;
use campaign_core::rules::{ComparisonOperator, SegmentationRule};
use campaign_core::types::{
    CampaignContent, Channel, ContactInfo, EventKind, FunnelStage, LifecycleState, RawEvent,
    ScheduleWindow,
};
use campaign_core::IdentityToken;
use campaign_events::IngestOutcome;
use campaign_lifecycle::{CampaignEngine, NewCampaign, NewLead};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

/// Fails the first `failures` sends with a transient error, then accepts.
struct FlakyProvider {
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyProvider {
    fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ChannelProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn send(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient("upstream 503".into()));
        }
        Ok(ProviderReceipt {
            provider_message_id: format!("msg-{}", request.lead_id),
            accepted_at: Utc::now(),
        })
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.dispatch.email.backoff_base_ms = 5;
    config.dispatch.email.backoff_max_ms = 20;
    config
}

fn token() -> IdentityToken {
    IdentityToken::new(Uuid::new_v4(), Uuid::new_v4())
}

fn lead_of_size(engine: &CampaignEngine, token: &IdentityToken, size: i64) -> Uuid {
    let mut company = serde_json::Map::new();
    company.insert("size".into(), json!(size));
    engine
        .create_lead(
            token,
            NewLead {
                contact: ContactInfo {
                    email: Some(format!("lead{size}@example.com")),
                    ..ContactInfo::default()
                },
                company,
                profile: serde_json::Map::new(),
            },
        )
        .id
}

fn size_campaign() -> NewCampaign {
    NewCampaign {
        name: "mid-market".into(),
        content: CampaignContent::Email {
            subject: "Scaling past 50".into(),
            body_html: "<p>Hello {{ company.size }}</p>".into(),
            from_address: "growth@example.com".into(),
        },
        rule: SegmentationRule::attribute("company.size", ComparisonOperator::GreaterThan, json!(50)),
        schedule: Some(ScheduleWindow {
            starts_at: Utc::now() - chrono::Duration::seconds(1),
            ends_at: None,
        }),
    }
}

fn callback(campaign_id: Uuid, lead_id: Uuid, kind: EventKind, key: &str) -> RawEvent {
    RawEvent {
        campaign_id,
        lead_id,
        channel: Channel::Email,
        kind,
        occurred_at: Utc::now(),
        idempotency_key: Some(key.into()),
        provider_message_id: Some(format!("msg-{lead_id}")),
        detail: None,
        attempts: 0,
    }
}

#[tokio::test]
async fn test_segment_dispatch_and_callbacks() {
    let engine = CampaignEngine::builder(config()).build();
    let token = token();
    let a = lead_of_size(&engine, &token, 100);
    let b = lead_of_size(&engine, &token, 10);

    let campaign = engine.create_campaign(&token, size_campaign()).unwrap();
    engine.schedule(&token, campaign.id, None, None).unwrap();
    engine.activate(&token, campaign.id, None).unwrap();
    engine.wait_for_run(campaign.id).await;

    let events = engine.campaign_events(campaign.id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].lead_id, a);
    assert_eq!(events[0].kind, EventKind::Sent);
    assert_eq!(engine.lead(a).unwrap().stage, FunnelStage::Sent);
    assert_eq!(engine.lead(b).unwrap().stage, FunnelStage::New);

    let delivered = engine.ingest(callback(campaign.id, a, EventKind::Delivered, "dlv-1"));
    assert_eq!(delivered.status(), "accepted");
    assert_eq!(engine.lead(a).unwrap().stage, FunnelStage::Delivered);

    let duplicate = engine.ingest(callback(campaign.id, a, EventKind::Delivered, "dlv-1"));
    assert_eq!(duplicate.status(), "duplicate");
    assert_eq!(engine.lead(a).unwrap().stage, FunnelStage::Delivered);

    let snapshot = engine
        .snapshot(SnapshotScope::Campaign(campaign.id), TimeRange::all())
        .unwrap();
    assert_eq!(snapshot.count(EventKind::Sent), 1);
    assert_eq!(snapshot.count(EventKind::Delivered), 1);
    assert_eq!(snapshot.rates.delivery_rate, 1.0);
    assert_eq!(engine.lead_history(a).len(), 2);
}

#[tokio::test]
async fn test_accounts_never_see_each_others_leads() {
    let engine = CampaignEngine::builder(config()).build();
    let (acme, globex) = (token(), token());
    let own = lead_of_size(&engine, &acme, 100);
    let foreign = lead_of_size(&engine, &globex, 200);

    let campaign = engine.create_campaign(&acme, size_campaign()).unwrap();
    engine.schedule(&acme, campaign.id, None, None).unwrap();
    engine.activate(&acme, campaign.id, None).unwrap();
    engine.wait_for_run(campaign.id).await;

    let targeted: Vec<Uuid> = engine
        .campaign_events(campaign.id)
        .iter()
        .map(|e| e.lead_id)
        .collect();
    assert_eq!(targeted, vec![own]);
    assert_eq!(engine.lead(foreign).unwrap().stage, FunnelStage::New);

    match engine.ingest(callback(campaign.id, foreign, EventKind::Delivered, "dlv-x")) {
        IngestOutcome::Rejected { code, .. } => assert_eq!(code, "validation_error"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(engine.lead_history(foreign).is_empty());
}

#[tokio::test]
async fn test_transient_failure_then_success_records_one_event() {
    let provider = Arc::new(FlakyProvider::new(1));
    let engine = CampaignEngine::builder(config())
        .providers(ProviderSet::uniform(provider.clone()))
        .build();
    let token = token();
    let a = lead_of_size(&engine, &token, 500);

    let campaign = engine.create_campaign(&token, size_campaign()).unwrap();
    engine.schedule(&token, campaign.id, None, None).unwrap();
    engine.activate(&token, campaign.id, None).unwrap();
    engine.wait_for_run(campaign.id).await;

    let events = engine.campaign_events(campaign.id);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].lead_id, a);
    assert_eq!(events[0].kind, EventKind::Sent);
    assert_eq!(events[0].attempts, 2);
}

#[tokio::test]
async fn test_nothing_is_sent_before_activation() {
    let engine = CampaignEngine::builder(config()).build();
    let token = token();
    lead_of_size(&engine, &token, 100);

    let campaign = engine.create_campaign(&token, size_campaign()).unwrap();
    engine.schedule(&token, campaign.id, None, None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.state(campaign.id).unwrap(), LifecycleState::Scheduled);
    assert!(engine.campaign_events(campaign.id).is_empty());
}

#[tokio::test]
async fn test_pause_and_resume_never_resend() {
    let mut config = config();
    config.dispatch.email.max_sends = 1;
    config.dispatch.email.refill_interval_ms = 60;
    let engine = CampaignEngine::builder(config).build();
    let token = token();
    let leads: Vec<Uuid> = (0..5).map(|i| lead_of_size(&engine, &token, 100 + i)).collect();

    let campaign = engine.create_campaign(&token, size_campaign()).unwrap();
    engine.schedule(&token, campaign.id, None, None).unwrap();
    engine.activate(&token, campaign.id, None).unwrap();

    tokio::time::sleep(Duration::from_millis(90)).await;
    engine.pause(&token, campaign.id, Some("review copy".into())).unwrap();
    engine.wait_for_run(campaign.id).await;

    let sent_while_paused = engine.campaign_events(campaign.id).len();
    assert!(sent_while_paused >= 1 && sent_while_paused < leads.len());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.campaign_events(campaign.id).len(), sent_while_paused);

    engine.resume(&token, campaign.id, None).unwrap();
    engine.wait_for_run(campaign.id).await;

    let mut per_lead: HashMap<Uuid, usize> = HashMap::new();
    for event in engine.campaign_events(campaign.id) {
        assert_eq!(event.kind, EventKind::Sent);
        *per_lead.entry(event.lead_id).or_default() += 1;
    }
    assert_eq!(per_lead.len(), leads.len());
    assert!(per_lead.values().all(|n| *n == 1));

    let actions: Vec<_> = engine
        .history(&token, campaign.id)
        .unwrap()
        .iter()
        .map(|r| r.to)
        .collect();
    assert_eq!(
        actions,
        vec![
            LifecycleState::Scheduled,
            LifecycleState::Active,
            LifecycleState::Paused,
            LifecycleState::Active
        ]
    );
}

#[tokio::test]
async fn test_unsubscribed_leads_are_not_targeted_again() {
    let engine = CampaignEngine::builder(config()).build();
    let token = token();
    let a = lead_of_size(&engine, &token, 100);
    let b = lead_of_size(&engine, &token, 200);

    let first = engine.create_campaign(&token, size_campaign()).unwrap();
    engine.schedule(&token, first.id, None, None).unwrap();
    engine.activate(&token, first.id, None).unwrap();
    engine.wait_for_run(first.id).await;

    let unsub = engine.ingest(callback(first.id, b, EventKind::Unsubscribed, "unsub-b"));
    assert!(unsub.is_accepted());
    assert_eq!(engine.lead(b).unwrap().stage, FunnelStage::Unsubscribed);

    let second = engine.create_campaign(&token, size_campaign()).unwrap();
    engine.schedule(&token, second.id, None, None).unwrap();
    engine.activate(&token, second.id, None).unwrap();
    engine.wait_for_run(second.id).await;

    let targeted: Vec<Uuid> = engine
        .campaign_events(second.id)
        .iter()
        .map(|e| e.lead_id)
        .collect();
    assert_eq!(targeted, vec![a]);
}

#[tokio::test]
async fn test_analytics_rebuild_matches_live_aggregation() {
    let engine = CampaignEngine::builder(config()).build();
    let token = token();
    let leads: Vec<Uuid> = (0..4).map(|i| lead_of_size(&engine, &token, 60 + i)).collect();

    let campaign = engine.create_campaign(&token, size_campaign()).unwrap();
    engine.schedule(&token, campaign.id, None, None).unwrap();
    engine.activate(&token, campaign.id, None).unwrap();
    engine.wait_for_run(campaign.id).await;
    for (i, lead) in leads.iter().enumerate() {
        engine.ingest(callback(campaign.id, *lead, EventKind::Delivered, &format!("d{i}")));
        if i % 2 == 0 {
            engine.ingest(callback(campaign.id, *lead, EventKind::Replied, &format!("r{i}")));
        }
    }

    let live = engine.snapshot(SnapshotScope::User(token.user_id), TimeRange::all()).unwrap();
    assert_eq!(engine.rebuild_analytics(), 4 + 4 + 2);
    let rebuilt = engine.snapshot(SnapshotScope::User(token.user_id), TimeRange::all()).unwrap();
    assert_eq!(live, rebuilt);

    let research = engine.research(token.user_id, TimeRange::all());
    assert_eq!(research.campaign_count, 1);
    assert_eq!(research.channels[&Channel::Email].funnel.replied, 2);
    assert_eq!(research.best_campaign.unwrap().campaign_id, campaign.id);
}

#[tokio::test]
async fn test_archive_from_paused_and_invalid_moves() {
    let engine = CampaignEngine::builder(config()).build();
    let token = token();
    let campaign = engine.create_campaign(&token, size_campaign()).unwrap();

    assert!(engine.archive(&token, campaign.id, None).is_err());
    engine.schedule(&token, campaign.id, None, None).unwrap();
    engine.activate(&token, campaign.id, None).unwrap();
    engine.pause(&token, campaign.id, None).unwrap();
    assert!(engine.complete(&token, campaign.id, None).is_err());
    engine.archive(&token, campaign.id, Some("superseded".into())).unwrap();
    engine.wait_for_run(campaign.id).await;

    let archived = engine.campaign(&token, campaign.id).unwrap();
    assert_eq!(archived.state, LifecycleState::Archived);
    assert!(archived.archived_at.is_some());
    assert!(engine.resume(&token, campaign.id, None).is_err());
}
