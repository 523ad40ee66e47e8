//! Campaign registry: current campaign records, their lifecycle watch
//! channels, audit history and dispatch bookkeeping.
//!
//! Each campaign has a single-writer transition lock. Readers never take it:
//! they read the watch channel, which always holds the last committed state.

use std::collections::HashSet;
use std::sync::Arc;

use campaign_core::types::{Campaign, LifecycleState};
use campaign_core::{CampaignDirectory, CampaignError, CampaignResult};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::state_machine::{self, Actor, LifecycleAction, TransitionRecord};

/// A spawned campaign run and the token that stops its segmentation scan.
pub struct CampaignRun {
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

struct CampaignEntry {
    campaign: RwLock<Campaign>,
    state: watch::Sender<LifecycleState>,
    transition_lock: Mutex<()>,
    history: Mutex<Vec<TransitionRecord>>,
    dispatched: DashSet<Uuid>,
    run: Mutex<Option<CampaignRun>>,
}

#[derive(Default)]
pub struct CampaignRegistry {
    campaigns: DashMap<Uuid, Arc<CampaignEntry>>,
}

impl CampaignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, campaign: Campaign) {
        let (state, _) = watch::channel(campaign.state);
        let entry = CampaignEntry {
            campaign: RwLock::new(campaign),
            state,
            transition_lock: Mutex::new(()),
            history: Mutex::new(Vec::new()),
            dispatched: DashSet::new(),
            run: Mutex::new(None),
        };
        let id = entry.campaign.read().id;
        self.campaigns.insert(id, Arc::new(entry));
    }

    fn entry(&self, id: &Uuid) -> CampaignResult<Arc<CampaignEntry>> {
        self.campaigns
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CampaignError::unknown_campaign(*id))
    }

    pub fn get(&self, id: &Uuid) -> CampaignResult<Campaign> {
        Ok(self.entry(id)?.campaign.read().clone())
    }

    pub fn state(&self, id: &Uuid) -> CampaignResult<LifecycleState> {
        Ok(*self.entry(id)?.state.borrow())
    }

    /// Receiver that observes every committed state change.
    pub fn subscribe(&self, id: &Uuid) -> CampaignResult<watch::Receiver<LifecycleState>> {
        Ok(self.entry(id)?.state.subscribe())
    }

    pub fn history(&self, id: &Uuid) -> CampaignResult<Vec<TransitionRecord>> {
        Ok(self.entry(id)?.history.lock().clone())
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    /// Campaigns currently in `state`, ordered by id.
    pub fn in_state(&self, state: LifecycleState) -> Vec<Campaign> {
        let mut found: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|e| *e.state.borrow() == state)
            .map(|e| e.campaign.read().clone())
            .collect();
        found.sort_by_key(|c| c.id);
        found
    }

    pub fn owned_by(&self, owner_id: Uuid) -> Vec<Campaign> {
        let mut found: Vec<Campaign> = self
            .campaigns
            .iter()
            .map(|e| e.campaign.read().clone())
            .filter(|c| c.owner_id == owner_id)
            .collect();
        found.sort_by_key(|c| c.created_at);
        found
    }

    /// Applies `action` under the campaign's transition lock.
    ///
    /// `prepare` runs against a working copy of the campaign before commit.
    /// It may edit the copy (e.g. set a schedule) and may veto the transition
    /// by returning an error, in which case nothing changes.
    pub fn transition(
        &self,
        id: &Uuid,
        action: LifecycleAction,
        actor: Actor,
        reason: Option<String>,
        prepare: impl FnOnce(&mut Campaign) -> CampaignResult<()>,
    ) -> CampaignResult<TransitionRecord> {
        let entry = self.entry(id)?;
        let _guard = entry.transition_lock.lock();

        let from = *entry.state.borrow();
        let to = state_machine::resolve(from, action)?;

        let mut draft = entry.campaign.read().clone();
        prepare(&mut draft)?;

        let now = Utc::now();
        draft.state = to;
        draft.updated_at = now;
        if to == LifecycleState::Archived {
            draft.archived_at = Some(now);
        }
        *entry.campaign.write() = draft;
        entry.state.send_replace(to);

        let record = TransitionRecord {
            id: Uuid::new_v4(),
            campaign_id: *id,
            from,
            to,
            action,
            actor,
            reason,
            at: now,
        };
        entry.history.lock().push(record.clone());

        info!(
            event = action.audit_event(),
            campaign_id = %id,
            from = ?from,
            to = ?to,
            actor = %actor,
            reason = record.reason.as_deref().unwrap_or(""),
            "Campaign lifecycle transition"
        );
        metrics::counter!("lifecycle.transitions", "event" => action.audit_event()).increment(1);
        Ok(record)
    }

    // ─── Dispatch bookkeeping ───────────────────────────────────────────────

    pub fn mark_dispatched(&self, id: &Uuid, lead_id: Uuid) {
        if let Ok(entry) = self.entry(id) {
            entry.dispatched.insert(lead_id);
        }
    }

    pub fn dispatched(&self, id: &Uuid) -> HashSet<Uuid> {
        self.entry(id)
            .map(|e| e.dispatched.iter().map(|l| *l).collect())
            .unwrap_or_default()
    }

    /// Installs a new run built from the previous one, under a single hold of
    /// the run slot. Concurrent starts therefore chain: each new run sees
    /// exactly the run it supersedes.
    pub fn start_run(
        &self,
        id: &Uuid,
        start: impl FnOnce(Option<CampaignRun>) -> CampaignRun,
    ) -> CampaignResult<()> {
        let entry = self.entry(id)?;
        let mut slot = entry.run.lock();
        let previous = slot.take();
        *slot = Some(start(previous));
        Ok(())
    }

    pub fn take_run(&self, id: &Uuid) -> Option<CampaignRun> {
        self.entry(id).ok()?.run.lock().take()
    }

    /// Cancels the current run's segmentation scan. The run itself keeps
    /// draining sends that were already admitted.
    pub fn cancel_run(&self, id: &Uuid) {
        if let Ok(entry) = self.entry(id) {
            if let Some(run) = entry.run.lock().as_ref() {
                run.cancel.cancel();
            }
        }
    }
}

impl CampaignDirectory for CampaignRegistry {
    fn campaign(&self, id: &Uuid) -> Option<Campaign> {
        self.get(id).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::rules::{ComparisonOperator, SegmentationRule};
    use campaign_core::types::CampaignContent;
    use serde_json::json;

    fn campaign() -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            name: "reactivation".into(),
            content: CampaignContent::Text {
                body: "hi".into(),
                sender_id: "ACME".into(),
            },
            rule: SegmentationRule::attribute("company.size", ComparisonOperator::IsSet, json!(null)),
            state: LifecycleState::Draft,
            schedule: None,
            created_at: now,
            updated_at: now,
            archived_at: None,
        }
    }

    #[test]
    fn test_transition_commits_and_notifies() {
        let registry = CampaignRegistry::new();
        let c = campaign();
        let id = c.id;
        registry.insert(c);
        let mut rx = registry.subscribe(&id).unwrap();

        let record = registry
            .transition(&id, LifecycleAction::Schedule, Actor::Scheduler, Some("q3".into()), |_| Ok(()))
            .unwrap();

        assert_eq!(record.from, LifecycleState::Draft);
        assert_eq!(record.to, LifecycleState::Scheduled);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), LifecycleState::Scheduled);
        assert_eq!(registry.get(&id).unwrap().state, LifecycleState::Scheduled);
        assert_eq!(registry.history(&id).unwrap(), vec![record]);
    }

    #[test]
    fn test_vetoed_transition_changes_nothing() {
        let registry = CampaignRegistry::new();
        let c = campaign();
        let id = c.id;
        registry.insert(c);

        let err = registry
            .transition(&id, LifecycleAction::Schedule, Actor::Scheduler, None, |draft| {
                draft.name = "changed".into();
                Err(CampaignError::Validation("no schedule".into()))
            })
            .unwrap_err();

        assert!(matches!(err, CampaignError::Validation(_)));
        assert_eq!(registry.state(&id).unwrap(), LifecycleState::Draft);
        assert_eq!(registry.get(&id).unwrap().name, "reactivation");
        assert!(registry.history(&id).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_transition_and_unknown_campaign() {
        let registry = CampaignRegistry::new();
        let c = campaign();
        let id = c.id;
        registry.insert(c);

        let err = registry
            .transition(&id, LifecycleAction::Pause, Actor::Scheduler, None, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, CampaignError::InvalidTransition { .. }));

        let missing = Uuid::new_v4();
        assert!(matches!(registry.get(&missing), Err(CampaignError::Referential(_))));
        assert!(registry.campaign(&missing).is_none());
    }

    #[test]
    fn test_dispatched_set_and_state_listing() {
        let registry = CampaignRegistry::new();
        let c = campaign();
        let id = c.id;
        registry.insert(c);
        registry.insert(campaign());

        let lead = Uuid::new_v4();
        registry.mark_dispatched(&id, lead);
        registry.mark_dispatched(&id, lead);
        assert_eq!(registry.dispatched(&id).len(), 1);
        assert_eq!(registry.in_state(LifecycleState::Draft).len(), 2);
        assert!(registry.in_state(LifecycleState::Active).is_empty());
    }

    #[tokio::test]
    async fn test_start_run_hands_over_previous_run() {
        let registry = CampaignRegistry::new();
        let c = campaign();
        let id = c.id;
        registry.insert(c);

        let first = CancellationToken::new();
        registry
            .start_run(&id, |previous| {
                assert!(previous.is_none());
                CampaignRun {
                    cancel: first.clone(),
                    handle: tokio::spawn(async {}),
                }
            })
            .unwrap();

        registry
            .start_run(&id, |previous| {
                let previous = previous.expect("first run handed over");
                previous.cancel.cancel();
                CampaignRun {
                    cancel: CancellationToken::new(),
                    handle: tokio::spawn(async move {
                        previous.handle.await.unwrap();
                    }),
                }
            })
            .unwrap();
        assert!(first.is_cancelled());

        let current = registry.take_run(&id).expect("second run installed");
        assert!(!current.cancel.is_cancelled());
        current.handle.await.unwrap();
        assert!(registry.take_run(&id).is_none());

        let missing = registry.start_run(&Uuid::new_v4(), |_| unreachable!());
        assert!(matches!(missing, Err(CampaignError::Referential(_))));
    }
}
