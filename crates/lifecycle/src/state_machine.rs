//! Campaign lifecycle transitions.
//!
//! `draft → scheduled → active → {paused, completed} → archived`. The table
//! below is the complete set of permitted moves; anything else is an
//! `InvalidTransition`.

use campaign_core::types::LifecycleState;
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// Draft -> Scheduled
    Schedule,
    /// Scheduled -> Active
    Activate,
    /// Active -> Paused
    Pause,
    /// Paused -> Active
    Resume,
    /// Active -> Completed
    Complete,
    /// Completed | Active | Paused -> Archived
    Archive,
}

impl LifecycleAction {
    pub fn target(&self) -> LifecycleState {
        match self {
            LifecycleAction::Schedule => LifecycleState::Scheduled,
            LifecycleAction::Activate | LifecycleAction::Resume => LifecycleState::Active,
            LifecycleAction::Pause => LifecycleState::Paused,
            LifecycleAction::Complete => LifecycleState::Completed,
            LifecycleAction::Archive => LifecycleState::Archived,
        }
    }

    /// Audit event name written to the log for this action.
    pub fn audit_event(&self) -> &'static str {
        match self {
            LifecycleAction::Schedule => "campaign_scheduled",
            LifecycleAction::Activate => "campaign_started",
            LifecycleAction::Pause => "campaign_paused",
            LifecycleAction::Resume => "campaign_resumed",
            LifecycleAction::Complete => "campaign_completed",
            LifecycleAction::Archive => "campaign_archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LifecycleState,
    pub action: LifecycleAction,
    pub to: LifecycleState,
}

const fn t(from: LifecycleState, action: LifecycleAction, to: LifecycleState) -> Transition {
    Transition { from, action, to }
}

pub const TRANSITIONS: [Transition; 8] = [
    t(LifecycleState::Draft, LifecycleAction::Schedule, LifecycleState::Scheduled),
    t(LifecycleState::Scheduled, LifecycleAction::Activate, LifecycleState::Active),
    t(LifecycleState::Active, LifecycleAction::Pause, LifecycleState::Paused),
    t(LifecycleState::Paused, LifecycleAction::Resume, LifecycleState::Active),
    t(LifecycleState::Active, LifecycleAction::Complete, LifecycleState::Completed),
    t(LifecycleState::Completed, LifecycleAction::Archive, LifecycleState::Archived),
    t(LifecycleState::Active, LifecycleAction::Archive, LifecycleState::Archived),
    t(LifecycleState::Paused, LifecycleAction::Archive, LifecycleState::Archived),
];

pub fn can_transition(from: LifecycleState, to: LifecycleState) -> bool {
    TRANSITIONS.iter().any(|t| t.from == from && t.to == to)
}

/// Target state of `action` from `from`, or `InvalidTransition`.
pub fn resolve(from: LifecycleState, action: LifecycleAction) -> CampaignResult<LifecycleState> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.action == action)
        .map(|t| t.to)
        .ok_or(CampaignError::InvalidTransition {
            from,
            to: action.target(),
        })
}

/// Who requested a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(Uuid),
    Scheduler,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::Scheduler => f.write_str("scheduler"),
        }
    }
}

/// Audit entry for one committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub action: LifecycleAction,
    pub actor: Actor,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}
