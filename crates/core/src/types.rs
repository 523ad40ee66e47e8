use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rules::SegmentationRule;

// ─── Lifecycle ──────────────────────────────────────────────────────────────

/// Campaign lifecycle state. Only `Active` campaigns may dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Draft,
    Scheduled,
    Active,
    Paused,
    Completed,
    Archived,
}

impl LifecycleState {
    pub fn can_dispatch(&self) -> bool {
        matches!(self, LifecycleState::Active)
    }
}

// ─── Channels ───────────────────────────────────────────────────────────────

/// Outreach channel a campaign sends over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Call,
    Social,
    Text,
    Email,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Call, Channel::Social, Channel::Text, Channel::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Call => "call",
            Channel::Social => "social",
            Channel::Text => "text",
            Channel::Email => "email",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Kind of engagement event. `Sent` and `Failed` are produced by dispatch,
/// everything else arrives through provider callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Replied,
    Bounced,
    Unsubscribed,
    Failed,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Sent,
        EventKind::Delivered,
        EventKind::Opened,
        EventKind::Clicked,
        EventKind::Replied,
        EventKind::Bounced,
        EventKind::Unsubscribed,
        EventKind::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Bounced | EventKind::Unsubscribed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Sent => "sent",
            EventKind::Delivered => "delivered",
            EventKind::Opened => "opened",
            EventKind::Clicked => "clicked",
            EventKind::Replied => "replied",
            EventKind::Bounced => "bounced",
            EventKind::Unsubscribed => "unsubscribed",
            EventKind::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lead's position in the engagement lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    #[default]
    New,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Replied,
    Bounced,
    Unsubscribed,
}

impl FunnelStage {
    /// Ordering rank for the progressive stages. Terminal stages rank above
    /// every progressive stage.
    pub fn rank(&self) -> u8 {
        match self {
            FunnelStage::New => 0,
            FunnelStage::Sent => 1,
            FunnelStage::Delivered => 2,
            FunnelStage::Opened => 3,
            FunnelStage::Clicked => 4,
            FunnelStage::Replied => 5,
            FunnelStage::Bounced | FunnelStage::Unsubscribed => 10,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FunnelStage::Bounced | FunnelStage::Unsubscribed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::New => "new",
            FunnelStage::Sent => "sent",
            FunnelStage::Delivered => "delivered",
            FunnelStage::Opened => "opened",
            FunnelStage::Clicked => "clicked",
            FunnelStage::Replied => "replied",
            FunnelStage::Bounced => "bounced",
            FunnelStage::Unsubscribed => "unsubscribed",
        }
    }
}

/// An immutable, recorded engagement event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    pub channel: Channel,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub idempotency_key: String,
    pub provider_message_id: Option<String>,
    pub detail: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl Event {
    /// Key of the dedup index: (campaign, lead, channel, kind, idempotency key).
    pub fn dedup_key(&self) -> String {
        dedup_key(
            self.campaign_id,
            self.lead_id,
            self.channel,
            self.kind,
            &self.idempotency_key,
        )
    }
}

pub fn dedup_key(
    campaign_id: Uuid,
    lead_id: Uuid,
    channel: Channel,
    kind: EventKind,
    idempotency_key: &str,
) -> String {
    format!("{campaign_id}:{lead_id}:{channel}:{kind}:{idempotency_key}")
}

/// Unvalidated event as submitted by dispatch or a provider callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    pub channel: Channel,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

/// Channel-specific campaign content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum CampaignContent {
    Call {
        script: String,
        caller_id: String,
        #[serde(default = "default_call_duration_secs")]
        max_duration_secs: u32,
    },
    Social {
        platform: String,
        message: String,
        #[serde(default)]
        media_urls: Vec<String>,
    },
    Text {
        body: String,
        sender_id: String,
    },
    Email {
        subject: String,
        body_html: String,
        from_address: String,
    },
}

fn default_call_duration_secs() -> u32 {
    300
}

impl CampaignContent {
    pub fn channel(&self) -> Channel {
        match self {
            CampaignContent::Call { .. } => Channel::Call,
            CampaignContent::Social { .. } => Channel::Social,
            CampaignContent::Text { .. } => Channel::Text,
            CampaignContent::Email { .. } => Channel::Email,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl ScheduleWindow {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.starts_at
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|end| now >= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub content: CampaignContent,
    pub rule: SegmentationRule,
    pub state: LifecycleState,
    pub schedule: Option<ScheduleWindow>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn channel(&self) -> Channel {
        self.content.channel()
    }
}

// ─── Leads ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub social_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub company: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub profile: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub stage: FunnelStage,
    /// Accepted event ids in acceptance order.
    #[serde(default)]
    pub touches: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(account_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            contact: ContactInfo::default(),
            company: serde_json::Map::new(),
            profile: serde_json::Map::new(),
            stage: FunnelStage::New,
            touches: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Resolves a dotted attribute path such as `company.size`,
    /// `profile.interests.primary`, `contact.email` or `lead.stage`.
    /// Returns `None` when any segment is missing.
    pub fn attribute(&self, path: &str) -> Option<serde_json::Value> {
        let (namespace, rest) = path.split_once('.')?;
        match namespace {
            "company" => lookup(&self.company, rest).cloned(),
            "profile" => lookup(&self.profile, rest).cloned(),
            "contact" => {
                let value = match rest {
                    "email" => self.contact.email.as_ref(),
                    "phone" => self.contact.phone.as_ref(),
                    "social_handle" => self.contact.social_handle.as_ref(),
                    _ => None,
                }?;
                Some(serde_json::Value::String(value.clone()))
            }
            "lead" => match rest {
                "stage" => Some(serde_json::Value::String(self.stage.as_str().to_string())),
                "id" => Some(serde_json::Value::String(self.id.to_string())),
                _ => None,
            },
            _ => None,
        }
    }
}

fn lookup<'a>(
    map: &'a serde_json::Map<String, serde_json::Value>,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}
