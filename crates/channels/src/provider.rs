//! Provider seam: what a channel send looks like on the wire, and the trait
//! concrete delivery providers implement.

use async_trait::async_trait;
use campaign_core::types::{Campaign, CampaignContent, Channel, Lead};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Channel-specific, fully personalized send payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum SendPayload {
    Call {
        to: String,
        caller_id: String,
        script: String,
        max_duration_secs: u32,
    },
    Social {
        platform: String,
        handle: String,
        message: String,
        media_urls: Vec<String>,
    },
    Text {
        to: String,
        sender_id: String,
        body: String,
    },
    Email {
        to: String,
        from: String,
        subject: String,
        body_html: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    pub channel: Channel,
    /// Shared by every retry of this send.
    pub idempotency_key: String,
    pub payload: SendPayload,
    /// 1-based attempt number, set by the dispatcher.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub provider_message_id: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError>;
}

/// Builds the send for one lead. Missing or malformed contact addresses are
/// permanent failures: retrying cannot fix them.
pub fn build_send_request(
    campaign: &Campaign,
    lead: &Lead,
    idempotency_key: String,
) -> CampaignResult<SendRequest> {
    let payload = match &campaign.content {
        CampaignContent::Call {
            script,
            caller_id,
            max_duration_secs,
        } => SendPayload::Call {
            to: phone_of(lead)?,
            caller_id: caller_id.clone(),
            script: personalize(script, lead),
            max_duration_secs: *max_duration_secs,
        },
        CampaignContent::Social {
            platform,
            message,
            media_urls,
        } => SendPayload::Social {
            platform: platform.clone(),
            handle: lead
                .contact
                .social_handle
                .clone()
                .filter(|h| !h.trim().is_empty())
                .ok_or_else(|| missing(lead, "social handle"))?,
            message: personalize(message, lead),
            media_urls: media_urls.clone(),
        },
        CampaignContent::Text { body, sender_id } => SendPayload::Text {
            to: phone_of(lead)?,
            sender_id: sender_id.clone(),
            body: personalize(body, lead),
        },
        CampaignContent::Email {
            subject,
            body_html,
            from_address,
        } => SendPayload::Email {
            to: email_of(lead)?,
            from: from_address.clone(),
            subject: personalize(subject, lead),
            body_html: personalize(body_html, lead),
        },
    };

    Ok(SendRequest {
        campaign_id: campaign.id,
        lead_id: lead.id,
        channel: campaign.channel(),
        idempotency_key,
        payload,
        attempt: 0,
    })
}

fn missing(lead: &Lead, what: &str) -> CampaignError {
    CampaignError::PermanentDispatch(format!("lead {} has no {what}", lead.id))
}

fn email_of(lead: &Lead) -> CampaignResult<String> {
    let email = lead
        .contact
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| missing(lead, "email address"))?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(email.to_string())
        }
        _ => Err(CampaignError::PermanentDispatch(format!(
            "lead {} has malformed email address '{email}'",
            lead.id
        ))),
    }
}

fn phone_of(lead: &Lead) -> CampaignResult<String> {
    let phone = lead
        .contact
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| missing(lead, "phone number"))?;
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    let well_formed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    if digits >= 7 && well_formed {
        Ok(phone.to_string())
    } else {
        Err(CampaignError::PermanentDispatch(format!(
            "lead {} has malformed phone number '{phone}'",
            lead.id
        )))
    }
}

/// Replaces `{{ path }}` placeholders with lead attributes. Unknown paths
/// render as empty strings; an unterminated tag is left as-is.
pub fn personalize(template: &str, lead: &Lead) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let path = after[..end].trim();
        match lead.attribute(path) {
            Some(serde_json::Value::String(s)) => out.push_str(&s),
            Some(value) => out.push_str(&value.to_string()),
            None => {}
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Provider that accepts every send and logs it. Used when no real
/// integration is configured for a channel.
pub struct LoggingProvider {
    name: String,
}

impl LoggingProvider {
    pub fn new(channel: Channel) -> Self {
        Self {
            name: format!("logging-{}", channel.as_str()),
        }
    }
}

#[async_trait]
impl ChannelProvider for LoggingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError> {
        debug!(
            provider = %self.name,
            campaign_id = %request.campaign_id,
            lead_id = %request.lead_id,
            key = %request.idempotency_key,
            attempt = request.attempt,
            "Send accepted"
        );
        Ok(ProviderReceipt {
            provider_message_id: format!("{}-{}", self.name, Uuid::new_v4()),
            accepted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::rules::{ComparisonOperator, SegmentationRule};
    use campaign_core::types::LifecycleState;
    use serde_json::json;

    fn campaign(content: CampaignContent) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            name: "q3 outreach".into(),
            content,
            rule: SegmentationRule::attribute("company.size", ComparisonOperator::IsSet, json!(null)),
            state: LifecycleState::Active,
            schedule: None,
            created_at: now,
            updated_at: now,
            archived_at: None,
        }
    }

    fn email_campaign() -> Campaign {
        campaign(CampaignContent::Email {
            subject: "Hi {{ profile.first_name }}".into(),
            body_html: "<p>{{company.name}} has {{ company.size }} people</p>".into(),
            from_address: "sales@example.com".into(),
        })
    }

    fn lead_with_email(email: Option<&str>) -> Lead {
        let mut lead = Lead::new(Uuid::new_v4());
        lead.contact.email = email.map(String::from);
        lead.profile.insert("first_name".into(), json!("Ada"));
        lead.company.insert("name".into(), json!("Acme"));
        lead.company.insert("size".into(), json!(120));
        lead
    }

    #[test]
    fn test_builds_personalized_email() {
        let c = email_campaign();
        let lead = lead_with_email(Some("ada@acme.io"));
        let req = build_send_request(&c, &lead, "k1".into()).unwrap();

        assert_eq!(req.channel, Channel::Email);
        assert_eq!(req.idempotency_key, "k1");
        match req.payload {
            SendPayload::Email {
                to,
                subject,
                body_html,
                ..
            } => {
                assert_eq!(to, "ada@acme.io");
                assert_eq!(subject, "Hi Ada");
                assert_eq!(body_html, "<p>Acme has 120 people</p>");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_missing_or_malformed_address_is_permanent() {
        let c = email_campaign();
        for email in [None, Some(""), Some("not-an-address"), Some("a@localhost")] {
            let err = build_send_request(&c, &lead_with_email(email), "k".into()).unwrap_err();
            assert!(matches!(err, CampaignError::PermanentDispatch(_)), "{email:?}");
        }
    }

    #[test]
    fn test_phone_validation() {
        let c = campaign(CampaignContent::Text {
            body: "hello".into(),
            sender_id: "ACME".into(),
        });
        let mut lead = Lead::new(Uuid::new_v4());
        lead.contact.phone = Some("+1 (555) 010-2030".into());
        assert!(build_send_request(&c, &lead, "k".into()).is_ok());

        lead.contact.phone = Some("12345".into());
        assert!(build_send_request(&c, &lead, "k".into()).is_err());
        lead.contact.phone = Some("call me maybe 5550102030".into());
        assert!(build_send_request(&c, &lead, "k".into()).is_err());
    }

    #[test]
    fn test_personalize_edge_cases() {
        let lead = lead_with_email(None);
        assert_eq!(personalize("no tags", &lead), "no tags");
        assert_eq!(personalize("{{ profile.missing }}!", &lead), "!");
        assert_eq!(personalize("open {{ tag", &lead), "open {{ tag");
    }

    #[tokio::test]
    async fn test_logging_provider_accepts() {
        let provider = LoggingProvider::new(Channel::Email);
        let req = build_send_request(&email_campaign(), &lead_with_email(Some("a@b.co")), "k".into())
            .unwrap();
        let receipt = provider.send(&req).await.unwrap();
        assert!(receipt.provider_message_id.starts_with("logging-email-"));
        assert_eq!(provider.name(), "logging-email");
    }
}
