//! Per-channel dispatcher: token-bucket admission, bounded parallelism,
//! retry with backoff and per-attempt timeouts.
//!
//! `dispatch` spawns an admission task and hands back a stream of outcomes.
//! Before each lead the campaign's lifecycle watch is consulted; once the
//! campaign leaves `active` nothing new is admitted and the stream ends when
//! the sends already admitted have finished.

use std::sync::Arc;
use std::time::Duration;

use campaign_core::config::ChannelLimits;
use campaign_core::idempotency::fresh_key;
use campaign_core::types::{Campaign, Channel, EventKind, Lead, LifecycleState, RawEvent};
use campaign_core::{CampaignError, CampaignResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::provider::{build_send_request, ChannelProvider, ProviderError, SendRequest};
use crate::retry::RetryPolicy;
use crate::throttle::TokenBucket;

const OUTCOME_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Sent { provider_message_id: String },
    Failed { reason: String, permanent: bool },
}

/// Result of dispatching to one lead, with the outbound event to ingest.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub lead_id: Uuid,
    pub status: DispatchStatus,
    pub attempts: u32,
    pub event: RawEvent,
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self.status, DispatchStatus::Sent { .. })
    }
}

#[derive(Clone)]
pub struct ChannelDispatcher {
    channel: Channel,
    bucket: Arc<TokenBucket>,
    in_flight: Arc<Semaphore>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    provider: Arc<dyn ChannelProvider>,
}

impl ChannelDispatcher {
    pub fn new(channel: Channel, limits: &ChannelLimits, provider: Arc<dyn ChannelProvider>) -> Self {
        info!(
            channel = %channel,
            provider = provider.name(),
            max_sends = limits.max_sends,
            refill_ms = limits.refill_interval_ms,
            max_in_flight = limits.max_in_flight,
            "Channel dispatcher initialized"
        );
        Self {
            channel,
            bucket: Arc::new(TokenBucket::from_limits(limits)),
            in_flight: Arc::new(Semaphore::new(limits.max_in_flight.max(1))),
            policy: RetryPolicy::from_limits(limits),
            attempt_timeout: limits.attempt_timeout(),
            provider,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Dispatches `campaign` to `leads` in order. Must be called from within a
    /// tokio runtime.
    pub fn dispatch(
        &self,
        campaign: Campaign,
        leads: Vec<Lead>,
        state: watch::Receiver<LifecycleState>,
    ) -> CampaignResult<ReceiverStream<DispatchOutcome>> {
        if campaign.channel() != self.channel {
            return Err(CampaignError::Validation(format!(
                "campaign {} targets {} but was routed to the {} dispatcher",
                campaign.id,
                campaign.channel(),
                self.channel
            )));
        }

        let (tx, rx) = mpsc::channel(OUTCOME_BUFFER);
        let this = self.clone();
        tokio::spawn(async move { this.admit(campaign, leads, state, tx).await });
        Ok(ReceiverStream::new(rx))
    }

    async fn admit(
        self,
        campaign: Campaign,
        leads: Vec<Lead>,
        mut state: watch::Receiver<LifecycleState>,
        tx: mpsc::Sender<DispatchOutcome>,
    ) {
        let campaign = Arc::new(campaign);
        let channel = self.channel.as_str();
        let total = leads.len();
        let mut admitted = 0usize;

        for lead in leads {
            if !is_active(&mut state) {
                break;
            }

            let key = fresh_key();
            let request = match build_send_request(&campaign, &lead, key.clone()) {
                Ok(request) => request,
                Err(e) => {
                    warn!(campaign_id = %campaign.id, lead_id = %lead.id, error = %e, "Lead not dispatchable");
                    metrics::counter!("dispatch.failed", "channel" => channel, "kind" => "permanent")
                        .increment(1);
                    let outcome = outcome_for(
                        &campaign,
                        lead.id,
                        key,
                        DispatchStatus::Failed {
                            reason: e.to_string(),
                            permanent: true,
                        },
                        0,
                    );
                    if tx.send(outcome).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let permit = tokio::select! {
                permit = self.in_flight.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = halted(&mut state) => break,
            };
            tokio::select! {
                _ = self.bucket.acquire() => {}
                _ = halted(&mut state) => break,
            }
            // The state may have flipped while the token was being granted.
            if !is_active(&mut state) {
                break;
            }

            admitted += 1;
            metrics::counter!("dispatch.admitted", "channel" => channel).increment(1);

            let this = self.clone();
            let campaign = campaign.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let lead_id = request.lead_id;
                let key = request.idempotency_key.clone();
                let (status, attempts) = this.deliver(request).await;
                let outcome = outcome_for(&campaign, lead_id, key, status, attempts);
                if tx.send(outcome).await.is_err() {
                    debug!(lead_id = %lead_id, "Outcome receiver dropped");
                }
            });
        }

        info!(
            campaign_id = %campaign.id,
            channel = channel,
            admitted,
            total,
            "Dispatch admission finished"
        );
    }

    /// Runs one send to completion. Transient failures (including timeouts)
    /// are retried with backoff; the idempotency key is shared by all attempts.
    async fn deliver(&self, mut request: SendRequest) -> (DispatchStatus, u32) {
        let channel = self.channel.as_str();
        let max_attempts = self.policy.max_attempts();
        let started = std::time::Instant::now();
        let mut attempt = 0u32;

        let status = loop {
            attempt += 1;
            request.attempt = attempt;

            let result = match tokio::time::timeout(self.attempt_timeout, self.provider.send(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Transient(format!(
                    "attempt timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };

            match result {
                Ok(receipt) => {
                    metrics::counter!("dispatch.sent", "channel" => channel).increment(1);
                    break DispatchStatus::Sent {
                        provider_message_id: receipt.provider_message_id,
                    };
                }
                Err(ProviderError::Permanent(reason)) => {
                    metrics::counter!("dispatch.failed", "channel" => channel, "kind" => "permanent")
                        .increment(1);
                    break DispatchStatus::Failed {
                        reason,
                        permanent: true,
                    };
                }
                Err(ProviderError::Transient(reason)) if attempt >= max_attempts => {
                    metrics::counter!("dispatch.failed", "channel" => channel, "kind" => "exhausted")
                        .increment(1);
                    break DispatchStatus::Failed {
                        reason: format!("retries exhausted after {attempt} attempts: {reason}"),
                        permanent: false,
                    };
                }
                Err(ProviderError::Transient(reason)) => {
                    let delay = self.policy.delay_for(attempt - 1);
                    debug!(
                        lead_id = %request.lead_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Transient send failure, retrying"
                    );
                    metrics::counter!("dispatch.retried", "channel" => channel).increment(1);
                    tokio::time::sleep(delay).await;
                }
            }
        };

        metrics::histogram!("dispatch.latency_ms", "channel" => channel)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        (status, attempt)
    }
}

fn is_active(state: &mut watch::Receiver<LifecycleState>) -> bool {
    state.borrow_and_update().can_dispatch()
}

/// Resolves once the campaign is no longer active, or its state owner is gone.
async fn halted(state: &mut watch::Receiver<LifecycleState>) {
    loop {
        if !is_active(state) {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

fn outcome_for(
    campaign: &Campaign,
    lead_id: Uuid,
    key: String,
    status: DispatchStatus,
    attempts: u32,
) -> DispatchOutcome {
    let (kind, provider_message_id, detail) = match &status {
        DispatchStatus::Sent {
            provider_message_id,
        } => (EventKind::Sent, Some(provider_message_id.clone()), None),
        DispatchStatus::Failed { reason, .. } => (EventKind::Failed, None, Some(reason.clone())),
    };
    DispatchOutcome {
        lead_id,
        event: RawEvent {
            campaign_id: campaign.id,
            lead_id,
            channel: campaign.channel(),
            kind,
            occurred_at: Utc::now(),
            idempotency_key: Some(key),
            provider_message_id,
            detail,
            attempts,
        },
        status,
        attempts,
    }
}
