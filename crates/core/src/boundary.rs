//! Interfaces to the collaborators outside the engine: the identity
//! subsystem, the account settings gate, and campaign lookup.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::FeatureConfig;
use crate::error::{CampaignError, CampaignResult};
use crate::types::Campaign;

/// Opaque identity resolved by the external identity subsystem. The engine
/// never inspects credentials, it only records who acted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityToken {
    pub user_id: Uuid,
    pub account_id: Uuid,
    #[serde(default)]
    pub team_id: Option<Uuid>,
}

impl IdentityToken {
    pub fn new(user_id: Uuid, account_id: Uuid) -> Self {
        Self {
            user_id,
            account_id,
            team_id: None,
        }
    }

    pub fn with_team(mut self, team_id: Uuid) -> Self {
        self.team_id = Some(team_id);
        self
    }

    /// Fails when the token does not belong to `account_id`.
    pub fn authorize(&self, account_id: Uuid) -> CampaignResult<()> {
        if self.account_id == account_id {
            Ok(())
        } else {
            Err(CampaignError::Unauthorized(format!(
                "user {} cannot act on account {}",
                self.user_id, account_id
            )))
        }
    }

    /// Fails unless the token was issued to `user_id` itself.
    pub fn authorize_user(&self, user_id: Uuid) -> CampaignResult<()> {
        if self.user_id == user_id {
            Ok(())
        } else {
            Err(CampaignError::Unauthorized(format!(
                "user {} cannot read data of user {}",
                self.user_id, user_id
            )))
        }
    }
}

/// Account-level switch consulted before a campaign may start dispatching.
pub trait FeatureGate: Send + Sync {
    fn dispatch_enabled(&self, account_id: Uuid) -> bool;

    fn require_dispatch(&self, account_id: Uuid) -> CampaignResult<()> {
        if self.dispatch_enabled(account_id) {
            Ok(())
        } else {
            Err(CampaignError::FeatureDisabled { account_id })
        }
    }
}

/// Feature gate backed by configuration with runtime per-account overrides.
pub struct ConfigFeatureGate {
    default_enabled: bool,
    overrides: DashMap<Uuid, bool>,
}

impl ConfigFeatureGate {
    pub fn new(config: &FeatureConfig) -> Self {
        let overrides = DashMap::new();
        for account in &config.disabled_accounts {
            overrides.insert(*account, false);
        }
        for account in &config.enabled_accounts {
            overrides.insert(*account, true);
        }
        info!(
            default_enabled = config.dispatch_enabled,
            overrides = overrides.len(),
            "Feature gate initialized"
        );
        Self {
            default_enabled: config.dispatch_enabled,
            overrides,
        }
    }

    pub fn set_account(&self, account_id: Uuid, enabled: bool) {
        info!(account_id = %account_id, enabled, "Dispatch gate override set");
        self.overrides.insert(account_id, enabled);
    }

    pub fn clear_account(&self, account_id: &Uuid) {
        self.overrides.remove(account_id);
    }
}

impl Default for ConfigFeatureGate {
    fn default() -> Self {
        Self::new(&FeatureConfig::default())
    }
}

impl FeatureGate for ConfigFeatureGate {
    fn dispatch_enabled(&self, account_id: Uuid) -> bool {
        self.overrides
            .get(&account_id)
            .map(|v| *v)
            .unwrap_or(self.default_enabled)
    }
}

/// Read access to campaigns for components that must validate references.
pub trait CampaignDirectory: Send + Sync {
    fn campaign(&self, id: &Uuid) -> Option<Campaign>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_overrides() {
        let blocked = Uuid::new_v4();
        let gate = ConfigFeatureGate::new(&FeatureConfig {
            dispatch_enabled: true,
            disabled_accounts: vec![blocked],
            enabled_accounts: Vec::new(),
        });

        assert!(gate.dispatch_enabled(Uuid::new_v4()));
        assert!(!gate.dispatch_enabled(blocked));
        assert!(matches!(
            gate.require_dispatch(blocked),
            Err(CampaignError::FeatureDisabled { account_id }) if account_id == blocked
        ));

        gate.set_account(blocked, true);
        assert!(gate.require_dispatch(blocked).is_ok());
    }

    #[test]
    fn test_identity_authorize() {
        let account = Uuid::new_v4();
        let token = IdentityToken::new(Uuid::new_v4(), account);
        assert!(token.authorize(account).is_ok());
        assert!(matches!(
            token.authorize(Uuid::new_v4()),
            Err(CampaignError::Unauthorized(_))
        ));

        assert!(token.authorize_user(token.user_id).is_ok());
        assert!(matches!(
            token.authorize_user(Uuid::new_v4()),
            Err(CampaignError::Unauthorized(_))
        ));
    }
}
