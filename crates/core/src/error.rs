use thiserror::Error;
use uuid::Uuid;

use crate::types::LifecycleState;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Invalid transition: cannot move campaign from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Campaign dispatch is disabled for account {account_id}")]
    FeatureDisabled { account_id: Uuid },

    #[error("Segmentation error: {0}")]
    Segmentation(String),

    #[error("Segmentation scan cancelled")]
    ScanCancelled,

    #[error("Transient dispatch failure: {0}")]
    TransientDispatch(String),

    #[error("Permanent dispatch failure: {0}")]
    PermanentDispatch(String),

    #[error("Referential error: {0}")]
    Referential(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    pub fn unknown_campaign(id: Uuid) -> Self {
        Self::Referential(format!("campaign {id} not found"))
    }

    pub fn unknown_lead(id: Uuid) -> Self {
        Self::Referential(format!("lead {id} not found"))
    }

    /// Stable machine-readable code used by the HTTP layer and in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::FeatureDisabled { .. } => "feature_disabled",
            Self::Segmentation(_) => "segmentation_error",
            Self::ScanCancelled => "scan_cancelled",
            Self::TransientDispatch(_) => "transient_dispatch_failure",
            Self::PermanentDispatch(_) => "permanent_dispatch_failure",
            Self::Referential(_) => "referential_error",
            Self::Validation(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }
}
