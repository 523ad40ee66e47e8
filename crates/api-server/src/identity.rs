//! Request identity resolved by the upstream identity service and forwarded
//! as headers.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use campaign_core::{CampaignError, IdentityToken};
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_HEADER: &str = "x-user-id";
pub const ACCOUNT_HEADER: &str = "x-account-id";
pub const TEAM_HEADER: &str = "x-team-id";

/// Extracts an `IdentityToken`; requests without one are rejected with 401.
pub struct Identity(pub IdentityToken);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = required(parts, USER_HEADER)?;
        let account_id = required(parts, ACCOUNT_HEADER)?;
        let mut token = IdentityToken::new(user_id, account_id);
        if let Some(team_id) = optional(parts, TEAM_HEADER)? {
            token = token.with_team(team_id);
        }
        Ok(Identity(token))
    }
}

fn optional(parts: &Parts, name: &str) -> Result<Option<Uuid>, ApiError> {
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .map(Some)
        .ok_or_else(|| ApiError(CampaignError::Unauthorized(format!("malformed {name} header"))))
}

fn required(parts: &Parts, name: &str) -> Result<Uuid, ApiError> {
    optional(parts, name)?
        .ok_or_else(|| ApiError(CampaignError::Unauthorized(format!("missing {name} header"))))
}
