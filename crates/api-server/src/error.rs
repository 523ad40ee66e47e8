//! Maps engine errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campaign_core::CampaignError;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub CampaignError);

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &CampaignError) -> StatusCode {
    match err {
        CampaignError::InvalidTransition { .. } => StatusCode::CONFLICT,
        CampaignError::FeatureDisabled { .. } => StatusCode::FORBIDDEN,
        CampaignError::Segmentation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CampaignError::Referential(_) => StatusCode::NOT_FOUND,
        CampaignError::Validation(_) => StatusCode::BAD_REQUEST,
        CampaignError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        CampaignError::ScanCancelled
        | CampaignError::TransientDispatch(_)
        | CampaignError::PermanentDispatch(_)
        | CampaignError::Config(_)
        | CampaignError::Serialization(_)
        | CampaignError::Io(_)
        | CampaignError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let code = self.0.code();
        metrics::counter!("api.errors", "code" => code).increment(1);

        let message = if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            "Internal processing error".to_string()
        } else {
            warn!(code, error = %self.0, "Request rejected");
            self.0.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}
