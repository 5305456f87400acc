use axum::{extract::State, http::StatusCode, Json};

use crate::error::{AppError, Result};
use crate::notification::{BrokerError, DeliveryReport, DomainEvent};
use crate::server::AppState;

/// POST /api/v1/events - publish a domain event `{type, channel?, data}`
pub async fn publish_event(
    State(state): State<AppState>,
    Json(event): Json<DomainEvent>,
) -> Result<(StatusCode, Json<DeliveryReport>)> {
    let report = state.broker.publish(&event).map_err(|e| match e {
        BrokerError::InvalidChannel(_) | BrokerError::InvalidEvent(_) => {
            AppError::Validation(e.to_string())
        }
        BrokerError::Connection(e) => AppError::Internal(e.to_string()),
    })?;

    Ok((StatusCode::ACCEPTED, Json(report)))
}
