//! `POST /publish`: decode, publish, wait for the broker's message id.

use super::server::AppState;
use crate::http::{GatewayError, decode_message, publish_success_body};
use axum::{body::Bytes, extract::State};
use log::{error, info, warn};
use relay::{BrokerClient, MessageId, RelayError};

/// Publish one request body to the relay topic.
///
/// Decoding happens before any broker call, so a rejected body never reaches
/// the broker. The broker confirmation is awaited for at most
/// `publish_timeout`; there is no retry.
pub async fn publish(app_state: &AppState, body: &[u8]) -> Result<MessageId, GatewayError> {
    let message = decode_message(body).inspect_err(|e| {
        warn!("Invalid request payload: {e}");
    })?;

    let topic = &app_state.topic;
    let timeout = app_state.settings.publish_timeout;
    let submitted = app_state
        .connection
        .client()
        .publish(topic, message.into_payload());

    match tokio::time::timeout(timeout, submitted).await {
        Ok(Ok(message_id)) => Ok(message_id),
        Ok(Err(e)) => Err(RelayError::Publish {
            topic: topic.name().to_string(),
            reason: e.to_string(),
        }
        .into()),
        Err(_) => Err(RelayError::publish_timeout(topic.name(), timeout).into()),
    }
}

#[tracing::instrument(level = "debug", skip(app_state, body), fields(bytes = body.len()))]
pub async fn publish_message(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<String, GatewayError> {
    match publish(&app_state, &body).await {
        Ok(message_id) => {
            info!("Published message with ID: {message_id}");
            Ok(publish_success_body(message_id.as_str()))
        }
        Err(e) => {
            if let GatewayError::Publish(cause) = &e {
                error!("Failed to publish message: {cause}");
            }
            Err(e)
        }
    }
}
