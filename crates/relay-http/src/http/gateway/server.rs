//! Publish gateway server

use super::routes::create_router;
use log::info;
use relay::{Connection, RelayError, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    /// Longest a request waits for the broker to confirm a publish.
    pub publish_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

pub type AppState = Arc<AppStateInner>;

/// Shared by every request; the broker client is safe to publish through
/// concurrently, so there is no lock here.
pub struct AppStateInner {
    pub connection: Connection,
    pub topic: Topic,
    pub settings: GatewaySettings,
}

pub fn create_app_state(connection: Connection, topic: Topic, settings: GatewaySettings) -> AppState {
    Arc::new(AppStateInner {
        connection,
        topic,
        settings,
    })
}

/// Serve until `cancel` fires, then stop accepting and finish open requests.
pub async fn serve(
    listener: TcpListener,
    app_state: AppState,
    cancel: CancellationToken,
) -> Result<(), RelayError> {
    let app = create_router(app_state);
    let address = listener
        .local_addr()
        .map_err(|e| RelayError::server("gateway", format!("failed to read local address: {e}")))?;

    info!("Publish gateway listening on http://{address}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| RelayError::server("gateway", e))?;
    info!("Publish gateway stopped");
    Ok(())
}
