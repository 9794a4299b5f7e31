//! Runs the publish gateway and the consume loop side by side.

use crate::http::{GatewaySettings, create_app_state, serve};
use log::{error, info};
use relay::{
    ConsumeLoop, ConsumeStats, ConsumerSettings, DeliveryHandler, RelayContext, RelayError,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelaySettings {
    pub gateway: GatewaySettings,
    pub consumer: ConsumerSettings,
}

/// Serve `POST /publish` on `listener` and consume the context's
/// subscription until `cancel` fires or either side fails.
///
/// Whichever task ends first cancels the other. Both are awaited, the broker
/// connection is closed, and the first fatal error (if any) is returned.
pub async fn run_relay<H: DeliveryHandler>(
    context: RelayContext,
    listener: TcpListener,
    settings: RelaySettings,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> Result<ConsumeStats, RelayError> {
    let RelayContext {
        connection,
        topic,
        subscription,
    } = context;

    let app_state = create_app_state(connection.clone(), topic, settings.gateway);
    let gateway = serve(listener, app_state, cancel.clone());
    let consumer = ConsumeLoop::new(connection.clone(), subscription, settings.consumer)
        .run(handler, cancel.clone());

    let outcome = supervise(gateway, consumer, cancel).await;

    if let Err(e) = connection.close().await {
        error!("Failed to close broker connection: {e}");
    }
    if outcome.is_ok() {
        info!("Relay stopped");
    }
    outcome
}

/// Run both halves as tasks; whichever ends first cancels the other.
///
/// Both are awaited. An error from the half that ended first wins, then any
/// error from the other.
async fn supervise<G, C, T>(
    gateway: G,
    consumer: C,
    cancel: CancellationToken,
) -> Result<T, RelayError>
where
    G: Future<Output = Result<(), RelayError>> + Send + 'static,
    C: Future<Output = Result<T, RelayError>> + Send + 'static,
    T: Clone + Send + 'static,
{
    let gateway_cancel = cancel.clone();
    let mut gateway = tokio::spawn(async move {
        let result = gateway.await;
        gateway_cancel.cancel();
        result
    });

    let consumer_cancel = cancel;
    let mut consumer = tokio::spawn(async move {
        let result = consumer.await;
        consumer_cancel.cancel();
        result
    });

    let (first, gateway_result, consumer_result) = tokio::select! {
        result = &mut gateway => {
            let gateway_result = flatten(result, "gateway task");
            (gateway_result.clone().err(), gateway_result, flatten(consumer.await, "consumer task"))
        }
        result = &mut consumer => {
            let consumer_result = flatten(result, "consumer task");
            (consumer_result.clone().err(), flatten(gateway.await, "gateway task"), consumer_result)
        }
    };

    if let Some(e) = first {
        return Err(e);
    }
    gateway_result?;
    consumer_result
}

fn flatten<T>(
    joined: Result<Result<T, RelayError>, tokio::task::JoinError>,
    context: &str,
) -> Result<T, RelayError> {
    joined.map_err(|e| RelayError::server(context, e))?
}
