use clap::Parser;
use log::{error, info};
use relay::config::BrokerArgs;
use relay::{ConsumerSettings, LoggingHandler, RelayContext, RelayError, telemetry};
use relay_http::{GatewaySettings, RelaySettings, run_relay};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "relay",
    version,
    about = "Publish HTTP payloads to a Pub/Sub topic and consume its subscription"
)]
struct Args {
    #[command(flatten)]
    broker: BrokerArgs,

    /// HTTP bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Maximum deliveries handled at once
    #[arg(long, default_value_t = 64)]
    max_outstanding: usize,

    /// Maximum deliveries requested per pull
    #[arg(long, default_value_t = 10)]
    max_messages: usize,

    /// Consecutive pull failures tolerated before exiting
    #[arg(long, default_value_t = 5)]
    max_pull_failures: u32,

    /// Seconds a publish may wait for broker confirmation
    #[arg(long, default_value_t = 10)]
    publish_timeout_secs: u64,
}

impl Args {
    fn settings(&self) -> RelaySettings {
        RelaySettings {
            gateway: GatewaySettings {
                publish_timeout: Duration::from_secs(self.publish_timeout_secs),
            },
            consumer: ConsumerSettings {
                max_messages: self.max_messages,
                max_outstanding: self.max_outstanding,
                max_pull_failures: self.max_pull_failures,
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), RelayError> {
    let context = RelayContext::bootstrap(&args.broker.to_config()).await?;

    let listener = match TcpListener::bind(&args.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = context.connection.close().await;
            return Err(RelayError::server(
                "gateway",
                format!("failed to bind to address {}: {e}", args.addr),
            ));
        }
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    run_relay(
        context,
        listener,
        args.settings(),
        Arc::new(LoggingHandler),
        cancel,
    )
    .await?;
    Ok(())
}
