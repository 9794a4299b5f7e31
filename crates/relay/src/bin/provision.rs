use clap::Parser;
use relay::config::BrokerArgs;
use relay::provision::provision_resources;
use relay::{RelayError, telemetry};
use std::process::ExitCode;
use tracing::error;

#[derive(Parser, Debug)]
#[command(
    name = "provision",
    version,
    about = "Create the relay's topic and subscription if they do not exist"
)]
struct Args {
    #[command(flatten)]
    broker: BrokerArgs,
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
    let report = provision_resources(&args.broker.to_config()).await?;
    println!("{report}");
    Ok(())
}
