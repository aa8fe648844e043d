//! price-ensemble command-line entry point

use clap::Parser;
use price_ensemble::cli::{cmd_predict, cmd_promote, cmd_serve, cmd_train, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "price_ensemble=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => cmd_train(&args)?,
        Commands::Predict(args) => cmd_predict(&args)?,
        Commands::Promote { registry, model_name, version } => {
            cmd_promote(&registry, &model_name, version)?;
        }
        Commands::Serve { host, port } => cmd_serve(host, port).await?,
    }

    Ok(())
}
