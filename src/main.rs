use anyhow::Context;
use clap::Parser;
use openaq_processor::cli::{run, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let action = match &cli.command {
        Commands::Process { input, .. } => format!("processing {}", input.display()),
        Commands::Validate { input, .. } => format!("validating {}", input.display()),
        Commands::Info { file, .. } => format!("inspecting {}", file.display()),
    };

    run(cli).await.with_context(|| format!("Failed while {}", action))
}
