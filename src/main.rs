use clap::Parser;
use quantrun::cli::{Cli, Commands};
use quantrun::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        toml::from_str(include_str!("../config.toml.example")).expect("Invalid default config")
    });

    // Initialize telemetry
    quantrun::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting strategy runtime");
            args.execute(&config).await?;
        }
        Commands::Backtest(args) => {
            tracing::info!("Starting backtest evaluation");
            args.execute(&config).await?;
        }
        Commands::Status => {
            println!("quantrun status");
            println!("  Strategy: {}", config.runtime.name);
            println!("  Status: Not running");
        }
        Commands::Config => {
            println!("Current configuration:");
            println!("  Strategy: {}", config.runtime.name);
            println!("  Stocks: {}", config.runtime.stocks.join(", "));
            println!("  Market: {}", config.market.market);
            println!("  Quote server: {}", config.quote.ws_url);
            println!(
                "  Selection: {} ({:?})",
                config.evaluate.select_key, config.evaluate.select_mode
            );
        }
    }

    Ok(())
}
