use clap::Parser;
use steam_watch::cli::{Cli, Commands};
use steam_watch::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {:#}", cli.config, e);
            eprintln!("Using built-in example configuration");
            Config::from_toml(include_str!("../config.toml.example"))?
        }
    };

    match cli.command {
        Commands::Run(args) => {
            steam_watch::telemetry::init_telemetry(&config.telemetry)?;
            args.execute(config).await?;
        }
        Commands::Decode(args) => {
            args.execute().await?;
        }
        Commands::Config => {
            let token = config.token_config()?;
            let conn = config.connection_config();
            println!("Current configuration:");
            println!("  Feed: {} (token param {:?})", conn.url, conn.token_param);
            println!("  Subprotocols: {:?}", conn.subprotocols);
            println!("  Token endpoint: {} (ttl {:?})", token.endpoint(), token.ttl);
            println!(
                "  Liveness: {:?}, ping {:?}, high water {}",
                conn.liveness_timeout, conn.ping_interval, conn.session.high_water_mark
            );
            println!(
                "  Steam: large {}, rapid {} x{}, lookback {}ms, {} override(s)",
                config.steam.large_move_threshold,
                config.steam.rapid_change_threshold,
                config.steam.min_rapid_changes,
                config.steam.lookback_ms,
                config.steam.overrides.len()
            );
            println!(
                "  Alerts: steam cooldown {}ms, critical index {}",
                config.alert.steam_cooldown_ms, config.alert.critical_steam_index
            );
        }
    }

    Ok(())
}
