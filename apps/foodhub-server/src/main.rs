use anyhow::Result;
use apikit::{ApiHost, HostConfig, StaticIdentityProvider};
use apikit_bootstrap::{AppConfig, CliArgs};
use cart::config::CartConfig;
use cart::CartModule;
use clap::{Parser, Subcommand};

use std::path::PathBuf;
use std::sync::Arc;

/// FoodHub Server - typed API for the food delivery app
#[derive(Parser)]
#[command(name = "foodhub-server")]
#[command(about = "FoodHub Server - typed API for the food delivery app")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and registered operations, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config
        .logging
        .clone()
        .unwrap_or_else(apikit_bootstrap::default_logging_config);
    apikit_bootstrap::init_logging(&logging_config, &config.home_dir());

    tracing::info!("FoodHub Server starting");

    if args.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config).await,
    }
}

/// Build the host and mount every feature module on it.
async fn build_host(config: &AppConfig) -> Result<Arc<ApiHost>> {
    let host_config: HostConfig = config.module_config("api_host")?;
    let identities = StaticIdentityProvider::from_grants(&config.auth.tokens);
    if identities.is_empty() {
        tracing::warn!("No auth tokens configured; only public operations are reachable");
    }
    let host = ApiHost::new(host_config, Arc::new(identities));

    tracing::info!("Initializing modules…");
    let cart_config: CartConfig = config.module_config("cart")?;
    let cart = CartModule::new();
    cart.init(&cart_config).await?;
    cart.register_rest(&host)?;

    Ok(Arc::new(host))
}

async fn run_server(config: AppConfig) -> Result<()> {
    let addr = config.server.bind_addr()?;
    let host = build_host(&config).await?;
    tracing::info!(operations = host.contracts().len(), "Modules registered");

    host.serve(addr, apikit_bootstrap::shutdown_signal()).await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    config.server.bind_addr()?;
    let host = build_host(&config).await?;
    println!("Configuration is valid");
    for contract in host.contracts() {
        println!("  {contract}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apikit::TokenGrant;

    #[test]
    fn cli_parses_subcommands_and_flags() {
        let cli = Cli::try_parse_from(["foodhub-server", "-vv", "--port", "9000", "check"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.port, Some(9000));
        assert!(matches!(cli.command, Some(Commands::Check)));

        let cli = Cli::try_parse_from(["foodhub-server"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.print_config);
    }

    #[tokio::test]
    async fn host_mounts_cart_operations() {
        let mut config = AppConfig::default();
        config.auth.tokens.push(TokenGrant {
            token: "t-admin".into(),
            subject: "alice".into(),
            roles: vec!["ADMIN".into()],
        });
        let host = build_host(&config).await.unwrap();
        assert!(host
            .contracts()
            .iter()
            .any(|c| c.identity() == "GET /v1/admin/orders"));
        assert!(host.config().enable_docs);
    }

    #[tokio::test]
    async fn invalid_module_section_fails_the_build() {
        let mut config = AppConfig::default();
        config
            .modules
            .insert("cart".into(), serde_json::json!({ "max_quantity": "many" }));
        assert!(build_host(&config).await.is_err());
    }
}
