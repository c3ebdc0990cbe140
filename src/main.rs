use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tokio::sync::broadcast;
use vane::{
    adapters::{HealthChecker, HistorySweeper, HttpHealthProbe, StatsAggregator, TracingAuditSink},
    config::models::HubConfig,
    core::{HubEvent, RoutingHub},
    metrics, tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the routing hub (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    // Determine the command to run
    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config), // Default to serve with config from args
    };

    match command {
        "validate" => {
            return validate_config_command(&config_path).await;
        }
        "init" => {
            return init_config_command(&config_path).await;
        }
        "serve" => {
            // Continue with normal hub startup
        }
        _ => unreachable!(),
    }

    // Configure tracing_subscriber for JSON output
    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    // Register metric names and descriptions up front
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    tracing::info!("Loading configuration from {config_path}");

    let config: HubConfig = vane::config::load_config(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    let hub = Arc::new(
        RoutingHub::from_config(&config, Arc::new(TracingAuditSink))
            .context("Failed to build routing hub")?,
    );

    // Create graceful shutdown manager
    let graceful_shutdown = Arc::new(GracefulShutdown::new());

    // Start signal handler for graceful shutdown
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    // Health checker probes every enabled route's targets
    let probe = Arc::new(HttpHealthProbe::new().context("Failed to create health probe")?);
    let health_checker = HealthChecker::new(hub.clone(), probe, config.health_check.clone());
    let health_token = graceful_shutdown.shutdown_token();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_checker.run(health_token).await {
            tracing::error!("Health checker error: {}", e);
        }
    });

    // Statistics aggregator refreshes per-route usage snapshots
    let aggregator = StatsAggregator::from_config(hub.clone(), &config)
        .context("Failed to create statistics aggregator")?;
    let stats_token = graceful_shutdown.shutdown_token();
    let stats_handle = tokio::spawn(async move {
        if let Err(e) = aggregator.run(stats_token).await {
            tracing::error!("Statistics aggregator error: {}", e);
        }
    });

    // History sweeper evicts request records past the retention window
    let sweeper = HistorySweeper::from_config(hub.clone(), &config)
        .context("Failed to create history sweeper")?;
    let sweeper_token = graceful_shutdown.shutdown_token();
    let sweeper_handle = tokio::spawn(async move {
        if let Err(e) = sweeper.run(sweeper_token).await {
            tracing::error!("History sweeper error: {}", e);
        }
    });

    // Mirror hub events into the log
    let mut events = hub.subscribe();
    let mut event_token = graceful_shutdown.shutdown_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => log_hub_event(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Event logger fell behind the hub");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = event_token.wait_for_shutdown() => return,
            }
        }
    });

    {
        let stats = hub.statistics();
        tracing::info!(
            "Starting Vane traffic hub ({} routes, {} policies, health checks: {})",
            stats.routes,
            stats.policies,
            config.health_check.enabled
        );

        println!(
            "Vane traffic hub running with {} routes and {} policies (health checks: {})",
            stats.routes, stats.policies, config.health_check.enabled
        );
    }

    // Log initial routes
    for route in hub.routes() {
        tracing::info!(
            "Configured route: {} {} {} -> {} target(s)",
            route.name,
            route.method,
            route.pattern,
            route.targets.len()
        );
    }

    let reason = graceful_shutdown.wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received: {:?}", reason);

    // Background loops observe the token and wind down on their own
    for handle in [health_handle, stats_handle, sweeper_handle] {
        if let Err(e) = handle.await {
            tracing::warn!("Background task join error: {}", e);
        }
    }

    tracing::info!("Graceful shutdown completed");

    // Shutdown tracing on exit
    tracing_setup::shutdown_tracing();

    Ok(())
}

fn log_hub_event(event: &HubEvent) {
    match event {
        HubEvent::RequestRouted {
            request_id,
            route_id,
            target_id,
            ..
        } => {
            tracing::debug!(%request_id, %route_id, %target_id, "Request routed");
        }
        HubEvent::RouteCreated { route_id, name } => {
            tracing::info!(%route_id, name = %name, "Route created");
        }
        HubEvent::RouteRemoved { route_id, name } => {
            tracing::info!(%route_id, name = %name, "Route removed");
        }
        HubEvent::PolicyCreated { policy_id, name } => {
            tracing::info!(%policy_id, name = %name, "Policy created");
        }
        HubEvent::BreakerTransition {
            route, from, to, ..
        } => {
            tracing::warn!(route = %route, ?from, ?to, "Circuit breaker transition");
        }
    }
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    use vane::config::{loader::load_config_unchecked, validation::HubConfigValidator};

    println!("🔍 Validating configuration file: {config_path}");

    // First check if file exists and is readable
    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    // Try to parse the configuration
    let config = match load_config_unchecked(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    // Validate the configuration
    match HubConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Routes: {}", config.routes.len());
            println!("   • Policies: {}", config.policies.len());
            println!("   • Health Checks: {}", config.health_check.enabled);
            println!(
                "   • History: {} entries max, retained {}",
                config.history.max_entries, config.history.retention
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(errors) => {
            eprintln!("❌ Configuration validation failed:");
            for error in &errors {
                eprintln!("   • {error}");
            }
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure all target URLs start with http:// or https://");
            println!("   • Check that route patterns are non-empty and start with '/'");
            println!("   • Verify durations use valid units (e.g. '500ms', '10s', '7d')");
            println!("   • Ensure rate-limit probabilities fall within 0.0..=1.0");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Vane Traffic Hub Configuration

# Usage statistics recomputation cadence
stats_interval = "30s"

# Request history bounds
[history]
max_entries = 50000
retention = "7d"
sweep_interval = "60s"

# Active health probing of route targets
[health_check]
enabled = true
interval = "10s"

# Example Route: balance /api/* across two backends
[[routes]]
name = "api"
method = "*"
pattern = "/api/*"
strategy = "round_robin"

[[routes.targets]]
url = "http://localhost:3001"

[[routes.targets]]
url = "http://localhost:3002"

# Example Policy: block an abusive client
# [[policies]]
# name = "block-scanner"
# priority = 100
#
# [[policies.conditions]]
# kind = "ip"
# operator = "equals"
# value = "203.0.113.99"
#
# [[policies.actions]]
# type = "deny"
# message = "Access denied"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'vane serve --config {config_path}' to start the hub");
    Ok(())
}
