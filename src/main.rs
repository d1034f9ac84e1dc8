use anyhow::Context;
use clap::{Parser, Subcommand};
use linkgate::admin::{self, AdminCommands};
use linkgate::config::Config;
use linkgate::server;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// linkgate - redirect service for protected and scheduled short links
#[derive(Parser, Debug)]
#[command(name = "linkgate")]
#[command(version)]
#[command(about = "Redirect service for protected and scheduled short links", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the web server
    Server {
        /// Host to bind to (overrides SERVER_HOST env var)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides SERVER_PORT env var)
        #[arg(long)]
        port: Option<u16>,

        /// Run migrations on startup
        #[arg(long, default_value_t = false)]
        migrate: bool,
    },

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        admin_command: AdminCommands,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // LOG_FORMAT may come from .env
    dotenvy::dotenv().ok();
    init_tracing();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Server { host, port, migrate } => {
            // Override config with CLI args if provided
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let addr = format!("{}:{}", host, port);

            server::run_server(config, addr.clone(), migrate)
                .await
                .with_context(|| format!("Server on {} failed", addr))
        }
        Commands::Admin { admin_command } => admin::run(config, admin_command)
            .await
            .context("Admin command failed"),
    }
}
