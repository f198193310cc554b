//! Courier server binary.
//!
//! # Usage
//!
//! ```bash
//! # Single process, everything in memory, users/groups from a seed file
//! courier-server --directory-seed users.json
//!
//! # Shared deployment against the user/group service's Redis
//! courier-server --bind 0.0.0.0:5000 --redis-url redis://redis:6379 \
//!     --storage redis --bus redis --directory redis --jwt-secret "$SECRET"
//! ```

use std::path::PathBuf;

use clap::Parser;
use courier_server::{
    BusBackend, DEV_JWT_SECRET, DirectoryBackend, RouterConfig, Server, ServerConfig,
    StorageBackend,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Courier chat relay
#[derive(Parser, Debug)]
#[command(name = "courier-server")]
#[command(about = "Real-time chat relay: persist, publish, deliver")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, env = "COURIER_BIND", default_value = "127.0.0.1:5000")]
    bind: String,

    /// Redis URL, required by any Redis backend
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// History backend
    #[arg(long, env = "COURIER_STORAGE", value_enum, default_value = "memory")]
    storage: StorageBackend,

    /// Database file for the redb history backend
    #[arg(long, env = "COURIER_REDB_PATH")]
    redb_path: Option<PathBuf>,

    /// Fan-out backend
    #[arg(long, env = "COURIER_BUS", value_enum, default_value = "local")]
    bus: BusBackend,

    /// User and group directory backend
    #[arg(long, env = "COURIER_DIRECTORY", value_enum, default_value = "seed")]
    directory: DirectoryBackend,

    /// JSON seed file for the in-memory directory
    #[arg(long, env = "COURIER_DIRECTORY_SEED")]
    directory_seed: Option<PathBuf>,

    /// HS256 secret shared with the token issuer
    #[arg(long, env = "COURIER_JWT_SECRET", default_value = DEV_JWT_SECRET, hide_env_values = true)]
    jwt_secret: String,

    /// Maximum messages returned by one history read
    #[arg(long, env = "COURIER_HISTORY_LIMIT", default_value = "50")]
    history_limit: usize,

    /// Do not echo private messages to the sender's own channel
    #[arg(long)]
    no_echo: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Courier server starting");

    if args.jwt_secret == DEV_JWT_SECRET {
        tracing::warn!("No JWT secret provided - using the built-in development secret");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let config = ServerConfig {
        bind_address: args.bind,
        redis_url: args.redis_url,
        storage: args.storage,
        redb_path: args.redb_path,
        bus: args.bus,
        directory: args.directory,
        directory_seed: args.directory_seed,
        jwt_secret: args.jwt_secret,
        router: RouterConfig {
            echo_private_to_sender: !args.no_echo,
            max_history_limit: args.history_limit,
        },
    };

    let server = Server::bind(config).await?;
    tracing::info!(addr = %server.local_addr()?, "server listening");

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
