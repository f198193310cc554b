//! Runtime configuration and backend selection.

use std::path::PathBuf;

use clap::ValueEnum;

use crate::{error::ServerError, router::RouterConfig};

/// Secret used when none is configured. Only fit for local development.
pub const DEV_JWT_SECRET: &str = "courier-dev-secret";

/// Where conversation history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// In-process, lost on restart
    Memory,
    /// Embedded redb file
    Redb,
    /// Shared Redis lists
    Redis,
}

/// How messages fan out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusBackend {
    /// In-process only
    Local,
    /// Redis pub/sub across processes
    Redis,
}

/// Where users and groups are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectoryBackend {
    /// In-memory, optionally seeded from a JSON file
    Seed,
    /// The user/group service's Redis keys
    Redis,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_address: String,
    /// Redis URL, required by any Redis backend
    pub redis_url: Option<String>,
    /// History backend
    pub storage: StorageBackend,
    /// Database file for [`StorageBackend::Redb`]
    pub redb_path: Option<PathBuf>,
    /// Fan-out backend
    pub bus: BusBackend,
    /// Directory backend
    pub directory: DirectoryBackend,
    /// Seed file for [`DirectoryBackend::Seed`]
    pub directory_seed: Option<PathBuf>,
    /// HS256 secret for handshake tokens
    pub jwt_secret: String,
    /// Router tuning
    pub router: RouterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
            redis_url: None,
            storage: StorageBackend::Memory,
            redb_path: None,
            bus: BusBackend::Local,
            directory: DirectoryBackend::Seed,
            directory_seed: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            router: RouterConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Whether any backend talks to Redis.
    pub fn uses_redis(&self) -> bool {
        self.storage == StorageBackend::Redis
            || self.bus == BusBackend::Redis
            || self.directory == DirectoryBackend::Redis
    }

    /// Check backend combinations before anything is opened.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.bind_address.is_empty() {
            return Err(ServerError::Config("bind address is empty".to_string()));
        }
        if self.jwt_secret.is_empty() {
            return Err(ServerError::Config("JWT secret is empty".to_string()));
        }
        if self.uses_redis() && self.redis_url.as_deref().is_none_or(str::is_empty) {
            return Err(ServerError::Config(
                "a Redis backend is selected but no Redis URL is set".to_string(),
            ));
        }
        if self.storage == StorageBackend::Redb && self.redb_path.is_none() {
            return Err(ServerError::Config("redb storage requires a database path".to_string()));
        }
        if self.router.max_history_limit == 0 {
            return Err(ServerError::Config("history limit must be positive".to_string()));
        }
        Ok(())
    }

    /// Redis URL, for callers that already validated.
    pub(crate) fn redis_url(&self) -> Result<&str, ServerError> {
        self.redis_url
            .as_deref()
            .ok_or_else(|| ServerError::Config("Redis URL is not set".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_and_in_memory() {
        let config = ServerConfig::default();

        assert!(config.validate().is_ok());
        assert!(!config.uses_redis());
        assert_eq!(config.bind_address, "127.0.0.1:5000");
    }

    #[test]
    fn redis_backends_need_url() {
        let config = ServerConfig { bus: BusBackend::Redis, ..ServerConfig::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));

        let config = ServerConfig {
            bus: BusBackend::Redis,
            redis_url: Some("redis://127.0.0.1/".to_string()),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn redb_needs_path() {
        let config = ServerConfig { storage: StorageBackend::Redb, ..ServerConfig::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn empty_secret_rejected() {
        let config = ServerConfig { jwt_secret: String::new(), ..ServerConfig::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }
}
