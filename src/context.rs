/// Application context and dependency injection
use crate::{
    accounts::AccountManager,
    auth::{SessionManager, TokenService},
    config::ServerConfig,
    db,
    error::{ChatError, ChatResult},
    files::DiskFileStore,
    groups::GroupManager,
    ledger::MessageLedger,
    rate_limit::RateLimiter,
    realtime::{ConnectionRegistry, RoomBroadcaster},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub accounts: Arc<AccountManager>,
    pub sessions: Arc<SessionManager>,
    pub ledger: Arc<MessageLedger>,
    pub groups: Arc<GroupManager>,
    // Realtime state, rebuilt empty on every boot
    pub registry: ConnectionRegistry,
    pub broadcaster: RoomBroadcaster,
    pub files: Arc<DiskFileStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ChatResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;

        Self::with_pool(config, pool).await
    }

    /// Build the context over an existing, migrated pool
    pub async fn with_pool(config: ServerConfig, db: SqlitePool) -> ChatResult<Self> {
        let tokens = TokenService::new(&config.authentication);
        let accounts = AccountManager::new(db.clone());
        let sessions = SessionManager::new(
            db.clone(),
            tokens,
            accounts.clone(),
            config.authentication.rotate_refresh_tokens,
        );
        let ledger = MessageLedger::new(db.clone());

        let registry = ConnectionRegistry::new();
        let broadcaster = RoomBroadcaster::new(registry.clone());
        let groups = GroupManager::new(ledger.clone(), accounts.clone(), broadcaster.clone());

        let files = DiskFileStore::new(
            config.storage.upload_directory.clone(),
            config.storage.upload_limit,
        );
        files.ensure_dir().await?;

        let rate_limiter = RateLimiter::new(&config.rate_limit);

        Ok(Self {
            config: Arc::new(config),
            db,
            accounts: Arc::new(accounts),
            sessions: Arc::new(sessions),
            ledger: Arc::new(ledger),
            groups: Arc::new(groups),
            registry,
            broadcaster,
            files: Arc::new(files),
            rate_limiter: Arc::new(rate_limiter),
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> ChatResult<()> {
        let dirs = [
            &config.storage.data_directory,
            &config.storage.upload_directory,
        ];

        for dir in dirs {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    ChatError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
