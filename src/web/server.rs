//! Web server for Stowage.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::{Result, StowageError};

use super::handlers::AppState;
use super::middleware::rate_limit::{start_cleanup_task, CLEANUP_INTERVAL};
use super::router::create_router;

/// Web server for the API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(config: &ServerConfig, app_state: Arc<AppState>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| {
                StowageError::Config(format!(
                    "invalid server address {}:{}: {e}",
                    config.host, config.port
                ))
            })?;

        Ok(Self { addr, app_state })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the listener. Separate from [`serve`](Self::serve) so tests can
    /// bind port 0 and learn the actual address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("Web server listening on http://{}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve until `shutdown` is cancelled, then drain in-flight requests.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let cleanup = start_cleanup_task(
            self.app_state.upload_limiter.clone(),
            CLEANUP_INTERVAL,
            shutdown.child_token(),
        );
        tracing::info!(
            "Upload limiter cleanup task started (runs every {} seconds)",
            CLEANUP_INTERVAL.as_secs()
        );

        let router = create_router(self.app_state);
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        // The cleanup token is a child of `shutdown`, so it is cancelled by now.
        if let Err(e) = cleanup.await {
            tracing::warn!(error = %e, "Upload limiter cleanup task failed");
        }

        result?;
        tracing::info!("Web server stopped");
        Ok(())
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupScheduler, BackupSettings, BackupSources};
    use crate::cache::DirectoryCache;
    use crate::file::{FileService, FileStorage};
    use crate::lock::UserLockRegistry;
    use crate::rate_limit::ActionRateLimiter;
    use crate::Database;
    use tempfile::TempDir;

    async fn create_test_state(temp: &TempDir) -> Arc<AppState> {
        let db = Database::open_in_memory().await.unwrap();
        let storage = FileStorage::new(temp.path().join("storage")).unwrap();
        let files = FileService::new(
            db.clone(),
            storage,
            Arc::new(UserLockRegistry::new()),
            Arc::new(DirectoryCache::default()),
        );
        let backups = BackupScheduler::new(
            BackupSettings {
                enabled: false,
                dir: temp.path().join("backups"),
                ..BackupSettings::default()
            },
            BackupSources {
                database: db,
                storage_dir: temp.path().join("storage"),
            },
        );

        Arc::new(AppState::new(
            files,
            Arc::new(ActionRateLimiter::default()),
            backups,
        ))
    }

    fn create_test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            admin_users: vec![],
        }
    }

    #[tokio::test]
    async fn test_web_server_new() {
        let temp = TempDir::new().unwrap();
        let server = WebServer::new(&create_test_config(), create_test_state(&temp).await).unwrap();

        assert_eq!(server.addr().ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_web_server_rejects_bad_address() {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig {
            host: "not an address".to_string(),
            ..create_test_config()
        };

        let result = WebServer::new(&config, create_test_state(&temp).await);

        assert!(matches!(result, Err(StowageError::Config(_))));
    }

    #[tokio::test]
    async fn test_web_server_graceful_shutdown() {
        let temp = TempDir::new().unwrap();
        let server = WebServer::new(&create_test_config(), create_test_state(&temp).await).unwrap();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
