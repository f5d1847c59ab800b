use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use stowage::backup::{BackupScheduler, BackupSettings, BackupSources};
use stowage::web::{AppState, WebServer};
use stowage::{
    ActionRateLimiter, Config, Database, DirectoryCache, FileService, FileStorage,
    RateLimitConfig, UserLockRegistry,
};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load_with_env(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {CONFIG_PATH}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = stowage::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        stowage::logging::init_console_only(&config.logging.level);
    }

    info!("Stowage - personal file storage");

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> stowage::Result<()> {
    let db = Database::open(&config.database.path).await?;
    info!("Database opened at {}", config.database.path);

    let storage = FileStorage::new(&config.storage.path)?;
    info!("File storage initialized at: {}", config.storage.path);

    let max_upload_size = config.storage.max_upload_size_mb * 1024 * 1024;
    let cache = DirectoryCache::new(Duration::from_secs(config.cache.listing_ttl_secs));
    let files = FileService::new(
        db.clone(),
        storage,
        Arc::new(UserLockRegistry::new()),
        Arc::new(cache),
    )
    .with_max_file_size(max_upload_size);

    let upload_limiter = Arc::new(ActionRateLimiter::new(RateLimitConfig::from(
        &config.upload,
    )));

    let backups = BackupScheduler::new(
        BackupSettings::from(&config.backup),
        BackupSources {
            database: db.clone(),
            storage_dir: PathBuf::from(&config.storage.path),
        },
    );
    backups.start();

    let app_state = AppState::new(files, upload_limiter, backups.clone())
        .with_admin_users(config.server.admin_users.clone())
        .with_max_upload_size(max_upload_size);
    let server = WebServer::new(&config.server, Arc::new(app_state))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let served = server.run(shutdown.clone()).await;

    shutdown.cancel();
    backups.stop().await;
    db.close().await;
    info!("Stowage stopped");

    served
}
