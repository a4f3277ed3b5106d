//! Daemon startup and main loop
//!
//! Builds the store and collaborators from configuration, seeds libraries, and
//! runs the scheduler loop alongside the status server until cancelled.

use crate::concurrency::{derive_plan, ScanPlan};
use crate::config::{Config, ConfigError, LibraryConfig};
use crate::decide::CodecCommandDecider;
use crate::library::Library;
use crate::manager::LibraryManager;
use crate::metadata::FfprobeReader;
use crate::scheduler::Scheduler;
use crate::server::{bind_status_listener, serve_status, ServerError};
use crate::store::{DataStore, MemoryStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Opening or seeding the store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Adds the configured libraries when the store holds none.
///
/// Returns how many libraries were added.
pub async fn seed_libraries(
    store: &dyn DataStore,
    seeds: &[LibraryConfig],
) -> Result<usize, StoreError> {
    if seeds.is_empty() || !store.libraries().await?.is_empty() {
        return Ok(0);
    }

    for seed in seeds {
        let id = store.add_library(Library::from_config(seed)).await?;
        info!(library_id = %id, folder = %seed.folder.display(), "seeded library");
    }
    Ok(seeds.len())
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived scan concurrency
    pub plan: ScanPlan,
    manager: Arc<LibraryManager>,
}

impl Daemon {
    /// Initialize the daemon with the production collaborators
    ///
    /// 1. Validate config
    /// 2. Open the store (state file or in-memory)
    /// 3. Seed libraries into an empty store
    /// 4. Derive the scan plan
    pub async fn new(config: Config) -> Result<Self, DaemonError> {
        config.validate()?;

        let store: Arc<dyn DataStore> = match &config.store.state_file {
            Some(path) => Arc::new(MemoryStore::open(path).await?),
            None => Arc::new(MemoryStore::new()),
        };
        seed_libraries(store.as_ref(), &config.libraries).await?;

        let manager = LibraryManager::new(
            store,
            Arc::new(FfprobeReader::new()),
            Arc::new(CodecCommandDecider),
        )
        .with_metadata_error_policy(config.scheduler.metadata_error_policy);

        Ok(Self::with_manager(config, manager))
    }

    /// Initialize the daemon around an existing manager
    ///
    /// Useful for testing or when the collaborators are built elsewhere.
    pub fn with_manager(config: Config, manager: LibraryManager) -> Self {
        let plan = derive_plan(&config);
        Self {
            config,
            plan,
            manager: Arc::new(manager),
        }
    }

    pub fn manager(&self) -> Arc<LibraryManager> {
        Arc::clone(&self.manager)
    }

    /// Run the scheduler loop and status server until `cancel` fires
    ///
    /// The status server is bound before the first tick; a bind failure is
    /// returned without starting any scan. Otherwise returns after the loop has
    /// stopped and every in-flight scan finished.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        let listener = if self.config.server.enabled {
            Some(bind_status_listener(&self.config.server.bind).await?)
        } else {
            None
        };

        let tick = Duration::from_millis(self.config.scheduler.tick_interval_ms);
        let scheduler = Scheduler::new(Arc::clone(&self.manager), tick, &self.plan);
        let scans = scheduler.tracker();

        info!(
            scan_slots = self.plan.scan_slots,
            cores = self.plan.total_cores,
            policy = ?self.manager.metadata_error_policy(),
            "daemon starting"
        );

        let server = listener.map(|listener| {
            let manager = Arc::clone(&self.manager);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_status(manager, listener, cancel).await {
                    error!(error = %e, "status server failed");
                }
            })
        });

        scheduler.run(cancel).await;

        info!(in_flight = scans.len(), "waiting for running scans");
        scans.wait().await;

        if let Some(server) = server {
            if let Err(e) = server.await {
                error!(error = %e, "status server task panicked");
            }
        }

        info!("daemon stopped");
        Ok(())
    }
}
