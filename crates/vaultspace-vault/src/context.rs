//! Engine context - explicit ownership of process-wide state
//!
//! Init: [`EngineContext::open`] opens (and migrates) the metadata
//! database, builds the content cache with its advisory disk mirror, and
//! wires the fetcher and coordinator around the given remote. The sync
//! cursor is read from the database; nothing else is loaded eagerly.
//!
//! Teardown: [`EngineContext::shutdown`] cancels the scheduler, waits for
//! it to stop and closes the database. A cycle interrupted this way never
//! persisted its cursor, so the next open replays it.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vaultspace_cache::{DatabasePool, SqliteMetadataStore};
use vaultspace_core::config::Config;
use vaultspace_core::ports::{IMetadataStore, IRemoteDrive};
use vaultspace_core::VaultError;
use vaultspace_stream::{ContentCache, PrefetchPolicy, RangeFetcher};
use vaultspace_sync::{EventBus, SchedulerHandle, SyncCoordinator, SyncScheduler};

use crate::facade::Vault;
use crate::offline::OfflineDrive;

/// Everything one running engine owns
pub struct EngineContext {
    config: Config,
    pool: DatabasePool,
    coordinator: Arc<SyncCoordinator>,
    fetcher: Arc<RangeFetcher>,
    shutdown: CancellationToken,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

fn storage(err: impl std::fmt::Display) -> VaultError {
    VaultError::Storage(err.to_string())
}

impl EngineContext {
    /// Opens the engine described by `config` against `remote`
    ///
    /// # Errors
    /// `VaultError::Validation` for an invalid configuration,
    /// `VaultError::Storage` if the database cannot be opened.
    pub async fn open(config: Config, remote: Arc<dyn IRemoteDrive>) -> Result<Self, VaultError> {
        let problems = config.validate();
        if !problems.is_empty() {
            let joined = problems
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(VaultError::Validation(joined));
        }

        let pool = DatabasePool::new(&config.database.path)
            .await
            .map_err(storage)?;
        info!(path = %config.database.path.display(), "Opened metadata database");

        Self::with_pool(config, pool, remote).await
    }

    /// Opens the engine with a remote that is never reachable
    ///
    /// For tools that only inspect or edit the local state.
    pub async fn open_offline(config: Config) -> Result<Self, VaultError> {
        Self::open(config, Arc::new(OfflineDrive)).await
    }

    /// Builds the engine around an already opened database
    pub async fn with_pool(
        config: Config,
        pool: DatabasePool,
        remote: Arc<dyn IRemoteDrive>,
    ) -> Result<Self, VaultError> {
        let store: Arc<dyn IMetadataStore> = Arc::new(SqliteMetadataStore::new(pool.pool().clone()));

        match store.get_cursor().await {
            Ok(Some(_)) => info!("Resuming incremental sync from stored cursor"),
            Ok(None) => info!("No sync cursor stored, first cycle will list everything"),
            Err(err) => return Err(err.into()),
        }

        let cache = Arc::new(Self::build_cache(&config));
        let retry = config.retry_policy();
        let fetcher = Arc::new(RangeFetcher::new(
            Arc::clone(&remote),
            Arc::clone(&cache),
            retry.clone(),
            PrefetchPolicy::from(&config.streaming),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            remote,
            store,
            cache,
            EventBus::new(config.sync.event_buffer),
            retry,
        ));

        Ok(Self {
            config,
            pool,
            coordinator,
            fetcher,
            shutdown: CancellationToken::new(),
            scheduler: Mutex::new(None),
        })
    }

    /// Disk persistence is advisory; a cache dir that cannot be used
    /// degrades to memory only
    fn build_cache(config: &Config) -> ContentCache {
        let max_bytes = config.cache.max_bytes;
        if !config.cache.persist {
            return ContentCache::new(max_bytes);
        }
        match ContentCache::with_disk(max_bytes, &config.cache.dir) {
            Ok(cache) => {
                info!(dir = %config.cache.dir.display(), max_bytes, "Content cache persisted to disk");
                cache
            }
            Err(err) => {
                warn!(
                    dir = %config.cache.dir.display(),
                    error = %err,
                    "Content cache directory unusable, caching in memory only"
                );
                ContentCache::new(max_bytes)
            }
        }
    }

    fn scheduler_slot(&self) -> MutexGuard<'_, Option<SchedulerHandle>> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database_path(&self) -> &Path {
        &self.config.database.path
    }

    /// The coordinator shared by every [`Vault`] of this context
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// A facade handle; cheap to clone
    pub fn vault(&self) -> Vault {
        Vault::new(Arc::clone(&self.coordinator), Arc::clone(&self.fetcher))
    }

    /// Starts periodic background sync; a second call only requests a
    /// cycle
    pub fn start_scheduler(&self) {
        let mut slot = self.scheduler_slot();
        if let Some(handle) = slot.as_ref() {
            handle.request_sync();
            return;
        }
        let poll = Duration::from_secs(self.config.sync.poll_interval_secs);
        let handle = SyncScheduler::new(
            Arc::clone(&self.coordinator),
            poll,
            self.config.retry_policy(),
        )
        .with_cancellation(self.shutdown.child_token())
        .spawn();
        *slot = Some(handle);
    }

    /// Asks the background scheduler for an immediate cycle
    ///
    /// Returns `false` when no scheduler is running.
    pub fn request_sync(&self) -> bool {
        match self.scheduler_slot().as_ref() {
            Some(handle) => {
                handle.request_sync();
                true
            }
            None => false,
        }
    }

    /// Stops background work and closes the database
    pub async fn shutdown(self) {
        info!("Shutting down engine");
        self.shutdown.cancel();
        let handle = self.scheduler_slot().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.pool.close().await;
        info!("Engine stopped");
    }
}
