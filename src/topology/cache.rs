use super::{CatalogSource, InvalidationScope, TopologyCache};
use crate::config::RouterConfig;
use crate::core::{
    CachedDatabaseInfo, CollectionRoutingInfo, CollectionVersion, DatabaseName, DatabaseVersion,
    DdlError, ErrorCode, Namespace, Result, ShardId,
};
use crate::operation::OperationContext;
use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, event, Level};

#[derive(Debug, Clone)]
struct DatabaseEntry {
    info: Option<CachedDatabaseInfo>,
    stale: bool,
    wanted: Option<DatabaseVersion>,
}

impl DatabaseEntry {
    fn fresh(&self) -> Option<&CachedDatabaseInfo> {
        if self.stale { None } else { self.info.as_ref() }
    }
}

#[derive(Debug, Clone)]
struct CollectionEntry {
    // `None` once refreshed means "not sharded".
    info: Option<CollectionRoutingInfo>,
    stale_all: bool,
    stale_shards: HashSet<ShardId>,
    wanted: Option<CollectionVersion>,
}

impl CollectionEntry {
    fn wide(wanted: Option<CollectionVersion>) -> Self {
        Self {
            info: None,
            stale_all: true,
            stale_shards: HashSet::new(),
            wanted,
        }
    }

    fn is_fresh(&self) -> bool {
        !self.stale_all && self.stale_shards.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub database_refreshes: usize,
    pub collection_refreshes: usize,
    pub database_invalidations: usize,
    pub collection_invalidations: usize,
}

/// LRU-bounded [`TopologyCache`] refreshing from a [`CatalogSource`].
pub struct CatalogCache {
    source: Arc<dyn CatalogSource>,
    databases: Mutex<LruCache<DatabaseName, DatabaseEntry>>,
    collections: Mutex<LruCache<Namespace, CollectionEntry>>,
    database_refreshes: AtomicUsize,
    collection_refreshes: AtomicUsize,
    database_invalidations: AtomicUsize,
    collection_invalidations: AtomicUsize,
}

fn newest<V: PartialOrd + Copy>(a: Option<V>, b: Option<V>) -> Option<V> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b > a { b } else { a }),
        (a, b) => a.or(b),
    }
}

impl CatalogCache {
    pub fn new(source: Arc<dyn CatalogSource>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            databases: Mutex::new(LruCache::new(capacity)),
            collections: Mutex::new(LruCache::new(capacity)),
            database_refreshes: AtomicUsize::new(0),
            collection_refreshes: AtomicUsize::new(0),
            database_invalidations: AtomicUsize::new(0),
            collection_invalidations: AtomicUsize::new(0),
        }
    }

    /// Cache sized by [`RouterConfig::cache_capacity`].
    pub fn from_config(source: Arc<dyn CatalogSource>, config: &RouterConfig) -> Self {
        Self::new(source, config.cache_capacity)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            database_refreshes: self.database_refreshes.load(Ordering::SeqCst),
            collection_refreshes: self.collection_refreshes.load(Ordering::SeqCst),
            database_invalidations: self.database_invalidations.load(Ordering::SeqCst),
            collection_invalidations: self.collection_invalidations.load(Ordering::SeqCst),
        }
    }

    /// Cached database snapshot without refreshing, stale or not.
    pub fn peek_database(&self, db: &DatabaseName) -> Option<CachedDatabaseInfo> {
        let databases = self.databases.lock().ok()?;
        databases.peek(db).and_then(|entry| entry.info.clone())
    }

    async fn refresh_database(
        &self,
        op_ctx: &OperationContext,
        db: &DatabaseName,
    ) -> Result<CachedDatabaseInfo> {
        let fetched = op_ctx
            .run_interruptible(self.source.fetch_database(db))
            .await?;
        self.database_refreshes.fetch_add(1, Ordering::SeqCst);

        let mut databases = self.databases.lock()?;
        let wanted = databases.peek(db).and_then(|entry| entry.wanted);
        let Some(info) = fetched else {
            databases.pop(db);
            return Err(DdlError::command(
                ErrorCode::NamespaceNotFound,
                format!("database {} not found", db),
            ));
        };

        // A concurrent refresh may already have stored a newer version.
        if let Some(entry) = databases.peek(db) {
            if let Some(cached) = entry.info.as_ref() {
                if cached.version.is_newer_than(&info.version) {
                    if let Some(fresh) = entry.fresh() {
                        return Ok(fresh.clone());
                    }
                    return Err(DdlError::command(
                        ErrorCode::StaleDbVersion,
                        format!(
                            "refreshed version {} of database {} is older than cached {}",
                            info.version, db, cached.version
                        ),
                    ));
                }
            }
        }

        if let Some(wanted) = wanted {
            if !(info.version == wanted || info.version.is_newer_than(&wanted)) {
                databases.put(
                    db.clone(),
                    DatabaseEntry {
                        info: Some(info.clone()),
                        stale: true,
                        wanted: Some(wanted),
                    },
                );
                return Err(DdlError::command(
                    ErrorCode::StaleDbVersion,
                    format!(
                        "refreshed version {} of database {} is older than expected {}",
                        info.version, db, wanted
                    ),
                ));
            }
        }

        event!(Level::DEBUG, db = %db, version = %info.version, primary = %info.primary, "refreshed database entry");
        databases.put(
            db.clone(),
            DatabaseEntry {
                info: Some(info.clone()),
                stale: false,
                wanted: None,
            },
        );
        Ok(info)
    }

    async fn refresh_collection(
        &self,
        op_ctx: &OperationContext,
        nss: &Namespace,
    ) -> Result<Option<CollectionRoutingInfo>> {
        let fetched = op_ctx
            .run_interruptible(self.source.fetch_collection(nss))
            .await?;
        self.collection_refreshes.fetch_add(1, Ordering::SeqCst);

        let mut collections = self.collections.lock()?;
        if let (Some(entry), Some(info)) = (collections.peek(nss), fetched.as_ref()) {
            if let Some(cached) = entry.info.as_ref() {
                if cached.version.is_newer_than(&info.version) {
                    if entry.is_fresh() {
                        return Ok(entry.info.clone());
                    }
                    return Err(DdlError::command(
                        ErrorCode::StaleShardVersion,
                        format!(
                            "refreshed routing table for {} at {} is older than cached {}",
                            nss, info.version, cached.version
                        ),
                    ));
                }
            }
        }

        // A dropped collection satisfies any outstanding wanted version.
        let wanted = collections.peek(nss).and_then(|entry| entry.wanted);
        if let (Some(wanted), Some(info)) = (wanted, fetched.as_ref()) {
            let reached = info.version == wanted || info.version.is_newer_than(&wanted);
            if !reached {
                return Err(DdlError::command(
                    ErrorCode::StaleShardVersion,
                    format!(
                        "routing table for {} has not reached expected version {}",
                        nss, wanted
                    ),
                ));
            }
        }

        debug!(nss = %nss, sharded = fetched.is_some(), "refreshed collection entry");
        collections.put(
            nss.clone(),
            CollectionEntry {
                info: fetched.clone(),
                stale_all: false,
                stale_shards: HashSet::new(),
                wanted: None,
            },
        );
        Ok(fetched)
    }
}

#[async_trait]
impl TopologyCache for CatalogCache {
    async fn get_database(
        &self,
        op_ctx: &OperationContext,
        db: &DatabaseName,
    ) -> Result<CachedDatabaseInfo> {
        {
            let mut databases = self.databases.lock()?;
            if let Some(info) = databases.get(db).and_then(|entry| entry.fresh()) {
                return Ok(info.clone());
            }
        }
        self.refresh_database(op_ctx, db).await
    }

    async fn get_collection_routing_info(
        &self,
        op_ctx: &OperationContext,
        nss: &Namespace,
    ) -> Result<Option<CollectionRoutingInfo>> {
        {
            let mut collections = self.collections.lock()?;
            if let Some(entry) = collections.get(nss) {
                if entry.is_fresh() {
                    return Ok(entry.info.clone());
                }
            }
        }
        self.refresh_collection(op_ctx, nss).await
    }

    async fn get_shard_version(
        &self,
        op_ctx: &OperationContext,
        nss: &Namespace,
        shard: &ShardId,
    ) -> Result<Option<CollectionVersion>> {
        {
            let mut collections = self.collections.lock()?;
            if let Some(entry) = collections.get(nss) {
                if !entry.stale_all && !entry.stale_shards.contains(shard) {
                    return Ok(entry
                        .info
                        .as_ref()
                        .and_then(|info| info.version_for_shard(shard)));
                }
            }
        }
        let info = self.refresh_collection(op_ctx, nss).await?;
        Ok(info.and_then(|info| info.version_for_shard(shard)))
    }

    fn on_stale_database_version(&self, db: &DatabaseName, wanted: Option<DatabaseVersion>) {
        self.database_invalidations.fetch_add(1, Ordering::SeqCst);
        let Ok(mut databases) = self.databases.lock() else {
            return;
        };
        match databases.get_mut(db) {
            Some(entry) => {
                let superseded = match (&entry.info, wanted) {
                    (Some(info), Some(wanted)) => {
                        !(info.version == wanted || info.version.is_newer_than(&wanted))
                    }
                    _ => true,
                };
                if superseded {
                    entry.stale = true;
                    entry.wanted = newest(entry.wanted, wanted);
                }
            }
            None => {
                databases.put(
                    db.clone(),
                    DatabaseEntry {
                        info: None,
                        stale: true,
                        wanted,
                    },
                );
            }
        }
        debug!(db = %db, wanted = ?wanted, "database entry marked stale");
    }

    fn invalidate_shard_or_entire_collection_entry(
        &self,
        nss: &Namespace,
        version: Option<CollectionVersion>,
        shard: &ShardId,
    ) -> InvalidationScope {
        self.collection_invalidations.fetch_add(1, Ordering::SeqCst);
        let Ok(mut collections) = self.collections.lock() else {
            return InvalidationScope::Collection;
        };

        let scope = match collections.get_mut(nss) {
            Some(entry) => {
                let same_incarnation = match (&entry.info, version) {
                    (Some(info), Some(version)) => info.version.is_same_collection(&version),
                    _ => false,
                };
                if same_incarnation && !entry.stale_all {
                    entry.stale_shards.insert(shard.clone());
                    entry.wanted = newest(entry.wanted, version);
                    InvalidationScope::Shard
                } else {
                    let wanted = if same_incarnation {
                        newest(entry.wanted, version)
                    } else {
                        version
                    };
                    *entry = CollectionEntry::wide(wanted);
                    InvalidationScope::Collection
                }
            }
            None => {
                collections.put(nss.clone(), CollectionEntry::wide(version));
                InvalidationScope::Collection
            }
        };
        debug!(nss = %nss, shard = %shard, scope = ?scope, "collection entry invalidated");
        scope
    }
}
