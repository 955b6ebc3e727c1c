// Copyright 2020 Joyent, Inc.

use std::collections::HashMap;
use std::fmt::Result as FmtResult;
use std::fmt::{Debug, Formatter};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use slog::{debug, info, o, trace, Drain, Logger};

use crate::engine::{Engine, HandleKind, NativeHandle};
use crate::error::Error;
use crate::handle::OwnedHandle;
use crate::pool::{Pool, WeakPool};
use crate::pool_factory::PoolFactory;

/// The configuration options for a cache.
#[derive(Debug, Default)]
pub struct CacheOptions {
    /// An optional `slog` logger instance. If none is provided then the logging
    /// will fall back to using the [`slog-stdlog`](https://docs.rs/slog-stdlog)
    /// drain which is essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    pub log: Option<Logger>,
}

// The live pools of a cache by name. Entries do not keep pools alive.
struct PoolRegistry<E>
where
    E: Engine,
{
    closed: bool,
    pools: HashMap<String, WeakPool<E>>,
}

// State shared between a cache, the factories it hands out and the pools
// they create. Factories and pools only hold weak references.
pub(crate) struct CacheData<E>
where
    E: Engine,
{
    handle: Mutex<OwnedHandle<E>>,
    registry: Mutex<PoolRegistry<E>>,
    log: Logger,
}

impl<E> CacheData<E>
where
    E: Engine,
{
    fn handle_lock(&self) -> MutexGuard<OwnedHandle<E>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registry_lock(&self) -> MutexGuard<PoolRegistry<E>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn native_handle(&self) -> Result<NativeHandle, Error> {
        self.handle_lock().get()
    }

    /// Record a newly created pool. Fails once `close` has started, in which
    /// case the caller owns the pool and must destroy it.
    pub(crate) fn register_pool(&self, pool: &Pool<E>) -> Result<(), Error> {
        let mut registry = self.registry_lock();
        if registry.closed {
            debug!(self.log, "cache closed while pool {} was created", pool.name());
            return Err(Error::UseAfterDestroy(HandleKind::Cache));
        }

        trace!(self.log, "registering pool {}", pool.name());
        let previous = registry
            .pools
            .insert(pool.name().to_string(), pool.downgrade());
        if let Some(previous) = previous {
            // The engine rejects duplicate live names, so anything still
            // here has already been released.
            debug!(self.log, "replaced stale pool entry {}", pool.name();
                "dead" => previous.is_dead());
        }
        Ok(())
    }

    pub(crate) fn deregister_pool(&self, pool: &Pool<E>) {
        let mut registry = self.registry_lock();
        let registered = registry
            .pools
            .get(pool.name())
            .map_or(false, |entry| entry.refers_to(pool));
        if registered {
            registry.pools.remove(pool.name());
            trace!(self.log, "deregistered pool {}", pool.name());
        }
    }

    // Drop the entry for `name` if its pool is gone.
    pub(crate) fn prune_pool(&self, name: &str) {
        let mut registry = self.registry_lock();
        let dead = registry.pools.get(name).map_or(false, |e| e.is_dead());
        if dead {
            registry.pools.remove(name);
            trace!(self.log, "pruned dropped pool {}", name);
        }
    }
}

/// A client cache: the owner of pool factories and the registry of the pools
/// created through them.
pub struct Cache<E>
where
    E: Engine,
{
    data: Arc<CacheData<E>>,
    engine: Arc<E>,
    log: Logger,
}

impl<E> Debug for Cache<E>
where
    E: Engine,
{
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Cache")
            .field("handle", &*self.data.handle_lock())
            .field("pools", &self.pool_names())
            .finish()
    }
}

impl<E> Cache<E>
where
    E: Engine,
{
    pub fn new(engine: Arc<E>, options: CacheOptions) -> Result<Self, Error> {
        let log = options
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));

        let native = engine.create_cache()?;
        let handle = OwnedHandle::new(
            HandleKind::Cache,
            native,
            engine.clone(),
            log.clone(),
        )?;
        let log = log.new(o!("cache" => native.to_string()));
        info!(log, "cache created");

        Ok(Cache {
            data: Arc::new(CacheData {
                handle: Mutex::new(handle),
                registry: Mutex::new(PoolRegistry {
                    closed: false,
                    pools: HashMap::new(),
                }),
                log: log.clone(),
            }),
            engine,
            log,
        })
    }

    /// Allocate a new pool factory bound to this cache.
    pub fn get_pool_factory(&self) -> Result<PoolFactory<E>, Error> {
        let cache_handle = self.data.native_handle()?;
        let native = self.engine.create_factory(cache_handle)?;
        let handle = OwnedHandle::new(
            HandleKind::PoolFactory,
            native,
            self.engine.clone(),
            self.log.clone(),
        )?;

        debug!(self.log, "pool factory {} created", native);
        Ok(PoolFactory::new(
            handle,
            Arc::downgrade(&self.data),
            self.log.new(o!("factory" => native.to_string())),
        ))
    }

    /// Look up a live pool by name.
    pub fn find_pool(&self, name: &str) -> Option<Pool<E>> {
        self.data
            .registry_lock()
            .pools
            .get(name)
            .and_then(|entry| entry.upgrade())
    }

    /// The names of all live pools, sorted.
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .data
            .registry_lock()
            .pools
            .iter()
            .filter(|(_, entry)| !entry.is_dead())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.data.handle_lock().is_released()
    }

    /// Destroy every live pool and release the cache. Factories handed out
    /// by this cache can no longer create pools. Closing a closed cache does
    /// nothing.
    pub fn close(&self) {
        let entries = {
            let mut registry = self.data.registry_lock();
            registry.closed = true;
            mem::replace(&mut registry.pools, HashMap::new())
        };
        let pools: Vec<Pool<E>> =
            entries.values().filter_map(|entry| entry.upgrade()).collect();
        for pool in pools.iter() {
            pool.destroy();
        }

        if self.data.handle_lock().release() {
            info!(self.log, "cache closed"; "destroyed_pools" => pools.len());
        }
    }
}

impl<E> Drop for Cache<E>
where
    E: Engine,
{
    fn drop(&mut self) {
        self.close();
    }
}
