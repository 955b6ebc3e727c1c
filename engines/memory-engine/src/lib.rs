// Copyright 2020 Joyent, Inc.

//! An in-process implementation of the geode-pool `Engine` trait.
//!
//! `InMemoryEngine` keeps caches, pool factory builders and pools in memory
//! and simulates locator discovery: when a pool is created the configured
//! locators (or servers) are tried in order and the first reachable one wins.
//! Every endpoint is reachable unless it has been marked otherwise with
//! `mark_unreachable`. Handles are never reused, so a stale handle can never
//! refer to another resource.

use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::sync::{Mutex, MutexGuard};

use slog::{debug, info, o, trace, warn, Drain, Logger};

use geode_pool::endpoint::{endpoint_key, Endpoint, EndpointKey};
use geode_pool::engine::{Engine, HandleKind, NativeHandle};
use geode_pool::error::{EngineError, EngineErrorCode};
use geode_pool::pool_factory::types::PoolAttributes;

#[derive(Clone, Debug)]
struct BuilderRecord {
    cache: NativeHandle,
    locators: Vec<Endpoint>,
    servers: Vec<Endpoint>,
    attributes: PoolAttributes,
}

#[derive(Debug)]
struct PoolRecord {
    cache: NativeHandle,
    name: String,
    config: BuilderRecord,
    discovery_attempts: Vec<Endpoint>,
    connected: Endpoint,
}

#[derive(Debug, Default)]
struct CacheRecord {
    pools: HashMap<String, NativeHandle>,
}

#[derive(Debug, Default)]
struct EngineState {
    last_handle: u64,
    caches: HashMap<NativeHandle, CacheRecord>,
    factories: HashMap<NativeHandle, BuilderRecord>,
    pools: HashMap<NativeHandle, PoolRecord>,
    unreachable: HashSet<EndpointKey>,
    releases: HashMap<NativeHandle, u32>,
}

impl EngineState {
    fn next_handle(&mut self) -> NativeHandle {
        self.last_handle += 1;
        NativeHandle::from(self.last_handle)
    }

    fn factory_mut(
        &mut self,
        factory: NativeHandle,
    ) -> Result<&mut BuilderRecord, EngineError> {
        self.factories.get_mut(&factory).ok_or_else(|| {
            EngineError::new(
                EngineErrorCode::InvalidHandle,
                format!("unknown pool factory {}", factory),
            )
        })
    }
}

#[derive(Debug)]
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
    log: Logger,
}

impl InMemoryEngine {
    pub fn new(log: Option<Logger>) -> Self {
        let log = log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        InMemoryEngine {
            state: Mutex::new(EngineState::default()),
            log,
        }
    }

    fn state_lock(&self) -> MutexGuard<EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make discovery attempts against `host:port` fail.
    pub fn mark_unreachable(&self, host: &str, port: u16) {
        if let Ok(endpoint) = Endpoint::new(host, u32::from(port)) {
            debug!(self.log, "marking {} unreachable", endpoint);
            self.state_lock().unreachable.insert(endpoint_key(&endpoint));
        }
    }

    pub fn mark_reachable(&self, host: &str, port: u16) {
        if let Ok(endpoint) = Endpoint::new(host, u32::from(port)) {
            debug!(self.log, "marking {} reachable", endpoint);
            self.state_lock().unreachable.remove(&endpoint_key(&endpoint));
        }
    }

    /// The endpoints contacted while creating `pool`, in the order they were
    /// tried.
    pub fn discovery_attempts(&self, pool: NativeHandle) -> Option<Vec<Endpoint>> {
        self.state_lock()
            .pools
            .get(&pool)
            .map(|p| p.discovery_attempts.clone())
    }

    /// The endpoint that answered discovery for `pool`.
    pub fn connected_endpoint(&self, pool: NativeHandle) -> Option<Endpoint> {
        self.state_lock().pools.get(&pool).map(|p| p.connected.clone())
    }

    pub fn pool_locators(&self, pool: NativeHandle) -> Option<Vec<Endpoint>> {
        self.state_lock()
            .pools
            .get(&pool)
            .map(|p| p.config.locators.clone())
    }

    pub fn pool_servers(&self, pool: NativeHandle) -> Option<Vec<Endpoint>> {
        self.state_lock()
            .pools
            .get(&pool)
            .map(|p| p.config.servers.clone())
    }

    pub fn pool_attributes(&self, pool: NativeHandle) -> Option<PoolAttributes> {
        self.state_lock()
            .pools
            .get(&pool)
            .map(|p| p.config.attributes.clone())
    }

    pub fn pool_name(&self, pool: NativeHandle) -> Option<String> {
        self.state_lock().pools.get(&pool).map(|p| p.name.clone())
    }

    /// The live pool names of `cache`, sorted.
    pub fn pool_names(&self, cache: NativeHandle) -> Vec<String> {
        let state = self.state_lock();
        let mut names: Vec<String> = state
            .caches
            .get(&cache)
            .map(|c| c.pools.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn live_cache_count(&self) -> usize {
        self.state_lock().caches.len()
    }

    pub fn live_factory_count(&self) -> usize {
        self.state_lock().factories.len()
    }

    pub fn live_pool_count(&self) -> usize {
        self.state_lock().pools.len()
    }

    /// How many times `handle` has been passed to `release`. Diagnostic only:
    /// counts are kept for every handle ever released and are never pruned,
    /// so memory use grows with the number of handles issued.
    pub fn release_count(&self, handle: NativeHandle) -> u32 {
        *self.state_lock().releases.get(&handle).unwrap_or(&0)
    }

    fn endpoint(
        &self,
        host: &CStr,
        port: u16,
    ) -> Result<Endpoint, EngineError> {
        let host = host.to_str().map_err(|_| {
            EngineError::new(
                EngineErrorCode::IllegalArgument,
                "host is not valid UTF-8",
            )
        })?;
        Endpoint::new(host, u32::from(port)).map_err(|e| {
            EngineError::new(EngineErrorCode::IllegalArgument, e.to_string())
        })
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        InMemoryEngine::new(None)
    }
}

impl Engine for InMemoryEngine {
    fn create_cache(&self) -> Result<NativeHandle, EngineError> {
        let mut state = self.state_lock();
        let handle = state.next_handle();
        state.caches.insert(handle, CacheRecord::default());
        trace!(self.log, "created cache {}", handle);
        Ok(handle)
    }

    fn create_factory(
        &self,
        cache: NativeHandle,
    ) -> Result<NativeHandle, EngineError> {
        let mut state = self.state_lock();
        if !state.caches.contains_key(&cache) {
            return Err(EngineError::new(
                EngineErrorCode::InvalidHandle,
                format!("unknown cache {}", cache),
            ));
        }

        let handle = state.next_handle();
        state.factories.insert(
            handle,
            BuilderRecord {
                cache,
                locators: Vec::new(),
                servers: Vec::new(),
                attributes: PoolAttributes::default(),
            },
        );
        trace!(self.log, "created pool factory {} for cache {}", handle, cache);
        Ok(handle)
    }

    fn add_locator(
        &self,
        factory: NativeHandle,
        host: &CStr,
        port: u16,
    ) -> Result<(), EngineError> {
        let endpoint = self.endpoint(host, port)?;
        let mut state = self.state_lock();
        let builder = state.factory_mut(factory)?;
        if !builder.servers.is_empty() {
            return Err(EngineError::new(
                EngineErrorCode::IllegalState,
                "Cannot add both locators and servers to a pool",
            ));
        }
        trace!(self.log, "factory {} add locator {}", factory, endpoint);
        builder.locators.push(endpoint);
        Ok(())
    }

    fn add_server(
        &self,
        factory: NativeHandle,
        host: &CStr,
        port: u16,
    ) -> Result<(), EngineError> {
        let endpoint = self.endpoint(host, port)?;
        let mut state = self.state_lock();
        let builder = state.factory_mut(factory)?;
        if !builder.locators.is_empty() {
            return Err(EngineError::new(
                EngineErrorCode::IllegalState,
                "Cannot add both locators and servers to a pool",
            ));
        }
        trace!(self.log, "factory {} add server {}", factory, endpoint);
        builder.servers.push(endpoint);
        Ok(())
    }

    fn set_attributes(
        &self,
        factory: NativeHandle,
        attributes: &PoolAttributes,
    ) -> Result<(), EngineError> {
        let mut state = self.state_lock();
        state.factory_mut(factory)?.attributes = attributes.clone();
        Ok(())
    }

    fn create_pool(
        &self,
        factory: NativeHandle,
        name: &CStr,
    ) -> Result<NativeHandle, EngineError> {
        let name = name.to_str().map_err(|_| {
            EngineError::new(
                EngineErrorCode::IllegalArgument,
                "pool name is not valid UTF-8",
            )
        })?;

        let mut state = self.state_lock();
        let config = state.factory_mut(factory)?.clone();

        match state.caches.get(&config.cache) {
            None => {
                return Err(EngineError::new(
                    EngineErrorCode::IllegalState,
                    format!("cache {} is closed", config.cache),
                ))
            }
            Some(cache) if cache.pools.contains_key(name) => {
                return Err(EngineError::new(
                    EngineErrorCode::PoolExists,
                    format!("Pool {} already exists", name),
                ))
            }
            Some(_) => (),
        }

        let endpoints = if config.locators.is_empty() {
            &config.servers
        } else {
            &config.locators
        };
        if endpoints.is_empty() {
            return Err(EngineError::new(
                EngineErrorCode::IllegalState,
                format!("pool {} has no locators or servers", name),
            ));
        }

        let mut discovery_attempts = Vec::with_capacity(endpoints.len());
        let mut connected = None;
        for endpoint in endpoints.iter() {
            discovery_attempts.push(endpoint.clone());
            if !state.unreachable.contains(&endpoint_key(endpoint)) {
                connected = Some(endpoint.clone());
                break;
            }
            debug!(self.log, "pool {}: {} unreachable", name, endpoint);
        }

        let connected = match connected {
            Some(endpoint) => endpoint,
            None => {
                let tried: Vec<String> =
                    discovery_attempts.iter().map(|e| e.to_string()).collect();
                warn!(self.log, "pool {}: discovery failed", name);
                return Err(EngineError::new(
                    EngineErrorCode::DiscoveryFailed,
                    format!(
                        "Could not connect to any of: {}",
                        tried.join(", ")
                    ),
                ));
            }
        };

        let handle = state.next_handle();
        let cache = config.cache;
        if let Some(record) = state.caches.get_mut(&cache) {
            record.pools.insert(name.to_string(), handle);
        }
        info!(self.log, "pool {} ({}) connected via {}", name, handle, connected);
        state.pools.insert(
            handle,
            PoolRecord {
                cache,
                name: name.to_string(),
                config,
                discovery_attempts,
                connected,
            },
        );
        Ok(handle)
    }

    fn release(&self, kind: HandleKind, handle: NativeHandle) {
        let mut state = self.state_lock();
        *state.releases.entry(handle).or_insert(0) += 1;

        let known = match kind {
            HandleKind::Cache => state.caches.remove(&handle).is_some(),
            HandleKind::PoolFactory => state.factories.remove(&handle).is_some(),
            HandleKind::Pool => match state.pools.remove(&handle) {
                Some(pool) => {
                    if let Some(cache) = state.caches.get_mut(&pool.cache) {
                        if cache.pools.get(&pool.name) == Some(&handle) {
                            cache.pools.remove(&pool.name);
                        }
                    }
                    true
                }
                None => false,
            },
        };

        if known {
            trace!(self.log, "released {} {}", kind, handle);
        } else {
            warn!(self.log, "release of unknown {} {}", kind, handle);
        }
    }
}
