// Copyright 2020 Joyent, Inc.

pub mod types;

use std::fmt::Result as FmtResult;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

use slog::{debug, info, o, trace, warn, Logger};

use crate::cache::CacheData;
use crate::endpoint::Endpoint;
use crate::engine::{engine_text, Engine, HandleKind, NativeHandle};
use crate::error::Error;
use crate::handle::OwnedHandle;
use crate::pool::Pool;
use crate::pool_factory::types::{
    Discovery, EndpointConfig, PoolAttributes, PoolConfig,
};

/// The kind of discovery endpoint being added to a factory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EndpointRole {
    Locator,
    Server,
}

/// A builder for pools
///
/// A `PoolFactory` accumulates an ordered list of locators (or, instead, of
/// servers) and the connection attributes for the pools it creates. It is
/// obtained from [`Cache::get_pool_factory`](../cache/struct.Cache.html) and
/// is not consumed by [`create_pool`](#method.create_pool): the same factory
/// may create any number of pools, each of which takes a snapshot of the
/// configuration at the moment it is created.
///
/// Configuration methods take `&mut self` and return the factory so calls
/// can be chained:
///
/// ```rust,ignore
/// let mut factory = cache.get_pool_factory()?;
/// let pool = factory
///     .add_locator("host1", 10334)?
///     .add_locator("host2", 10334)?
///     .set_read_timeout(5000)?
///     .create_pool("default")?;
/// ```
///
/// A factory is not synchronized internally; share it between threads behind
/// a lock.
pub struct PoolFactory<E>
where
    E: Engine,
{
    handle: OwnedHandle<E>,
    cache: Weak<CacheData<E>>,
    attributes: PoolAttributes,
    discovery: Discovery,
    log: Logger,
}

impl<E> Debug for PoolFactory<E>
where
    E: Engine,
{
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("PoolFactory")
            .field("handle", &self.handle)
            .field("attributes", &self.attributes)
            .field("discovery", &self.discovery)
            .finish()
    }
}

impl<E> PoolFactory<E>
where
    E: Engine,
{
    pub(crate) fn new(
        handle: OwnedHandle<E>,
        cache: Weak<CacheData<E>>,
        log: Logger,
    ) -> Self {
        PoolFactory {
            handle,
            cache,
            attributes: PoolAttributes::default(),
            discovery: Discovery::Unconfigured,
            log,
        }
    }

    // Return the builder handle and the cache it belongs to, or
    // UseAfterDestroy if either one is gone.
    fn live(&self) -> Result<(NativeHandle, Arc<CacheData<E>>), Error> {
        let factory = self.handle.get()?;
        let cache = self
            .cache
            .upgrade()
            .ok_or(Error::UseAfterDestroy(HandleKind::Cache))?;
        cache.native_handle()?;
        Ok((factory, cache))
    }

    /// Append a locator. Locators are contacted in the order they are
    /// added. Only the host and port are checked here; resolution and
    /// reachability are left to the engine at pool creation. Duplicates are
    /// passed through as is.
    pub fn add_locator(
        &mut self,
        host: &str,
        port: u32,
    ) -> Result<&mut Self, Error> {
        self.add_endpoint(EndpointRole::Locator, host, port)?;
        Ok(self)
    }

    /// Append a server to connect to directly, bypassing locators. A factory
    /// uses either locators or servers.
    pub fn add_server(
        &mut self,
        host: &str,
        port: u32,
    ) -> Result<&mut Self, Error> {
        self.add_endpoint(EndpointRole::Server, host, port)?;
        Ok(self)
    }

    fn add_endpoint(
        &mut self,
        role: EndpointRole,
        host: &str,
        port: u32,
    ) -> Result<(), Error> {
        let (factory, _cache) = self.live()?;
        let endpoint = Endpoint::new(host, port)?;

        match (role, &self.discovery) {
            (EndpointRole::Locator, Discovery::Servers(_))
            | (EndpointRole::Server, Discovery::Locators(_)) => {
                return Err(Error::InvalidConfiguration(String::from(
                    "Cannot add both locators and servers to a pool",
                )));
            }
            _ => (),
        }

        let engine_host = engine_text(&endpoint.host)?;
        trace!(self.log, "forwarding {:?} {}", role, endpoint);
        let result = match role {
            EndpointRole::Locator => self.handle.engine().add_locator(
                factory,
                &engine_host,
                endpoint.port,
            ),
            EndpointRole::Server => self.handle.engine().add_server(
                factory,
                &engine_host,
                endpoint.port,
            ),
        };
        drop(engine_host);

        if let Err(e) = result {
            warn!(self.log, "engine rejected {:?} {}: {}", role, endpoint, e);
            return Err(e.into());
        }

        debug!(self.log, "added {:?} {}", role, endpoint);
        if !self.discovery.is_configured() {
            self.discovery = match role {
                EndpointRole::Locator => Discovery::Locators(Vec::new()),
                EndpointRole::Server => Discovery::Servers(Vec::new()),
            };
        }
        match &mut self.discovery {
            Discovery::Locators(entries) | Discovery::Servers(entries) => {
                entries.push(endpoint)
            }
            Discovery::Unconfigured => (),
        }
        Ok(())
    }

    // Apply `update` to a copy of the attributes and keep the result only if
    // it validates.
    fn update_attributes<U>(&mut self, update: U) -> Result<&mut Self, Error>
    where
        U: FnOnce(&mut PoolAttributes),
    {
        self.live()?;
        let mut candidate = self.attributes.clone();
        update(&mut candidate);
        candidate.validate()?;
        self.attributes = candidate;
        Ok(self)
    }

    /// Milliseconds to wait for a free connection. Must be non-zero.
    pub fn set_free_connection_timeout(
        &mut self,
        millis: u64,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.free_connection_timeout = millis)
    }

    pub fn set_load_conditioning_interval(
        &mut self,
        millis: u64,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.load_conditioning_interval = millis)
    }

    pub fn set_socket_buffer_size(
        &mut self,
        bytes: u32,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.socket_buffer_size = bytes)
    }

    pub fn set_read_timeout(&mut self, millis: u64) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.read_timeout = millis)
    }

    pub fn set_min_connections(
        &mut self,
        count: u32,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.min_connections = count)
    }

    /// `None` removes the upper bound.
    pub fn set_max_connections(
        &mut self,
        count: Option<u32>,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.max_connections = count)
    }

    /// `None` keeps idle connections open forever.
    pub fn set_idle_timeout(
        &mut self,
        millis: Option<u64>,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.idle_timeout = millis)
    }

    /// `None` tries every available server once.
    pub fn set_retry_attempts(
        &mut self,
        attempts: Option<u32>,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.retry_attempts = attempts)
    }

    pub fn set_ping_interval(
        &mut self,
        millis: u64,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.ping_interval = millis)
    }

    pub fn set_update_locator_list_interval(
        &mut self,
        millis: u64,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.update_locator_list_interval = millis)
    }

    pub fn set_statistic_interval(
        &mut self,
        millis: Option<u64>,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.statistic_interval = millis)
    }

    pub fn set_server_group(
        &mut self,
        group: &str,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.server_group = group.to_string())
    }

    pub fn set_pr_single_hop_enabled(
        &mut self,
        enabled: bool,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.pr_single_hop_enabled = enabled)
    }

    pub fn set_thread_local_connections(
        &mut self,
        enabled: bool,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.thread_local_connections = enabled)
    }

    pub fn set_multiuser_authentication(
        &mut self,
        enabled: bool,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| a.multiuser_authentication = enabled)
    }

    /// Route connections through an SNI proxy.
    pub fn set_sni_proxy(
        &mut self,
        host: &str,
        port: u32,
    ) -> Result<&mut Self, Error> {
        let proxy = EndpointConfig {
            host: host.to_string(),
            port,
        };
        self.update_attributes(|a| a.sni_proxy = Some(proxy))
    }

    /// Replace every attribute at once.
    pub fn set_attributes(
        &mut self,
        attributes: PoolAttributes,
    ) -> Result<&mut Self, Error> {
        self.update_attributes(|a| *a = attributes)
    }

    /// Apply a configuration: the attributes first, then the locators and
    /// servers in the order they are listed. Endpoints added before a
    /// failing entry stay added.
    pub fn configure(
        &mut self,
        config: &PoolConfig,
    ) -> Result<&mut Self, Error> {
        self.set_attributes(config.attributes.clone())?;
        for locator in config.locators.iter() {
            self.add_locator(&locator.host, locator.port)?;
        }
        for server in config.servers.iter() {
            self.add_server(&server.host, server.port)?;
        }
        Ok(self)
    }

    /// The locators added so far, in order.
    pub fn locators(&self) -> &[Endpoint] {
        match &self.discovery {
            Discovery::Locators(locators) => locators,
            _ => &[],
        }
    }

    /// The servers added so far, in order.
    pub fn servers(&self) -> &[Endpoint] {
        match &self.discovery {
            Discovery::Servers(servers) => servers,
            _ => &[],
        }
    }

    pub fn attributes(&self) -> &PoolAttributes {
        &self.attributes
    }

    /// Create a pool called `name` from the current configuration. The name
    /// must be unique among the live pools of the cache; the engine enforces
    /// this. Discovery and connection failures reported by the engine are
    /// returned unchanged. No pool exists unless this returns `Ok`. If the
    /// cache is closed while the engine is building the pool, the new pool
    /// is destroyed and `UseAfterDestroy(Cache)` is returned.
    pub fn create_pool(&mut self, name: &str) -> Result<Pool<E>, Error> {
        let (factory, cache) = self.live()?;

        if name.is_empty() {
            return Err(Error::InvalidConfiguration(String::from(
                "pool name must not be empty",
            )));
        }
        if !self.discovery.is_configured() {
            return Err(Error::InvalidConfiguration(format!(
                "pool {} has no locators or servers configured",
                name
            )));
        }
        self.attributes.validate()?;
        let engine_name = engine_text(name)?;

        let engine = self.handle.engine().clone();
        trace!(self.log, "creating pool {} with {}", name, self.discovery);
        let native = engine
            .set_attributes(factory, &self.attributes)
            .and_then(|_| engine.create_pool(factory, &engine_name))
            .map_err(|e| {
                warn!(self.log, "engine failed to create pool {}: {}", name, e);
                Error::from(e)
            })?;
        drop(engine_name);

        let pool_log = self.log.new(o!("pool" => name.to_string()));
        let handle =
            OwnedHandle::new(HandleKind::Pool, native, engine, pool_log.clone())?;
        let pool = Pool::new(name, handle, Arc::downgrade(&cache), pool_log);
        if let Err(e) = cache.register_pool(&pool) {
            pool.destroy();
            return Err(e);
        }
        pool.activate();

        info!(self.log, "pool created"; "pool" => name, "discovery" => %self.discovery);
        Ok(pool)
    }

    /// Release the engine builder. Pools created from this factory are not
    /// affected. Returns `true` only for the call that released the builder;
    /// every other method fails with `UseAfterDestroy` afterwards.
    pub fn destroy(&mut self) -> bool {
        let released = self.handle.release();
        if released {
            debug!(self.log, "pool factory destroyed");
        }
        released
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_released()
    }
}
