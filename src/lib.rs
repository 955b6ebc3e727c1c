// Copyright 2020 Joyent, Inc.

//! Locator-based pool configuration for a distributed data grid client
//!
//! Clients of an in-memory data grid do not talk to a hard-coded list of cache
//! servers. Instead they describe a *pool*: a named set of connections whose
//! servers are discovered through one or more *locators*, lightweight
//! processes that only know which servers are currently available. This crate
//! implements the client side contract for describing, building and tearing
//! down such pools. The discovery handshakes, connection management, load
//! balancing and failover are performed by an *engine*, an implementation of
//! the [`Engine`](engine/trait.Engine.html) trait.
//!
//! ## Caches, factories and pools
//!
//! A [`Cache`](cache/struct.Cache.html) hands out
//! [`PoolFactory`](pool_factory/struct.PoolFactory.html) builders. A factory
//! accumulates an ordered list of locators (or, alternatively, of servers to
//! connect to directly) plus connection attributes such as timeouts and
//! connection limits. Calling `create_pool` on the factory asks the engine to
//! finalize the current configuration into a named
//! [`Pool`](pool/struct.Pool.html). The factory is not consumed and may go on
//! to create further pools; a pool is a snapshot of the factory configuration
//! at the time it was created.
//!
//! Locators are handed to the engine in the order they were added. Engines
//! use that order as the discovery priority.
//!
//! ## Ownership of engine resources
//!
//! Caches, factories and pools each own one engine resource. The resource is
//! released exactly once, either by an explicit `close`/`destroy` or when the
//! owning value is dropped. Once released, every further use fails locally
//! with `Error::UseAfterDestroy` and is never forwarded to the engine.
//!
//! ## Errors
//!
//! Malformed locators, pool names and attributes are rejected with
//! `Error::InvalidConfiguration` before anything reaches the engine. Failures
//! reported by the engine are returned as is: `DiscoveryFailure` when no
//! locator could be reached, `DuplicatePoolName` when the name is taken, and
//! `EngineError` for anything else. Nothing is retried at this layer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use geode_pool::cache::{Cache, CacheOptions};
//! use geode_pool_memory_engine::InMemoryEngine;
//!
//! let engine = Arc::new(InMemoryEngine::new(None));
//! let cache = Cache::new(engine, CacheOptions::default())?;
//!
//! let mut factory = cache.get_pool_factory()?;
//! let pool = factory
//!     .add_locator("host1", 10334)?
//!     .add_locator("host2", 10334)?
//!     .create_pool("default")?;
//!
//! // Hand pool.native_handle()? to regions and queries.
//!
//! pool.destroy();
//! factory.destroy();
//! cache.close();
//! ```

#![allow(missing_docs)]

pub mod cache;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod handle;
pub mod pool;
pub mod pool_factory;
