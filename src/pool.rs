// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::fmt::Result as FmtResult;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use slog::{debug, info, Logger};

use crate::cache::CacheData;
use crate::engine::{Engine, NativeHandle};
use crate::error::Error;
use crate::handle::OwnedHandle;

/// Sum type representing the lifecycle of a pool. Transitions only move
/// forward: created, active, destroyed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoolState {
    /// The engine has built the pool and it is being registered with its
    /// cache. `create_pool` never returns a pool in this state, but another
    /// thread may see it through `Cache::find_pool` for that short window.
    Created,
    /// The pool may be handed to dependent subsystems.
    Active,
    /// The engine pool has been released. Every further use is an error.
    Destroyed,
}

impl fmt::Display for PoolState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PoolState::Created => fmt.write_str("created"),
            PoolState::Active => fmt.write_str("active"),
            PoolState::Destroyed => fmt.write_str("destroyed"),
        }
    }
}

struct PoolSlot<E>
where
    E: Engine,
{
    handle: OwnedHandle<E>,
    state: PoolState,
}

struct PoolData<E>
where
    E: Engine,
{
    name: String,
    slot: Mutex<PoolSlot<E>>,
    cache: Weak<CacheData<E>>,
    log: Logger,
}

impl<E> Drop for PoolData<E>
where
    E: Engine,
{
    // The last clone went away without an explicit destroy.
    fn drop(&mut self) {
        let slot = match self.slot.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.state = PoolState::Destroyed;
        if slot.handle.release() {
            info!(self.log, "pool released on drop");
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.prune_pool(&self.name);
        }
    }
}

/// A non-owning reference to a pool, as kept by the cache registry.
pub(crate) struct WeakPool<E>
where
    E: Engine,
{
    data: Weak<PoolData<E>>,
}

impl<E> WeakPool<E>
where
    E: Engine,
{
    pub(crate) fn upgrade(&self) -> Option<Pool<E>> {
        self.data.upgrade().map(|data| Pool { data })
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.data.strong_count() == 0
    }

    pub(crate) fn refers_to(&self, pool: &Pool<E>) -> bool {
        Weak::ptr_eq(&self.data, &Arc::downgrade(&pool.data))
    }
}

/// A named connection pool to the servers of a cluster.
///
/// `Pool` is a cheap handle: clones refer to the same engine pool and may be
/// used from several threads. Destroying any clone destroys the pool for all
/// of them. Dropping the last clone releases the engine pool as well.
pub struct Pool<E>
where
    E: Engine,
{
    data: Arc<PoolData<E>>,
}

impl<E> Clone for Pool<E>
where
    E: Engine,
{
    fn clone(&self) -> Pool<E> {
        Pool {
            data: Arc::clone(&self.data),
        }
    }
}

impl<E> Debug for Pool<E>
where
    E: Engine,
{
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Pool")
            .field("name", &self.data.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<E> Pool<E>
where
    E: Engine,
{
    pub(crate) fn new(
        name: &str,
        handle: OwnedHandle<E>,
        cache: Weak<CacheData<E>>,
        log: Logger,
    ) -> Self {
        Pool {
            data: Arc::new(PoolData {
                name: name.to_string(),
                slot: Mutex::new(PoolSlot {
                    handle,
                    state: PoolState::Created,
                }),
                cache,
                log,
            }),
        }
    }

    // Lock poisoning only means another thread panicked while holding the
    // lock. The slot is always left consistent, so carry on.
    fn slot_lock(&self) -> MutexGuard<PoolSlot<E>> {
        self.data
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn activate(&self) {
        let mut slot = self.slot_lock();
        if slot.state == PoolState::Created {
            slot.state = PoolState::Active;
            debug!(self.data.log, "pool activated");
        }
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn state(&self) -> PoolState {
        self.slot_lock().state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == PoolState::Destroyed
    }

    /// Return the engine handle of the pool for use by a dependent
    /// subsystem such as a region. Only an active pool can be handed out.
    pub fn native_handle(&self) -> Result<NativeHandle, Error> {
        let slot = self.slot_lock();
        match slot.state {
            PoolState::Active => slot.handle.get(),
            PoolState::Created => Err(Error::NotActive(self.data.name.clone())),
            PoolState::Destroyed => Err(Error::UseAfterDestroy(slot.handle.kind())),
        }
    }

    /// Destroy the pool, releasing the engine pool and all of its
    /// connections. It is up to the caller to make sure nothing still uses
    /// the pool. Destroying a destroyed pool does nothing. Returns `true`
    /// only for the call that released the pool.
    pub fn destroy(&self) -> bool {
        let released = {
            let mut slot = self.slot_lock();
            slot.state = PoolState::Destroyed;
            slot.handle.release()
        };

        if released {
            info!(self.data.log, "pool destroyed");
            if let Some(cache) = self.data.cache.upgrade() {
                cache.deregister_pool(self);
            }
        } else {
            debug!(self.data.log, "destroy called on destroyed pool");
        }
        released
    }

    pub(crate) fn downgrade(&self) -> WeakPool<E> {
        WeakPool {
            data: Arc::downgrade(&self.data),
        }
    }
}
