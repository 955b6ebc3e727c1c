// Copyright 2020 Joyent, Inc.

use std::fmt::Result as FmtResult;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use slog::{trace, warn, Logger};

use crate::engine::{Engine, HandleKind, NativeHandle};
use crate::error::{EngineError, EngineErrorCode, Error};

/// Owning wrapper around an engine resource. The resource is released
/// through the engine exactly once, either by an explicit `release` or when
/// the wrapper is dropped. After release the handle is zeroed and every
/// `get` fails with `UseAfterDestroy`.
pub struct OwnedHandle<E>
where
    E: Engine,
{
    kind: HandleKind,
    handle: Option<NativeHandle>,
    engine: Arc<E>,
    log: Logger,
}

impl<E> OwnedHandle<E>
where
    E: Engine,
{
    /// Take ownership of `handle`. A null handle is an engine contract
    /// violation; it is released nowhere and reported as `InvalidHandle`.
    pub fn new(
        kind: HandleKind,
        handle: NativeHandle,
        engine: Arc<E>,
        log: Logger,
    ) -> Result<Self, Error> {
        if handle.is_null() {
            warn!(log, "engine returned a null {} handle", kind);
            return Err(EngineError::new(
                EngineErrorCode::InvalidHandle,
                format!("engine returned a null {} handle", kind),
            )
            .into());
        }

        trace!(log, "took ownership of {} handle {}", kind, handle);
        Ok(OwnedHandle {
            kind,
            handle: Some(handle),
            engine,
            log,
        })
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn get(&self) -> Result<NativeHandle, Error> {
        self.handle.ok_or(Error::UseAfterDestroy(self.kind))
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Release the resource if it is still held. Returns `true` only for the
    /// call that performed the release.
    pub fn release(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                trace!(self.log, "releasing {} handle {}", self.kind, handle);
                self.engine.release(self.kind, handle);
                true
            }
            None => false,
        }
    }
}

impl<E> Debug for OwnedHandle<E>
where
    E: Engine,
{
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("OwnedHandle")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .finish()
    }
}

impl<E> Drop for OwnedHandle<E>
where
    E: Engine,
{
    fn drop(&mut self) {
        self.release();
    }
}
