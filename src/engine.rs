// Copyright 2020 Joyent, Inc.

use std::ffi::{CStr, CString};
use std::fmt;

use derive_more::{Display, From, Into};

use crate::error::{EngineError, Error};
use crate::pool_factory::types::PoolAttributes;

/// An opaque identifier for a resource owned by the engine. Zero is the null
/// handle.
#[derive(
    Clone, Copy, Debug, Display, Eq, From, Hash, Into, Ord, PartialOrd, PartialEq,
)]
pub struct NativeHandle(u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn is_null(self) -> bool {
        self == NativeHandle::NULL
    }
}

/// The kind of engine resource a handle refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HandleKind {
    Cache,
    PoolFactory,
    Pool,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandleKind::Cache => fmt.write_str("cache"),
            HandleKind::PoolFactory => fmt.write_str("pool factory"),
            HandleKind::Pool => fmt.write_str("pool"),
        }
    }
}

/// Engine boundary
///
/// The `Engine` trait is the seam between this crate and the implementation
/// that performs locator discovery, connection establishment, load balancing
/// and failover. Every call blocks until the engine has completed or failed
/// the operation. Failures are returned as an
/// [`EngineError`](../error/struct.EngineError.html) and are surfaced to the
/// caller unchanged apart from being classified; this crate never retries.
///
/// Text parameters are passed as `&CStr` produced by
/// [`engine_text`](fn.engine_text.html). The caller owns the text and frees
/// it when the call returns, whether or not the call succeeded.
pub trait Engine: Send + Sync + 'static {
    /// Allocate the engine side of a cache.
    fn create_cache(&self) -> Result<NativeHandle, EngineError>;
    /// Allocate a pool factory builder bound to `cache`.
    fn create_factory(
        &self,
        cache: NativeHandle,
    ) -> Result<NativeHandle, EngineError>;
    /// Append a locator to the builder. The engine must keep locators in
    /// the order they were appended; discovery priority follows it.
    fn add_locator(
        &self,
        factory: NativeHandle,
        host: &CStr,
        port: u16,
    ) -> Result<(), EngineError>;
    /// Append a static server to the builder.
    fn add_server(
        &self,
        factory: NativeHandle,
        host: &CStr,
        port: u16,
    ) -> Result<(), EngineError>;
    /// Replace the connection attributes held by the builder.
    fn set_attributes(
        &self,
        factory: NativeHandle,
        attributes: &PoolAttributes,
    ) -> Result<(), EngineError>;
    /// Finalize the builder into a pool called `name`. The pool takes a copy
    /// of the builder state; later changes to the builder do not reach it.
    fn create_pool(
        &self,
        factory: NativeHandle,
        name: &CStr,
    ) -> Result<NativeHandle, EngineError>;
    /// Release a cache, builder or pool. Called at most once per handle.
    fn release(&self, kind: HandleKind, handle: NativeHandle);
}

/// Convert `text` to the engine text encoding. The returned value lives for
/// the scope of the caller and is freed on every exit path.
pub fn engine_text(text: &str) -> Result<CString, Error> {
    CString::new(text).map_err(|_| {
        Error::InvalidConfiguration(format!(
            "{:?} cannot be passed to the engine: contains a NUL byte",
            text
        ))
    })
}
