// Copyright 2020 Joyent, Inc.

use std::error::Error as StdError;
use std::fmt;

use crate::engine::HandleKind;

/// Error codes an engine may attach to a failed call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineErrorCode {
    /// An argument was rejected by the engine.
    IllegalArgument,
    /// The engine object is not in a state that allows the call, e.g. a
    /// builder with no discovery endpoints.
    IllegalState,
    /// None of the configured locators or servers could be reached.
    DiscoveryFailed,
    /// A pool with the requested name already exists on the cache.
    PoolExists,
    /// The engine does not know the handle it was given.
    InvalidHandle,
    /// Any engine-specific code without a dedicated variant.
    Other(i32),
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineErrorCode::IllegalArgument => fmt.write_str("illegal argument"),
            EngineErrorCode::IllegalState => fmt.write_str("illegal state"),
            EngineErrorCode::DiscoveryFailed => fmt.write_str("discovery failed"),
            EngineErrorCode::PoolExists => fmt.write_str("pool exists"),
            EngineErrorCode::InvalidHandle => fmt.write_str("invalid handle"),
            EngineErrorCode::Other(code) => write!(fmt, "engine code {}", code),
        }
    }
}

/// A failure reported by an [`Engine`](../engine/trait.Engine.html). The
/// message is carried verbatim.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineError {
    pub code: EngineErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new<S: Into<String>>(code: EngineErrorCode, message: S) -> Self {
        EngineError {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{} ({})", self.message, self.code)
    }
}

impl StdError for EngineError {}

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A locator, server, pool name or attribute failed local validation.
    /// Nothing was sent to the engine.
    InvalidConfiguration(String),
    /// The engine could not reach any configured locator or server.
    DiscoveryFailure(EngineError),
    /// The engine already has a live pool with the requested name.
    DuplicatePoolName(EngineError),
    /// The object was explicitly destroyed (or its cache was closed).
    UseAfterDestroy(HandleKind),
    /// The pool exists but has not been activated yet.
    NotActive(String),
    /// Any other engine failure, surfaced unmodified.
    EngineError(EngineError),
}

impl From<EngineError> for Error {
    fn from(error: EngineError) -> Self {
        match error.code {
            EngineErrorCode::DiscoveryFailed => Error::DiscoveryFailure(error),
            EngineErrorCode::PoolExists => Error::DuplicatePoolName(error),
            _ => Error::EngineError(error),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidConfiguration(err_str) => {
                write!(fmt, "invalid configuration: {}", err_str)
            }
            Error::DiscoveryFailure(err) => {
                write!(fmt, "discovery failure: {}", err)
            }
            Error::DuplicatePoolName(err) => {
                write!(fmt, "duplicate pool name: {}", err)
            }
            Error::UseAfterDestroy(kind) => {
                write!(fmt, "{} used after it was destroyed", kind)
            }
            Error::NotActive(name) => write!(fmt, "pool {} is not active", name),
            Error::EngineError(err) => fmt::Display::fmt(err, fmt),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::DiscoveryFailure(err)
            | Error::DuplicatePoolName(err)
            | Error::EngineError(err) => Some(err),
            _ => None,
        }
    }
}
