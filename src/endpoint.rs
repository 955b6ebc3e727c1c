// Copyright 2020 Joyent, Inc.

use std::fmt;

use base64;
use derive_more::{Display, From, Into};
use sha1::Sha1;

use crate::error::Error;

/// A base64 encoded identifier based on the endpoint name, host, and port.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, Into, Ord, PartialOrd, PartialEq,
)]
pub struct EndpointKey(String);
/// The host of a locator or server. Either a resolvable name or an IP
/// literal; resolution is left to the engine.
pub type EndpointHost = String;
/// The port number of an endpoint. This is a type alias for u16.
pub type EndpointPort = u16;
/// The concatenation of the endpoint host and port with a colon delimiter.
pub type EndpointName = String;

/// A locator or server address as supplied by the caller.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Endpoint {
    /// The concatenation of the host and port with a colon delimiter.
    pub name: EndpointName,
    pub host: EndpointHost,
    pub port: EndpointPort,
}

impl Endpoint {
    /// Validate `host` and `port` and return a new `Endpoint`. The port is
    /// taken as a `u32` so that out of range values from configuration
    /// surface as `InvalidConfiguration` instead of being truncated.
    pub fn new(host: &str, port: u32) -> Result<Self, Error> {
        if host.trim().is_empty() {
            return Err(Error::InvalidConfiguration(String::from(
                "endpoint host must not be empty",
            )));
        }
        if host.contains('\0') {
            return Err(Error::InvalidConfiguration(format!(
                "endpoint host {:?} contains a NUL byte",
                host
            )));
        }
        if port == 0 || port > u32::from(EndpointPort::max_value()) {
            return Err(Error::InvalidConfiguration(format!(
                "port {} for {} is outside 1-65535",
                port, host
            )));
        }

        let port = port as EndpointPort;
        Ok(Endpoint {
            name: endpoint_name(host, port),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.name, fmt)
    }
}

// Concatenate the host and port with a colon delimiter.
fn endpoint_name(host: &str, port: EndpointPort) -> EndpointName {
    [host, ":", &port.to_string()].concat()
}

/// Return a base64 encoded identifier based on the fields of the endpoint.
pub fn endpoint_key(endpoint: &Endpoint) -> EndpointKey {
    let mut sha1 = Sha1::new();
    sha1.update(endpoint.name.as_bytes());
    sha1.update(b"||");
    sha1.update(endpoint.port.to_string().as_bytes());
    sha1.update(b"||");
    sha1.update(endpoint.host.as_bytes());

    base64::encode(&sha1.digest().bytes()).into()
}
