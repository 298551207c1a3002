use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address the bridge daemon listens on for WebSocket connections.
///
/// The textual form is `host:port`; IPv6 hosts are written in brackets
/// (`[::1]:8000`). The same form is used in configuration files, the
/// environment and on the command line.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct ListenEndpoint {
    host: String,
    port: u16,
}

impl ListenEndpoint {
    /// Builds an endpoint from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or address literal.
    #[must_use]
    pub fn host(&self) -> &str {
        self.host.as_str()
    }

    /// TCP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ListenEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(formatter, "[{}]:{}", self.host, self.port)
        } else {
            write!(formatter, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ListenEndpoint {
    type Err = ListenEndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| ListenEndpointParseError::MissingPort(input.to_owned()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ListenEndpointParseError::MissingHost(input.to_owned()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ListenEndpointParseError::InvalidPort(input.to_owned()))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for ListenEndpoint {
    type Error = ListenEndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ListenEndpoint> for String {
    fn from(endpoint: ListenEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Errors encountered while parsing a [`ListenEndpoint`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenEndpointParseError {
    /// The `:port` suffix was absent.
    #[error("missing port in listen address '{0}'")]
    MissingPort(String),
    /// The host part was empty.
    #[error("missing host in listen address '{0}'")]
    MissingHost(String),
    /// The port was not a valid TCP port number.
    #[error("invalid port in listen address '{0}'")]
    InvalidPort(String),
}
