#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

use std::{fmt::Display, net::AddrParseError};

use serde::{Deserialize, Serialize};

use crate::{ssh::SshError, topology::TopologyError, warehouse::WarehouseError};

pub mod brand;
pub mod cli;
pub mod config;
pub mod hop;
pub mod parser;
pub mod ssh;
#[cfg(test)]
mod tests;
pub mod topology;
pub mod tracer;
pub mod warehouse;

/// Login pair used against routers, switches and firewalls.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keeps passwords out of debug logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug)]
pub enum PathTracerError {
    Config(String),
    Generic(String),
    Io(std::io::Error),
    Parse(String),
    Regex(regex::Error),
    Serde(String),
    Ssh(SshError),
    Topology(TopologyError),
    Warehouse(WarehouseError),
}

impl PartialEq for PathTracerError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl From<AddrParseError> for PathTracerError {
    fn from(err: AddrParseError) -> Self {
        PathTracerError::Parse(err.to_string())
    }
}

impl From<SshError> for PathTracerError {
    fn from(err: SshError) -> Self {
        PathTracerError::Ssh(err)
    }
}

impl From<WarehouseError> for PathTracerError {
    fn from(err: WarehouseError) -> Self {
        PathTracerError::Warehouse(err)
    }
}

impl From<TopologyError> for PathTracerError {
    fn from(err: TopologyError) -> Self {
        PathTracerError::Topology(err)
    }
}

impl From<std::io::Error> for PathTracerError {
    fn from(err: std::io::Error) -> Self {
        PathTracerError::Io(err)
    }
}

impl From<serde_json::Error> for PathTracerError {
    fn from(err: serde_json::Error) -> Self {
        PathTracerError::Serde(err.to_string())
    }
}

impl From<regex::Error> for PathTracerError {
    fn from(err: regex::Error) -> Self {
        PathTracerError::Regex(err)
    }
}

impl Display for PathTracerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathTracerError::Config(error) => write!(f, "Config error: {error}"),
            PathTracerError::Generic(error) => write!(f, "Generic error: {error}"),
            PathTracerError::Io(error) => write!(f, "IO error: {error}"),
            PathTracerError::Parse(error) => write!(f, "Parse error: {error}"),
            PathTracerError::Regex(error) => write!(f, "Regex error: {error}"),
            PathTracerError::Serde(error) => write!(f, "Serde error: {error}"),
            PathTracerError::Ssh(error) => write!(f, "SSH error: {error}"),
            PathTracerError::Topology(error) => write!(f, "Topology service error: {error}"),
            PathTracerError::Warehouse(error) => write!(f, "Warehouse error: {error}"),
        }
    }
}

impl std::error::Error for PathTracerError {}

#[cfg(test)]
pub(crate) fn setup_test_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_test_writer()
                .with_level(true),
        )
        .with(tracing_subscriber::EnvFilter::new("debug"))
        .try_init();
}
