// src/precheck.rs

//! Pre-condition checks run after a run is claimed and before any input is
//! touched: credentials present, required files in place, downstream systems
//! reachable.

use std::fmt;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::config::model::Preconditions;
use crate::fs::FileSystem;

/// One unmet pre-condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    /// Environment variable unset or empty.
    Credential(String),
    File(String),
    Unreachable { endpoint: String, reason: String },
    /// The warehouse the job reads or writes cannot be opened.
    Warehouse(String),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Credential(name) => write!(f, "credential missing: {name}"),
            Missing::File(path) => write!(f, "file missing: {path}"),
            Missing::Unreachable { endpoint, reason } => {
                write!(f, "endpoint unreachable: {endpoint} ({reason})")
            }
            Missing::Warehouse(reason) => write!(f, "warehouse unavailable: {reason}"),
        }
    }
}

pub struct PreconditionChecker<'a> {
    fs: &'a dyn FileSystem,
    connect_timeout: Duration,
}

impl<'a> PreconditionChecker<'a> {
    pub fn new(fs: &'a dyn FileSystem, connect_timeout: Duration) -> Self {
        Self {
            fs,
            connect_timeout,
        }
    }

    /// Check everything and report all that is missing (empty = all good).
    ///
    /// Each probe is attempted once.
    pub async fn check(&self, pre: &Preconditions) -> Vec<Missing> {
        let mut missing = Vec::new();

        for name in pre.env.iter() {
            let present = std::env::var(name)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if !present {
                missing.push(Missing::Credential(name.clone()));
            }
        }

        for path in pre.files.iter() {
            if !self.fs.is_file(path) {
                missing.push(Missing::File(path.display().to_string()));
            }
        }

        for endpoint in pre.reachable.iter() {
            if let Err(reason) = self.probe(endpoint).await {
                missing.push(Missing::Unreachable {
                    endpoint: endpoint.clone(),
                    reason,
                });
            }
        }

        debug!(missing = missing.len(), "pre-condition checks finished");
        missing
    }

    async fn probe(&self, endpoint: &str) -> Result<(), String> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "no answer within {}s",
                self.connect_timeout.as_secs()
            )),
        }
    }
}

/// Join missing pre-conditions into a single failure detail.
pub fn describe(missing: &[Missing]) -> String {
    missing
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
