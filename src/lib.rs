pub mod config;
pub mod error;
/// rethinkdb-gather - concurrent metrics collector for RethinkDB clusters
///
/// Each gather call polls every configured server at the same time:
/// it connects, checks that the node runs RethinkDB 2.x or newer, reads the
/// cluster-wide query-engine counters and emits them tagged with the server's
/// address. Failures are collected per server and reported together.
pub mod core;
pub mod gather;
pub mod metrics;
pub mod protocol;
pub mod stats;
pub mod utils;
pub mod version;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use crate::config::{Config, GatherConfig};
pub use crate::core::{Connector, ReqlConnector, ServerAddress, ServerSession};
pub use crate::error::{AggregateError, GatherError, GatherResult, PollError, ServerFailure};
pub use crate::gather::{GatherOutcome, Gatherer};
pub use crate::metrics::{LineProtocolWriter, MemoryAccumulator, MetricEmitter, MetricSample};

const SAMPLE_CONFIG: &str = r#"
  ## An array of URI to gather stats about. Specify an ip or hostname
  ## with optional port, ie,
  ##   rethinkdb://10.10.3.30:28105,
  ##   10.0.0.1:10000, etc.
  servers = ["127.0.0.1:28015"]

  ## Seconds one gather call may take before unfinished servers are
  ## reported as timed out
  # timeout_sec = 10

  ## Seconds allowed for opening a single connection
  # connect_timeout_sec = 5
"#;

/// The RethinkDB input: a configured server list plus the connector and
/// deadline used to poll it
#[derive(Clone)]
pub struct RethinkDB {
    servers: Vec<String>,
    gatherer: Gatherer,
}

impl RethinkDB {
    /// Create an input that talks to real servers over TCP
    pub fn new(config: GatherConfig) -> Self {
        let connector = Arc::new(ReqlConnector::new(config.connect_timeout()));
        let timeout = config.timeout();
        Self::with_connector(config.servers, connector, timeout)
    }

    /// Create an input with a custom connector
    pub fn with_connector(servers: Vec<String>, connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self {
            servers,
            gatherer: Gatherer::new(connector, timeout),
        }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn description(&self) -> &'static str {
        "Read metrics from one or many RethinkDB servers"
    }

    pub fn sample_config(&self) -> &'static str {
        SAMPLE_CONFIG
    }

    /// Poll every configured server once
    pub async fn gather(&self, acc: Arc<dyn MetricEmitter>) -> GatherResult<()> {
        self.gatherer.gather(&self.servers, acc).await
    }

    /// Poll every configured server once, stopping early on cancellation
    pub async fn gather_until(&self, acc: Arc<dyn MetricEmitter>, cancel: CancellationToken) -> GatherResult<()> {
        self.gatherer.gather_until(&self.servers, acc, cancel).await
    }
}
