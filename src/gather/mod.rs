/// Concurrent multi-server gather
///
/// One gather call resolves every configured address, then polls each
/// server on its own task. A poll owns its session from connect to close and
/// returns its outcome through the task's join handle, so no state is shared
/// between polls apart from the metric accumulator.
use crate::core::address::resolve_all;
use crate::core::{Connector, ServerAddress, ServerSession};
use crate::error::{AggregateError, GatherResult, PollError, ServerFailure};
use crate::metrics::MetricEmitter;
use crate::utils::format_duration;
use crate::{stats, version};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of polling one server
#[derive(Debug)]
pub struct GatherOutcome {
    pub address: ServerAddress,
    pub result: Result<(), PollError>,
}

impl GatherOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fans polls out over the configured servers
#[derive(Clone)]
pub struct Gatherer {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl Gatherer {
    /// `timeout` bounds a whole gather call; polls still running when it
    /// expires are abandoned and reported as timed out
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll every server and report all failures together
    pub async fn gather<S: AsRef<str>>(&self, servers: &[S], acc: Arc<dyn MetricEmitter>) -> GatherResult<()> {
        self.gather_until(servers, acc, CancellationToken::new()).await
    }

    /// Like `gather`, but stops early when `cancel` fires
    pub async fn gather_until<S: AsRef<str>>(
        &self,
        servers: &[S],
        acc: Arc<dyn MetricEmitter>,
        cancel: CancellationToken,
    ) -> GatherResult<()> {
        let started = std::time::Instant::now();
        let outcomes = self.poll_all(servers, acc, cancel).await?;
        let attempted = outcomes.len();

        let failures: Vec<ServerFailure> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome.result {
                Ok(()) => None,
                Err(error) => Some(ServerFailure {
                    address: outcome.address,
                    error,
                }),
            })
            .collect();

        info!(
            "Gathered {} of {} servers in {}",
            attempted - failures.len(),
            attempted,
            format_duration(started.elapsed())
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new(failures, attempted).into())
        }
    }

    /// Resolve the configured servers and poll each one, returning one
    /// outcome per server in configuration order.
    ///
    /// An invalid address fails the call before any server is contacted.
    /// With no servers configured the default address is polled inline.
    pub async fn poll_all<S: AsRef<str>>(
        &self,
        servers: &[S],
        acc: Arc<dyn MetricEmitter>,
        cancel: CancellationToken,
    ) -> Result<Vec<GatherOutcome>, crate::error::AddressError> {
        let addresses = resolve_all(servers)?;

        // Dropping this future cancels every poll it started
        let cancel = cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let deadline = Instant::now() + self.timeout;

        if addresses.is_empty() {
            let address = ServerAddress::default();
            debug!("No servers configured, polling default address {}", address);
            let outcome = guarded_poll(Arc::clone(&self.connector), address, acc, cancel, deadline).await;
            return Ok(vec![outcome]);
        }

        let handles: Vec<_> = addresses
            .iter()
            .cloned()
            .map(|address| {
                tokio::spawn(guarded_poll(
                    Arc::clone(&self.connector),
                    address,
                    Arc::clone(&acc),
                    cancel.clone(),
                    deadline,
                ))
            })
            .collect();

        let outcomes = join_all(handles)
            .await
            .into_iter()
            .zip(addresses)
            .map(|(joined, address)| match joined {
                Ok(outcome) => outcome,
                Err(e) => GatherOutcome {
                    address,
                    result: Err(PollError::Task(e.to_string())),
                },
            })
            .collect();

        Ok(outcomes)
    }
}

/// Run one poll, giving up at the deadline or on cancellation
async fn guarded_poll(
    connector: Arc<dyn Connector>,
    address: ServerAddress,
    acc: Arc<dyn MetricEmitter>,
    cancel: CancellationToken,
    deadline: Instant,
) -> GatherOutcome {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PollError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(PollError::TimedOut),
        result = poll_server(connector.as_ref(), &address, acc.as_ref()) => result,
    };

    match &result {
        Ok(()) => debug!("Gathered stats from {}", address),
        Err(e) => warn!("Failed to gather stats from {} ({} stage): {}", address, e.stage(), e),
    }

    GatherOutcome { address, result }
}

/// Connect, check the version, fetch and emit the stats of one server.
/// The session is closed on every path once it has been opened.
pub async fn poll_server(
    connector: &dyn Connector,
    address: &ServerAddress,
    acc: &dyn MetricEmitter,
) -> Result<(), PollError> {
    let mut session = connector.connect(address).await?;
    let result = poll_session(session.as_mut(), address, acc).await;
    session.close().await;
    result
}

async fn poll_session(
    session: &mut dyn ServerSession,
    address: &ServerAddress,
    acc: &dyn MetricEmitter,
) -> Result<(), PollError> {
    let version = version::check(session).await?;
    debug!("{} runs RethinkDB {}", address, version);

    let stats = stats::fetch(session).await?;
    stats::emit(&stats, address, acc);
    Ok(())
}
