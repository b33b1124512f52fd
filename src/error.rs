/// Unified error handling for rethinkdb-gather
///
/// Errors fall into two groups. Address errors are raised while the
/// configured server list is resolved and abort a gather call before any
/// network I/O. Everything else happens inside a single server's poll and is
/// captured as a `PollError`, tagged with the server it belongs to and the
/// stage that failed, then reported through `AggregateError`.

use crate::core::ServerAddress;
use std::fmt;
use std::io;
use thiserror::Error;

/// Top-level error returned by a gather call
#[derive(Debug, Error)]
pub enum GatherError {
    /// A configured address could not be parsed; no server was contacted
    #[error(transparent)]
    Address(#[from] AddressError),

    /// One or more servers failed; every failure is listed
    #[error(transparent)]
    Servers(#[from] AggregateError),
}

/// Invalid server address in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unable to parse address '{address}': {reason}")]
pub struct AddressError {
    pub address: String,
    pub reason: String,
}

/// Failure to establish a session with a server
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection refused")]
    Refused,

    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("network error: {0}")]
    Network(#[from] io::Error),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("protocol error during handshake: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Wire-level errors raised by the RethinkDB transport
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid frame: {message}")]
    Frame { message: String },

    #[error("response token {actual} does not match query token {expected}")]
    TokenMismatch { expected: u64, actual: u64 },

    #[error("{kind} error from server: {message}")]
    Server { kind: String, message: String },

    #[error("unexpected response type {0}")]
    UnexpectedResponse(u64),

    #[error("connection closed by server")]
    Closed,
}

/// Reasons a node fails the version gate
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("server_status query failed: {0}")]
    Query(#[source] ProtocolError),

    #[error("could not determine the RethinkDB server version: no rows returned from the server_status table")]
    NoStatus,

    #[error("could not parse server_status document: {0}")]
    Unparseable(#[source] serde_json::Error),

    #[error("could not determine the RethinkDB server version: process.version key missing")]
    MissingVersion,

    #[error("could not determine the RethinkDB server version: malformed version string ({raw})")]
    Malformed { raw: String },

    #[error("unsupported version {version}")]
    Unsupported { version: String },
}

/// Error raised while polling a single server
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Unable to connect to RethinkDB, {0}")]
    Connect(#[from] ConnectError),

    #[error("Failed version validation, {0}")]
    Version(#[from] VersionError),

    #[error("cluster stats query error, {0}")]
    Fetch(#[source] ProtocolError),

    #[error("failure to parse cluster stats, {message}")]
    Decode { message: String },

    #[error("poll did not finish before the gather deadline")]
    TimedOut,

    #[error("poll cancelled")]
    Cancelled,

    #[error("poll task failed: {0}")]
    Task(String),
}

/// The stage of a poll at which an error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connect,
    Version,
    Fetch,
    Decode,
    Cancelled,
    Task,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Connect => write!(f, "connect"),
            Stage::Version => write!(f, "version"),
            Stage::Fetch => write!(f, "fetch"),
            Stage::Decode => write!(f, "decode"),
            Stage::Cancelled => write!(f, "cancelled"),
            Stage::Task => write!(f, "task"),
        }
    }
}

impl PollError {
    pub fn decode<S: Into<String>>(message: S) -> Self {
        PollError::Decode {
            message: message.into(),
        }
    }

    /// Stage of the poll that produced this error
    pub fn stage(&self) -> Stage {
        match self {
            PollError::Connect(_) => Stage::Connect,
            PollError::Version(_) => Stage::Version,
            PollError::Fetch(_) => Stage::Fetch,
            PollError::Decode { .. } => Stage::Decode,
            PollError::TimedOut | PollError::Cancelled => Stage::Cancelled,
            PollError::Task(_) => Stage::Task,
        }
    }

    /// Check if the failure is likely to clear up on the next gather cycle
    pub fn is_transient(&self) -> bool {
        match self {
            PollError::Connect(_) => true,
            PollError::Fetch(_) => true,
            PollError::TimedOut | PollError::Cancelled => true,
            PollError::Version(VersionError::Query(_)) => true,
            _ => false,
        }
    }
}

/// A failed poll, tagged with the server it targeted
#[derive(Debug, Error)]
#[error("{address} ({stage}): {error}", stage = .error.stage())]
pub struct ServerFailure {
    pub address: ServerAddress,
    #[source]
    pub error: PollError,
}

/// Every per-server failure of one gather call
#[derive(Debug)]
pub struct AggregateError {
    pub failures: Vec<ServerFailure>,
    pub attempted: usize,
}

impl AggregateError {
    pub fn new(failures: Vec<ServerFailure>, attempted: usize) -> Self {
        Self {
            failures,
            attempted,
        }
    }

    /// Addresses of the failing servers, in configuration order
    pub fn failed_servers(&self) -> Vec<&ServerAddress> {
        self.failures.iter().map(|f| &f.address).collect()
    }

    /// Look up the failure for one server
    pub fn failure_for(&self, address: &ServerAddress) -> Option<&ServerFailure> {
        self.failures.iter().find(|f| &f.address == address)
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} servers failed: ",
            self.failures.len(),
            self.attempted
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Result type alias for gather calls
pub type GatherResult<T> = Result<T, GatherError>;

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Configuration is broken; nothing was gathered
    Critical,
    /// Every server failed
    Error,
    /// Some servers failed, others reported
    Warning,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
        }
    }
}

impl GatherError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GatherError::Address(_) => ErrorSeverity::Critical,
            GatherError::Servers(agg) if agg.failures.len() >= agg.attempted => {
                ErrorSeverity::Error
            }
            GatherError::Servers(_) => ErrorSeverity::Warning,
        }
    }
}
