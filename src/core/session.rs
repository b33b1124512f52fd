/// Per-poll server sessions
///
/// A session is opened by a `Connector`, owned by exactly one poll task and
/// closed when that poll ends. Nothing here is shared between polls.
use super::ServerAddress;
use crate::error::{ConnectError, ProtocolError};
use crate::protocol::Query;
use async_trait::async_trait;
use serde_json::Value;

/// Opens sessions to RethinkDB nodes
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish one connection to the given server
    async fn connect(&self, address: &ServerAddress) -> Result<Box<dyn ServerSession>, ConnectError>;
}

/// A live connection to one server
#[async_trait]
pub trait ServerSession: Send {
    /// Run a query and return the rows of its first result batch.
    /// A `null` result yields no rows.
    async fn run(&mut self, query: &Query) -> Result<Vec<Value>, ProtocolError>;

    /// Release the connection. Errors are logged, never returned.
    async fn close(&mut self);
}
