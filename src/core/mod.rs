/// Core abstractions shared by the version gate, the stats decoder and the
/// gather orchestrator
pub mod address;
pub mod connection;
pub mod session;

pub use address::resolve;
pub use connection::{ReqlConnector, ReqlSession};
pub use session::{Connector, ServerSession};

use std::fmt;

/// Default RethinkDB client driver port
pub const DEFAULT_PORT: u16 = 28015;

/// Host used to dial an address whose host part is empty
pub const DEFAULT_HOST: &str = "localhost";

/// Normalized address of one RethinkDB node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address actually dialed; an empty host means localhost
    pub fn connect_target(&self) -> String {
        if self.host.is_empty() {
            format!("{}:{}", DEFAULT_HOST, self.port)
        } else {
            self.to_string()
        }
    }
}

/// The address polled when no servers are configured: empty host, default port
impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("", DEFAULT_PORT)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
