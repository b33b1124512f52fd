/// TCP transport to RethinkDB nodes
///
/// `ReqlConnector` dials a node, performs the V0_4 handshake and hands the
/// stream to a `ReqlSession`. Each session owns its stream outright; dropping
/// it closes the socket.
use super::session::{Connector, ServerSession};
use super::ServerAddress;
use crate::error::{ConnectError, ProtocolError};
use crate::protocol::{stop_message, Frame, FrameCodec, Handshake, Query, Response};
use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::Value;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 8192;

/// Connector speaking the RethinkDB JSON protocol over TCP
#[derive(Debug, Clone)]
pub struct ReqlConnector {
    /// Timeout covering TCP connect plus handshake
    connect_timeout: Duration,
    /// Legacy auth key sent in the handshake; empty means none
    auth_key: String,
}

impl ReqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            auth_key: String::new(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    async fn open(&self, address: &ServerAddress) -> Result<ReqlSession, ConnectError> {
        let target = address.connect_target();
        debug!("Connecting to RethinkDB at {}", target);

        let mut stream = TcpStream::connect(target.as_str()).await.map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::Refused,
            _ => ConnectError::Network(e),
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", target, e);
        }

        stream.write_all(&Handshake::request(&self.auth_key)).await?;

        let mut buf = BytesMut::with_capacity(64);
        let reply = loop {
            if let Some(reply) = Handshake::reply(&mut buf)? {
                break reply;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                return Err(ProtocolError::Closed.into());
            }
        };

        if reply != "SUCCESS" {
            return Err(ConnectError::Handshake(reply.trim().to_string()));
        }

        debug!("Handshake with {} complete", target);
        Ok(ReqlSession::new(stream, buf))
    }
}

impl Default for ReqlConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for ReqlConnector {
    async fn connect(&self, address: &ServerAddress) -> Result<Box<dyn ServerSession>, ConnectError> {
        match timeout(self.connect_timeout, self.open(address)).await {
            Ok(Ok(session)) => Ok(Box::new(session)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectError::Timeout(self.connect_timeout)),
        }
    }
}

/// An open, handshaken connection to one node
pub struct ReqlSession {
    stream: TcpStream,
    read_buf: BytesMut,
    next_token: u64,
}

impl ReqlSession {
    fn new(stream: TcpStream, read_buf: BytesMut) -> Self {
        Self {
            stream,
            read_buf,
            next_token: 1,
        }
    }

    async fn send(&mut self, token: u64, message: &Value) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(message)?;
        let mut out = BytesMut::new();
        FrameCodec::encode(token, &payload, &mut out)?;
        self.stream.write_all(&out).await?;
        Ok(())
    }

    async fn receive(&mut self, token: u64) -> Result<Response, ProtocolError> {
        let frame = self.read_frame().await?;
        if frame.token != token {
            return Err(ProtocolError::TokenMismatch {
                expected: token,
                actual: frame.token,
            });
        }
        Response::parse(&frame.payload)
    }

    async fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        loop {
            if let Some(frame) = FrameCodec::decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            self.read_buf.reserve(READ_BUFFER_SIZE);
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(ProtocolError::Closed);
            }
        }
    }
}

#[async_trait]
impl ServerSession for ReqlSession {
    async fn run(&mut self, query: &Query) -> Result<Vec<Value>, ProtocolError> {
        let token = self.next_token;
        self.next_token += 1;

        self.send(token, &query.start_message()).await?;
        let response = self.receive(token).await?;

        if response.is_partial() {
            // Only the first batch is used; release the cursor on the server
            self.send(token, &stop_message()).await?;
            match self.receive(token).await {
                Ok(_) | Err(ProtocolError::Server { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(response.rows)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error shutting down RethinkDB connection: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::spawn_fake_server;
    use super::*;
    use serde_json::json;

    fn address_of(addr: std::net::SocketAddr) -> ServerAddress {
        ServerAddress::new(addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_connector_defaults() {
        let connector = ReqlConnector::default();
        assert_eq!(connector.connect_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_and_run_query() {
        let addr = spawn_fake_server(
            "SUCCESS",
            vec![json!({"t": 2, "r": [{"process": {"version": "rethinkdb 2.4.1"}}]})],
        )
        .await;

        let connector = ReqlConnector::new(Duration::from_secs(2));
        let mut session = connector.connect(&address_of(addr)).await.unwrap();

        let rows = session.run(&Query::server_status()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["process"]["version"], "rethinkdb 2.4.1");

        session.close().await;
    }

    #[tokio::test]
    async fn test_partial_response_sends_stop() {
        let addr = spawn_fake_server(
            "SUCCESS",
            vec![
                json!({"t": 3, "r": [{"id": 1}]}),
                json!({"t": 2, "r": []}),
                json!({"t": 1, "r": [null]}),
            ],
        )
        .await;

        let connector = ReqlConnector::new(Duration::from_secs(2));
        let mut session = connector.connect(&address_of(addr)).await.unwrap();

        let rows = session.run(&Query::server_status()).await.unwrap();
        assert_eq!(rows, vec![json!({"id": 1})]);

        // The STOP reply was consumed, so the next query lines up with its own response
        let rows = session.run(&Query::cluster_stats()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let addr = spawn_fake_server("ERROR: Incorrect authorization key.", vec![]).await;

        let connector = ReqlConnector::new(Duration::from_secs(2));
        let result = connector.connect(&address_of(addr)).await;

        match result {
            Err(ConnectError::Handshake(message)) => {
                assert_eq!(message, "ERROR: Incorrect authorization key.")
            }
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("handshake should have been rejected"),
        }
    }

    #[tokio::test]
    async fn test_server_error_response() {
        let addr = spawn_fake_server(
            "SUCCESS",
            vec![json!({"t": 18, "r": ["Database `rethinkdb` does not exist."]})],
        )
        .await;

        let connector = ReqlConnector::new(Duration::from_secs(2));
        let mut session = connector.connect(&address_of(addr)).await.unwrap();

        let err = session.run(&Query::server_status()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Server { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = ReqlConnector::new(Duration::from_secs(2));
        let result = connector.connect(&address_of(addr)).await;
        assert!(matches!(result, Err(ConnectError::Refused)));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts the TCP connection but never answers the handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _conn = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let connector = ReqlConnector::new(Duration::from_millis(100));
        let result = connector.connect(&address_of(addr)).await;
        assert!(matches!(result, Err(ConnectError::Timeout(_))));
    }
}
