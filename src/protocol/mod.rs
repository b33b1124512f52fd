/// RethinkDB JSON wire protocol
///
/// Only what the collector needs: the V0_4 handshake, token-framed JSON
/// queries and the handful of terms used to read the `rethinkdb` system
/// database.
pub mod codec;

pub use codec::{Frame, FrameCodec, Handshake};

use crate::error::ProtocolError;
use serde::Deserialize;
use serde_json::{json, Value};

/// `VersionDummy::V0_4`
pub const PROTOCOL_V0_4: u32 = 0x400c_2d20;
/// `VersionDummy::Protocol::JSON`
pub const PROTOCOL_JSON: u32 = 0x7e69_70c7;

/// System database holding the status and stats tables
pub const SYSTEM_DB: &str = "rethinkdb";

mod term {
    pub const MAKE_ARRAY: u64 = 2;
    pub const DB: u64 = 14;
    pub const TABLE: u64 = 15;
    pub const GET: u64 = 16;
}

mod query_type {
    pub const START: u64 = 1;
    pub const STOP: u64 = 3;
}

/// Queries the collector issues
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// `r.db(db).table(table)`
    Table { db: String, table: String },
    /// `r.db(db).table(table).get(key)`
    Get { db: String, table: String, key: Value },
}

impl Query {
    /// Status rows of every server in the cluster
    pub fn server_status() -> Self {
        Query::Table {
            db: SYSTEM_DB.to_string(),
            table: "server_status".to_string(),
        }
    }

    /// Cluster-wide stats row, keyed `["cluster"]`
    pub fn cluster_stats() -> Self {
        Query::Get {
            db: SYSTEM_DB.to_string(),
            table: "stats".to_string(),
            key: json!(["cluster"]),
        }
    }

    /// Serialized ReQL term tree
    pub fn term(&self) -> Value {
        match self {
            Query::Table { db, table } => table_term(db, table),
            Query::Get { db, table, key } => {
                json!([term::GET, [table_term(db, table), datum(key)]])
            }
        }
    }

    /// Serialized START message for this query
    pub fn start_message(&self) -> Value {
        json!([query_type::START, self.term(), {}])
    }
}

/// Serialized STOP message, sent to release a partial sequence
pub fn stop_message() -> Value {
    json!([query_type::STOP])
}

fn table_term(db: &str, table: &str) -> Value {
    json!([term::TABLE, [[term::DB, [db]], table]])
}

/// Arrays are not literals in ReQL; they go through MAKE_ARRAY
fn datum(value: &Value) -> Value {
    match value {
        Value::Array(items) => json!([term::MAKE_ARRAY, items.iter().map(datum).collect::<Vec<_>>()]),
        other => other.clone(),
    }
}

/// Response types sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Atom,
    Sequence,
    Partial,
    ClientError,
    CompileError,
    RuntimeError,
}

impl ResponseKind {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(ResponseKind::Atom),
            2 => Some(ResponseKind::Sequence),
            3 => Some(ResponseKind::Partial),
            16 => Some(ResponseKind::ClientError),
            17 => Some(ResponseKind::CompileError),
            18 => Some(ResponseKind::RuntimeError),
            _ => None,
        }
    }

    fn error_name(&self) -> Option<&'static str> {
        match self {
            ResponseKind::ClientError => Some("client"),
            ResponseKind::CompileError => Some("compile"),
            ResponseKind::RuntimeError => Some("runtime"),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    t: u64,
    #[serde(default)]
    r: Vec<Value>,
}

/// Decoded query response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub kind: ResponseKind,
    pub rows: Vec<Value>,
}

impl Response {
    /// Decode a response payload, turning server-side errors into `ProtocolError::Server`
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawResponse = serde_json::from_slice(payload)?;
        let kind = ResponseKind::from_code(raw.t).ok_or(ProtocolError::UnexpectedResponse(raw.t))?;

        if let Some(name) = kind.error_name() {
            let message = match raw.r.first() {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.to_string(),
                None => "no error message".to_string(),
            };
            return Err(ProtocolError::Server {
                kind: name.to_string(),
                message,
            });
        }

        let rows = match kind {
            // An atom is a single datum: null means nothing, an array is its elements
            ResponseKind::Atom => match raw.r.into_iter().next() {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items,
                Some(value) => vec![value],
            },
            _ => raw.r,
        };

        Ok(Self { kind, rows })
    }

    pub fn is_partial(&self) -> bool {
        self.kind == ResponseKind::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_status_term() {
        let query = Query::server_status();
        assert_eq!(
            query.start_message().to_string(),
            r#"[1,[15,[[14,["rethinkdb"]],"server_status"]],{}]"#
        );
    }

    #[test]
    fn test_cluster_stats_term() {
        let query = Query::cluster_stats();
        assert_eq!(
            query.term().to_string(),
            r#"[16,[[15,[[14,["rethinkdb"]],"stats"]],[2,["cluster"]]]]"#
        );
        assert_eq!(stop_message().to_string(), "[3]");
    }

    #[test]
    fn test_parse_sequence_response() {
        let response = Response::parse(br#"{"t":2,"r":[{"id":1},{"id":2}]}"#).unwrap();
        assert_eq!(response.kind, ResponseKind::Sequence);
        assert_eq!(response.rows.len(), 2);
        assert!(!response.is_partial());
    }

    #[test]
    fn test_parse_atom_response() {
        let response = Response::parse(br#"{"t":1,"r":[{"id":["cluster"]}]}"#).unwrap();
        assert_eq!(response.rows, vec![json!({"id": ["cluster"]})]);

        let empty = Response::parse(br#"{"t":1,"r":[null]}"#).unwrap();
        assert!(empty.rows.is_empty());

        let array = Response::parse(br#"{"t":1,"r":[[1,2,3]]}"#).unwrap();
        assert_eq!(array.rows.len(), 3);
    }

    #[test]
    fn test_parse_error_response() {
        let err = Response::parse(br#"{"t":18,"r":["Table `rethinkdb.nope` does not exist."],"b":[]}"#)
            .unwrap_err();
        match err {
            ProtocolError::Server { kind, message } => {
                assert_eq!(kind, "runtime");
                assert!(message.contains("does not exist"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_response_type() {
        assert!(matches!(
            Response::parse(br#"{"t":99,"r":[]}"#),
            Err(ProtocolError::UnexpectedResponse(99))
        ));
        assert!(matches!(Response::parse(b"not json"), Err(ProtocolError::Json(_))));
    }
}
