/// Cluster statistics: fetch, decode and emit
///
/// The `rethinkdb.stats` row keyed `["cluster"]` carries a `query_engine`
/// object with the counters reported here. A document that cannot be mapped
/// onto all five fields is rejected as a whole.
use crate::core::{ServerAddress, ServerSession};
use crate::error::PollError;
use crate::metrics::{host_tags, MetricEmitter, MetricSample};
use crate::protocol::Query;
use serde::{Deserialize, Deserializer};

/// Query-engine counters for the whole cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ClusterStats {
    #[serde(deserialize_with = "integral")]
    pub client_connections: i64,
    #[serde(deserialize_with = "integral")]
    pub clients_active: i64,
    #[serde(deserialize_with = "integral")]
    pub queries_per_sec: i64,
    #[serde(deserialize_with = "integral")]
    pub read_docs_per_sec: i64,
    #[serde(deserialize_with = "integral")]
    pub written_docs_per_sec: i64,
}

#[derive(Debug, Deserialize)]
struct StatsDocument {
    query_engine: ClusterStats,
}

/// Accepts integers and finite floats; floats are truncated toward zero
fn integral<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(value) = number.as_i64() {
        return Ok(value);
    }
    match number.as_f64() {
        Some(value) if value.is_finite() && value.abs() < i64::MAX as f64 => Ok(value.trunc() as i64),
        _ => Err(D::Error::custom(format!("number {} is out of range", number))),
    }
}

impl ClusterStats {
    /// Decode the stats row into the five counters
    pub fn from_document(document: serde_json::Value) -> Result<Self, PollError> {
        serde_json::from_value::<StatsDocument>(document)
            .map(|doc| doc.query_engine)
            .map_err(|e| PollError::decode(e.to_string()))
    }

    /// Samples emitted for one server, all tagged with its address
    pub fn samples(&self, address: &ServerAddress) -> Vec<MetricSample> {
        let tags = host_tags(address);
        [
            ("active_clients", self.clients_active),
            ("clients", self.client_connections),
            ("queries_per_sec", self.queries_per_sec),
            ("read_docs_per_sec", self.read_docs_per_sec),
            ("written_docs_per_sec", self.written_docs_per_sec),
        ]
        .into_iter()
        .map(|(name, value)| MetricSample::new(name, value, tags.clone()))
        .collect()
    }
}

/// Fetch and decode the cluster stats row
pub async fn fetch(session: &mut dyn ServerSession) -> Result<ClusterStats, PollError> {
    let rows = session
        .run(&Query::cluster_stats())
        .await
        .map_err(PollError::Fetch)?;

    let document = rows
        .into_iter()
        .next()
        .ok_or_else(|| PollError::decode("no cluster stats document returned"))?;

    ClusterStats::from_document(document)
}

/// Emit the five counters for one server as a single batch
pub fn emit(stats: &ClusterStats, address: &ServerAddress, acc: &dyn MetricEmitter) {
    acc.emit_batch(&stats.samples(address));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::testing::{stats_doc, FakeServer, FakeSession};
    use crate::metrics::MemoryAccumulator;
    use serde_json::json;

    #[test]
    fn test_decode_document() {
        let stats = ClusterStats::from_document(stats_doc(12, 3, 40, 300, 25)).unwrap();
        assert_eq!(
            stats,
            ClusterStats {
                client_connections: 12,
                clients_active: 3,
                queries_per_sec: 40,
                read_docs_per_sec: 300,
                written_docs_per_sec: 25,
            }
        );
    }

    #[test]
    fn test_decode_truncates_float_rates() {
        let doc = json!({
            "query_engine": {
                "client_connections": 2,
                "clients_active": 1,
                "queries_per_sec": 1.9832,
                "read_docs_per_sec": 0.5,
                "written_docs_per_sec": 7.0,
            }
        });
        let stats = ClusterStats::from_document(doc).unwrap();
        assert_eq!(stats.queries_per_sec, 1);
        assert_eq!(stats.read_docs_per_sec, 0);
        assert_eq!(stats.written_docs_per_sec, 7);
    }

    #[test]
    fn test_decode_rejects_partial_document() {
        let doc = json!({
            "query_engine": {
                "client_connections": 2,
                "clients_active": 1,
                "queries_per_sec": 10,
            }
        });
        let err = ClusterStats::from_document(doc).unwrap_err();
        assert!(err.to_string().contains("read_docs_per_sec"));
    }

    #[test]
    fn test_decode_rejects_wrong_types() {
        for doc in [
            json!({"id": ["cluster"]}),
            json!({"query_engine": null}),
            json!({"query_engine": {
                "client_connections": "12",
                "clients_active": 1,
                "queries_per_sec": 1,
                "read_docs_per_sec": 1,
                "written_docs_per_sec": 1,
            }}),
            json!({"query_engine": {
                "client_connections": null,
                "clients_active": 1,
                "queries_per_sec": 1,
                "read_docs_per_sec": 1,
                "written_docs_per_sec": 1,
            }}),
            json!([1, 2, 3]),
        ] {
            assert!(matches!(
                ClusterStats::from_document(doc),
                Err(PollError::Decode { .. })
            ));
        }
    }

    #[test]
    fn test_samples_are_tagged_with_host() {
        let stats = ClusterStats::from_document(stats_doc(12, 3, 40, 300, 25)).unwrap();
        let address = ServerAddress::new("10.0.0.1", 28015);
        let samples = stats.samples(&address);

        assert_eq!(samples.len(), 5);
        for sample in &samples {
            assert_eq!(sample.tags.len(), 1);
            assert_eq!(sample.tags.get("host").map(String::as_str), Some("10.0.0.1:28015"));
        }

        let value_of = |name: &str| samples.iter().find(|s| s.name == name).map(|s| s.value);
        assert_eq!(value_of("active_clients"), Some(3));
        assert_eq!(value_of("clients"), Some(12));
        assert_eq!(value_of("queries_per_sec"), Some(40));
        assert_eq!(value_of("read_docs_per_sec"), Some(300));
        assert_eq!(value_of("written_docs_per_sec"), Some(25));
    }

    #[tokio::test]
    async fn test_fetch_and_emit() {
        let mut session = FakeSession::new(FakeServer::healthy("rethinkdb 2.4.0", stats_doc(1, 2, 3, 4, 5)));
        let stats = fetch(&mut session).await.unwrap();

        let acc = MemoryAccumulator::new();
        emit(&stats, &ServerAddress::new("db1", 28015), &acc);
        assert_eq!(acc.len(), 5);
    }

    #[tokio::test]
    async fn test_fetch_without_document() {
        let mut session = FakeSession::new(FakeServer {
            stats: None,
            ..Default::default()
        });
        let err = fetch(&mut session).await.unwrap_err();
        assert!(matches!(err, PollError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_fetch_query_failure() {
        let mut session = FakeSession::new(FakeServer {
            fail_stats: true,
            ..Default::default()
        });
        let err = fetch(&mut session).await.unwrap_err();
        assert!(matches!(err, PollError::Fetch(_)));
    }
}
