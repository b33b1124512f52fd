/// Metric emission
///
/// `MetricEmitter` is the accumulator seam: pollers running on different
/// tasks call it concurrently, so implementations synchronize internally.
use crate::core::ServerAddress;
use crate::utils::escape_line_protocol;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Tag set attached to a sample
pub type Tags = BTreeMap<String, String>;

/// Measurement prefix used by the line-protocol writer
pub const MEASUREMENT_PREFIX: &str = "rethinkdb";

/// One emitted counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub name: String,
    pub value: i64,
    pub tags: Tags,
}

impl MetricSample {
    pub fn new<S: Into<String>>(name: S, value: i64, tags: Tags) -> Self {
        Self {
            name: name.into(),
            value,
            tags,
        }
    }
}

/// Tag set identifying a server: exactly `host = "<host>:<port>"`
pub fn host_tags(address: &ServerAddress) -> Tags {
    let mut tags = Tags::new();
    tags.insert("host".to_string(), address.to_string());
    tags
}

/// Sink for tagged metric samples
pub trait MetricEmitter: Send + Sync {
    /// Record one sample
    fn emit(&self, name: &str, value: i64, tags: &Tags);

    /// Record the samples of one server together
    fn emit_batch(&self, samples: &[MetricSample]) {
        for sample in samples {
            self.emit(&sample.name, sample.value, &sample.tags);
        }
    }
}

/// Accumulator keeping every sample in memory
#[derive(Debug, Default)]
pub struct MemoryAccumulator {
    samples: Mutex<Vec<MetricSample>>,
}

impl MemoryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far, in arrival order
    pub fn samples(&self) -> Vec<MetricSample> {
        self.lock().clone()
    }

    /// Samples carrying the given `host` tag
    pub fn samples_for_host(&self, host: &str) -> Vec<MetricSample> {
        self.lock()
            .iter()
            .filter(|s| s.tags.get("host").map(String::as_str) == Some(host))
            .cloned()
            .collect()
    }

    /// Value of a named sample for one host
    pub fn value(&self, name: &str, host: &str) -> Option<i64> {
        self.samples_for_host(host)
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| s.value)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return all samples
    pub fn drain(&self) -> Vec<MetricSample> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MetricSample>> {
        // A panicking emitter cannot leave the Vec half-written
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MetricEmitter for MemoryAccumulator {
    fn emit(&self, name: &str, value: i64, tags: &Tags) {
        self.lock().push(MetricSample::new(name, value, tags.clone()));
    }

    fn emit_batch(&self, samples: &[MetricSample]) {
        self.lock().extend_from_slice(samples);
    }
}

/// Writes samples as InfluxDB line protocol, e.g.
/// `rethinkdb_clients,host=10.0.0.1:28015 value=12i 1700000000000000000`
pub struct LineProtocolWriter<W: Write + Send> {
    out: Mutex<W>,
    prefix: String,
}

impl<W: Write + Send> LineProtocolWriter<W> {
    pub fn new(out: W) -> Self {
        Self::with_prefix(out, MEASUREMENT_PREFIX)
    }

    pub fn with_prefix<S: Into<String>>(out: W, prefix: S) -> Self {
        Self {
            out: Mutex::new(out),
            prefix: prefix.into(),
        }
    }

    /// Format one line without the trailing newline
    pub fn format_line(&self, name: &str, value: i64, tags: &Tags, timestamp_ns: u128) -> String {
        let mut line = if self.prefix.is_empty() {
            escape_line_protocol(name)
        } else {
            escape_line_protocol(&format!("{}_{}", self.prefix, name))
        };
        for (key, val) in tags {
            line.push(',');
            line.push_str(&escape_line_protocol(key));
            line.push('=');
            line.push_str(&escape_line_protocol(val));
        }
        line.push_str(&format!(" value={}i {}", value, timestamp_ns));
        line
    }

    /// Consume the writer and return the underlying sink
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lines(&self, lines: &[String]) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for line in lines {
            if let Err(e) = writeln!(out, "{}", line) {
                tracing::warn!("Failed to write metric line: {}", e);
                return;
            }
        }
        if let Err(e) = out.flush() {
            tracing::warn!("Failed to flush metric output: {}", e);
        }
    }
}

impl<W: Write + Send> MetricEmitter for LineProtocolWriter<W> {
    fn emit(&self, name: &str, value: i64, tags: &Tags) {
        let line = self.format_line(name, value, tags, now_ns());
        self.write_lines(&[line]);
    }

    fn emit_batch(&self, samples: &[MetricSample]) {
        let now = now_ns();
        let lines: Vec<String> = samples
            .iter()
            .map(|s| self.format_line(&s.name, s.value, &s.tags, now))
            .collect();
        self.write_lines(&lines);
    }
}

fn now_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
