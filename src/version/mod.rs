/// Server version gate
///
/// Reads the node's `server_status` row and rejects servers older than
/// RethinkDB 2.x. Only the major version is checked.
use crate::core::ServerSession;
use crate::error::VersionError;
use crate::protocol::Query;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::fmt;

/// Oldest major version the collector accepts
pub const MIN_SUPPORTED_MAJOR: u32 = 2;

lazy_static! {
    // Separators match any character, same as the `\d.\d.\d` pattern RethinkDB
    // version strings have historically been matched with
    static ref VERSION_PATTERN: Regex =
        Regex::new(r"([0-9]).([0-9]).([0-9])").expect("version pattern is valid");
}

/// Version reported by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Full `process.version` string, e.g. `rethinkdb 2.4.1~0bionic (GCC 7.3.0)`
    pub raw: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionInfo {
    /// Extract the first `d.d.d` triple from a self-reported version string
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let captures = VERSION_PATTERN.captures(raw).ok_or_else(|| VersionError::Malformed {
            raw: raw.to_string(),
        })?;

        let digit = |i: usize| -> u32 {
            captures
                .get(i)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or_default()
        };

        Ok(Self {
            raw: raw.to_string(),
            major: digit(1),
            minor: digit(2),
            patch: digit(3),
        })
    }

    pub fn is_supported(&self) -> bool {
        self.major >= MIN_SUPPORTED_MAJOR
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServerStatus {
    #[serde(default)]
    process: ProcessStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessStatus {
    #[serde(default)]
    version: Option<String>,
}

/// Check that the node behind `session` runs a supported version
pub async fn check(session: &mut dyn ServerSession) -> Result<VersionInfo, VersionError> {
    let rows = session
        .run(&Query::server_status())
        .await
        .map_err(VersionError::Query)?;

    let row = rows.into_iter().next().ok_or(VersionError::NoStatus)?;
    let status: ServerStatus = serde_json::from_value(row).map_err(VersionError::Unparseable)?;

    let raw = match status.process.version {
        Some(version) if !version.is_empty() => version,
        _ => return Err(VersionError::MissingVersion),
    };

    let version = VersionInfo::parse(&raw)?;
    if !version.is_supported() {
        return Err(VersionError::Unsupported {
            version: version.to_string(),
        });
    }

    tracing::debug!("Server reports version {} ({})", version, version.raw);
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::testing::{FakeServer, FakeSession};
    use serde_json::json;

    fn session_with_status(rows: Vec<serde_json::Value>) -> FakeSession {
        FakeSession::new(FakeServer {
            status_rows: rows,
            ..Default::default()
        })
    }

    #[test]
    fn test_parse_release_string() {
        let version = VersionInfo::parse("rethinkdb 2.4.1~0bionic (GCC 7.3.0)").unwrap();
        assert_eq!((version.major, version.minor, version.patch), (2, 4, 1));
        assert_eq!(version.to_string(), "2.4.1");
        assert_eq!(version.raw, "rethinkdb 2.4.1~0bionic (GCC 7.3.0)");
    }

    #[test]
    fn test_parse_without_match() {
        let err = VersionInfo::parse("rethinkdb unknown-build").unwrap_err();
        assert!(matches!(err, VersionError::Malformed { raw } if raw == "rethinkdb unknown-build"));
    }

    #[test]
    fn test_parse_accepts_any_separator() {
        let version = VersionInfo::parse("build 2-3-7").unwrap();
        assert_eq!(version.to_string(), "2.3.7");
    }

    #[test]
    fn test_major_version_gate() {
        assert!(!VersionInfo::parse("rethinkdb 1.9.1").unwrap().is_supported());
        assert!(VersionInfo::parse("rethinkdb 2.0.0").unwrap().is_supported());
        assert!(VersionInfo::parse("rethinkdb 3.1.0").unwrap().is_supported());
    }

    #[test]
    fn test_parse_two_digit_minor_is_malformed() {
        // Each component matches a single digit, so 1.16.2 has no triple
        let err = VersionInfo::parse("rethinkdb 1.16.2").unwrap_err();
        assert!(matches!(err, VersionError::Malformed { raw } if raw == "rethinkdb 1.16.2"));
    }

    #[tokio::test]
    async fn test_check_accepts_supported_version() {
        let mut session = session_with_status(vec![json!({"process": {"version": "rethinkdb 2.3.6"}})]);
        let version = check(&mut session).await.unwrap();
        assert_eq!(version.major, 2);
    }

    #[tokio::test]
    async fn test_check_rejects_major_one() {
        let mut session = session_with_status(vec![json!({"process": {"version": "rethinkdb 1.9.3"}})]);
        let err = check(&mut session).await.unwrap_err();
        assert!(matches!(err, VersionError::Unsupported { version } if version == "1.9.3"));
    }

    #[tokio::test]
    async fn test_check_no_rows() {
        let mut session = session_with_status(vec![]);
        assert!(matches!(check(&mut session).await, Err(VersionError::NoStatus)));
    }

    #[tokio::test]
    async fn test_check_missing_version() {
        for row in [
            json!({"process": {}}),
            json!({"process": {"version": ""}}),
            json!({"process": {"version": null}}),
            json!({"network": {}}),
        ] {
            let mut session = session_with_status(vec![row]);
            assert!(matches!(check(&mut session).await, Err(VersionError::MissingVersion)));
        }
    }

    #[tokio::test]
    async fn test_check_unparseable_status() {
        let mut session = session_with_status(vec![json!("not a document")]);
        assert!(matches!(check(&mut session).await, Err(VersionError::Unparseable(_))));

        let mut session = session_with_status(vec![json!({"process": {"version": 2}})]);
        assert!(matches!(check(&mut session).await, Err(VersionError::Unparseable(_))));
    }

    #[tokio::test]
    async fn test_check_malformed_version() {
        let mut session = session_with_status(vec![json!({"process": {"version": "rethinkdb dev"}})]);
        assert!(matches!(check(&mut session).await, Err(VersionError::Malformed { .. })));
    }
}
