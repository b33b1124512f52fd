/// Address resolution for configured server strings
use super::{ServerAddress, DEFAULT_PORT};
use crate::error::AddressError;
use url::Url;

/// Resolve a configured address into a `ServerAddress`
///
/// Strings carrying a scheme (`rethinkdb://db1:28015`) are parsed as URLs.
/// Anything else is taken as a literal `host[:port]` pair; bracketed IPv6
/// hosts are accepted. The port defaults to 28015 when omitted.
pub fn resolve(raw: &str) -> Result<ServerAddress, AddressError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid(raw, "address is empty"));
    }

    if trimmed.contains("://") {
        resolve_url(raw, trimmed)
    } else {
        resolve_host_port(raw, trimmed)
    }
}

/// Resolve every configured address, stopping at the first invalid one
pub fn resolve_all<S: AsRef<str>>(servers: &[S]) -> Result<Vec<ServerAddress>, AddressError> {
    servers.iter().map(|s| resolve(s.as_ref())).collect()
}

fn resolve_url(raw: &str, trimmed: &str) -> Result<ServerAddress, AddressError> {
    let url = Url::parse(trimmed).map_err(|e| invalid(raw, e.to_string()))?;

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => return Err(invalid(raw, "URL has no host")),
    };

    // Url keeps the brackets around IPv6 literals
    let host = host.trim_start_matches('[').trim_end_matches(']');

    // Url drops a port equal to the scheme default, so ask for it back
    let port = match url.port_or_known_default() {
        Some(0) => return Err(invalid(raw, "port must be greater than 0")),
        Some(port) => port,
        None => DEFAULT_PORT,
    };

    Ok(ServerAddress::new(host, port))
}

fn resolve_host_port(raw: &str, trimmed: &str) -> Result<ServerAddress, AddressError> {
    if let Some(rest) = trimmed.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| invalid(raw, "unterminated IPv6 host"))?;
        if host.is_empty() {
            return Err(invalid(raw, "host is empty"));
        }
        let port = match after {
            "" => DEFAULT_PORT,
            _ => match after.strip_prefix(':') {
                Some(port) => parse_port(raw, port)?,
                None => return Err(invalid(raw, "unexpected characters after IPv6 host")),
            },
        };
        return Ok(ServerAddress::new(host, port));
    }

    let (host, port) = match trimmed.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => {
            return Err(invalid(raw, "IPv6 hosts must be enclosed in brackets"))
        }
        Some((host, port)) => (host, parse_port(raw, port)?),
        None => (trimmed, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(invalid(raw, "host is empty"));
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(invalid(raw, "host contains invalid characters"));
    }

    Ok(ServerAddress::new(host, port))
}

fn parse_port(raw: &str, port: &str) -> Result<u16, AddressError> {
    match port.parse::<u16>() {
        Ok(0) => Err(invalid(raw, "port must be greater than 0")),
        Ok(port) => Ok(port),
        Err(e) => Err(invalid(raw, format!("invalid port '{}': {}", port, e))),
    }
}

fn invalid<S: Into<String>>(raw: &str, reason: S) -> AddressError {
    AddressError {
        address: raw.to_string(),
        reason: reason.into(),
    }
}
