//! Endpoint parsing for tcp:// and listen:// link addresses

use std::fmt;

use crate::protocol::defaults::PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Dial out to a waiting peer
    Connect { host: String, port: u16 },
    /// Accept exactly one incoming peer
    Listen { bind: String },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Connect { host, port } => write!(f, "tcp://{}:{}", bracket(host), port),
            Endpoint::Listen { bind } => write!(f, "listen://{}", bind),
        }
    }
}

/// Parse `tcp://host[:port]`, `listen://addr[:port]` or a bare `host[:port]`
/// (treated as tcp://).
pub fn parse_endpoint(s: &str) -> Option<Endpoint> {
    let s_trim = s.trim();
    let lower = s_trim.to_ascii_lowercase();
    let (scheme, rest) = match lower.find("://") {
        Some(i) => (&lower[..i], &s_trim[i + 3..]),
        None => ("tcp", s_trim),
    };
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return None;
    }

    let (host, port) = split_host_port(rest)?;
    match scheme {
        "tcp" => Some(Endpoint::Connect { host, port }),
        "listen" => Some(Endpoint::Listen {
            bind: format!("{}:{}", bracket(&host), port),
        }),
        _ => None,
    }
}

fn bracket(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

fn split_host_port(hp: &str) -> Option<(String, u16)> {
    // [v6]:port
    if let Some(inner) = hp.strip_prefix('[') {
        let (host, after) = inner.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if after.is_empty() => PORT,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match hp.rsplit_once(':') {
        Some((h, p)) if !h.is_empty() => Some((h.to_string(), p.parse().ok()?)),
        Some(_) => None,
        None => Some((hp.to_string(), PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        assert_eq!(
            parse_endpoint("tcp://192.168.1.20:5000"),
            Some(Endpoint::Connect {
                host: "192.168.1.20".into(),
                port: 5000
            })
        );
        assert_eq!(
            parse_endpoint("switch.local"),
            Some(Endpoint::Connect {
                host: "switch.local".into(),
                port: PORT
            })
        );
    }

    #[test]
    fn test_parse_listen() {
        assert_eq!(
            parse_endpoint("LISTEN://0.0.0.0"),
            Some(Endpoint::Listen {
                bind: format!("0.0.0.0:{}", PORT)
            })
        );
        assert_eq!(
            parse_endpoint("listen://[::1]:7000/"),
            Some(Endpoint::Listen {
                bind: "[::1]:7000".into()
            })
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_endpoint("usb://whatever"), None);
        assert_eq!(parse_endpoint("tcp://"), None);
        assert_eq!(parse_endpoint("tcp://host:notaport"), None);
        assert_eq!(parse_endpoint("tcp://:80"), None);
    }

    #[test]
    fn test_display_round_trip() {
        let ep = Endpoint::Connect {
            host: "10.0.0.2".into(),
            port: 4230,
        };
        assert_eq!(parse_endpoint(&ep.to_string()), Some(ep));
    }
}
