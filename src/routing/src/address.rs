use crate::error::{Error, Result};
use std::fmt;
use std::net::IpAddr;

/// `{addr, port}`. `str()` wraps IPv6 literals in brackets; equality
/// compares `(addr, port)` only (host-name case is preserved, not folded).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TCPAddress {
    pub addr: String,
    pub port: u16,
}

impl TCPAddress {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self { addr: addr.into(), port }
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.addr.parse::<IpAddr>(), Ok(IpAddr::V6(_)))
    }

    /// Parses `host[:port]` or `[ipv6]:port`, validating the port fits in
    /// 16 bits.
    pub fn parse(s: &str, default_port: u16) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('[') {
            let (addr, rest) = rest
                .split_once(']')
                .ok_or_else(|| Error::Uri(format!("unterminated IPv6 literal in '{s}'")))?;
            let port = match rest.strip_prefix(':') {
                Some(p) if !p.is_empty() => p
                    .parse()
                    .map_err(|_| Error::Uri(format!("bad port in '{s}'")))?,
                Some(_) => return Err(Error::Uri(format!("empty port in '{s}'"))),
                None => default_port,
            };
            return Ok(Self { addr: addr.to_string(), port });
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
                let port: u16 = port.parse().map_err(|_| Error::Uri(format!("bad port in '{s}'")))?;
                Ok(Self { addr: host.to_string(), port })
            }
            _ => Ok(Self { addr: s.to_string(), port: default_port }),
        }
    }
}

impl fmt::Display for TCPAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.addr, self.port)
        } else {
            write!(f, "{}:{}", self.addr, self.port)
        }
    }
}

/// A parsed RFC 3986-ish URI: `scheme://[user[:password]@]host[:port][/path][?query][#fragment]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uri {
    pub scheme: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path_segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub fragment: Option<String>,
}

impl Uri {
    pub fn query_get(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::Uri(format!("missing scheme in uri '{s}'")))?;
        if scheme.is_empty() {
            return Err(Error::Uri(format!("empty scheme in uri '{s}'")));
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((head, frag)) => (head, Some(frag.to_string())),
            None => (rest, None),
        };
        let (rest, query_raw) = match rest.split_once('?') {
            Some((head, q)) => (head, Some(q)),
            None => (rest, None),
        };

        let mut parts = rest.splitn(2, '/');
        let authority = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");
        let path_segments = path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();

        let (userinfo, hostport) = match authority.split_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, authority),
        };
        let (user, password) = match userinfo {
            Some(u) => match u.split_once(':') {
                Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
                None => (Some(u.to_string()), None),
            },
            None => (None, None),
        };

        let addr = TCPAddress::parse(hostport, 0)?;
        let port = if addr.port == 0 { None } else { Some(addr.port) };

        let mut query = Vec::new();
        if let Some(q) = query_raw {
            if !q.is_empty() {
                for pair in q.split('&') {
                    let (k, v) = pair
                        .split_once('=')
                        .ok_or_else(|| Error::Uri(format!("malformed query parameter '{pair}' in '{s}'")))?;
                    query.push((k.to_string(), v.to_string()));
                }
            }
        }

        Ok(Self {
            scheme: scheme.to_lowercase(),
            user,
            password,
            host: addr.addr,
            port,
            path_segments,
            query,
            fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_address_display_brackets_ipv6() {
        let a = TCPAddress::new("::1", 3306);
        assert_eq!(a.to_string(), "[::1]:3306");
        let b = TCPAddress::new("127.0.0.1", 3306);
        assert_eq!(b.to_string(), "127.0.0.1:3306");
    }

    #[test]
    fn tcp_address_equality_is_addr_and_port_only() {
        assert_eq!(TCPAddress::new("host", 1), TCPAddress::new("host", 1));
        assert_ne!(TCPAddress::new("host", 1), TCPAddress::new("host", 2));
    }

    #[test]
    fn tcp_address_parse_bracketed_ipv6_with_port() {
        let a = TCPAddress::parse("[::1]:3307", 3306).unwrap();
        assert_eq!(a.addr, "::1");
        assert_eq!(a.port, 3307);
    }

    #[test]
    fn uri_parses_metadata_cache_scheme() {
        let uri = Uri::parse("metadata-cache://cache/replicaset?role=SECONDARY&allow_primary_reads=yes").unwrap();
        assert_eq!(uri.scheme, "metadata-cache");
        assert_eq!(uri.host, "cache");
        assert_eq!(uri.path_segments, vec!["replicaset"]);
        assert_eq!(uri.query_get("role"), Some("SECONDARY"));
        assert_eq!(uri.query_get("allow_primary_reads"), Some("yes"));
    }

    #[test]
    fn uri_missing_scheme_is_error() {
        assert!(Uri::parse("cache/replicaset").is_err());
    }
}
