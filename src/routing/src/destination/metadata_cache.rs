use super::round_robin::pick;
use super::round_robin_fallback::pick_with_fallback;
use super::RouteDestination;
use crate::address::{TCPAddress, Uri};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use router_metadata_cache::{lookup_cache, ManagedInstance, ServerMode};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFilter {
    Primary,
    Secondary,
    PrimaryAndSecondary,
}

impl RoleFilter {
    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PRIMARY" => Ok(Self::Primary),
            "SECONDARY" => Ok(Self::Secondary),
            "PRIMARY_AND_SECONDARY" => Ok(Self::PrimaryAndSecondary),
            other => Err(Error::Config(format!(
                "unknown role '{other}', expected PRIMARY, SECONDARY, or PRIMARY_AND_SECONDARY"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `first-available` and `next-available` are the same fail-forward
    /// algorithm (§4.5.1) under two option-file spellings.
    NextAvailable,
    RoundRobin,
    RoundRobinWithFallback,
}

impl Strategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "first-available" | "next-available" => Ok(Self::NextAvailable),
            "round-robin" => Ok(Self::RoundRobin),
            "round-robin-with-fallback" => Ok(Self::RoundRobinWithFallback),
            other => Err(Error::Config(format!(
                "unknown routing_strategy '{other}', expected first-available, next-available, round-robin, or round-robin-with-fallback"
            ))),
        }
    }
}

/// `(cache_name, replicaset_name, role, strategy, allow_primary_reads)`
/// (§4.5.4). Quarantine is not used: the candidate list is rebuilt from
/// the cache's latest snapshot on every call.
pub struct MetadataCacheDestination {
    cache_name: String,
    replicaset_name: String,
    role: RoleFilter,
    strategy: Strategy,
    allow_primary_reads: bool,
    cursor: AtomicUsize,
    pinned: Mutex<usize>,
    exhausted: AtomicBool,
}

impl MetadataCacheDestination {
    pub fn new(
        cache_name: String,
        replicaset_name: String,
        role: RoleFilter,
        strategy: Strategy,
        allow_primary_reads: bool,
    ) -> Self {
        Self {
            cache_name,
            replicaset_name,
            role,
            strategy,
            allow_primary_reads,
            cursor: AtomicUsize::new(0),
            pinned: Mutex::new(0),
            exhausted: AtomicBool::new(false),
        }
    }

    /// Parses `metadata-cache://<cache>/<replicaset>?role=...&allow_primary_reads=...`
    /// together with the section's `mode`/`routing_strategy` option (at
    /// most one of which is present — enforced by the caller).
    pub fn from_uri(raw: &str, mode: Option<&str>, routing_strategy: Option<&str>) -> Result<Self> {
        let uri = Uri::parse(raw)?;
        if uri.scheme != "metadata-cache" {
            return Err(Error::Config(format!("destination '{raw}' is not a metadata-cache:// uri")));
        }
        let cache_name = uri.host.clone();
        let replicaset_name = uri
            .path_segments
            .first()
            .cloned()
            .ok_or_else(|| Error::Uri(format!("missing replicaset path segment in '{raw}'")))?;

        let known_params = ["role", "allow_primary_reads"];
        for (k, _) in &uri.query {
            if !known_params.contains(&k.as_str()) {
                return Err(Error::Uri(format!("unknown query parameter '{k}' in '{raw}'")));
            }
        }

        let allow_primary_reads = match uri.query_get("allow_primary_reads") {
            Some(v) => v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true"),
            None => false,
        };

        if mode.is_some() && routing_strategy.is_some() {
            return Err(Error::Config(
                "options 'mode' and 'routing_strategy' may not both be present".to_string(),
            ));
        }

        let role = match uri.query_get("role") {
            Some(r) => RoleFilter::parse(r)?,
            None => match mode {
                Some("read-write") => RoleFilter::Primary,
                Some("read-only") => RoleFilter::Secondary,
                _ => RoleFilter::PrimaryAndSecondary,
            },
        };

        if allow_primary_reads && role != RoleFilter::Secondary {
            return Err(Error::Config(
                "'allow_primary_reads' requires role=SECONDARY".to_string(),
            ));
        }
        if allow_primary_reads && routing_strategy.is_some() {
            return Err(Error::Config(
                "'allow_primary_reads' is mutually exclusive with an explicit 'routing_strategy'".to_string(),
            ));
        }

        let strategy = match routing_strategy {
            Some(s) => Strategy::parse(s)?,
            None => match mode {
                Some("read-write") => Strategy::NextAvailable,
                Some("read-only") => {
                    if allow_primary_reads {
                        Strategy::RoundRobinWithFallback
                    } else {
                        Strategy::RoundRobin
                    }
                }
                _ => Strategy::RoundRobin,
            },
        };

        Ok(Self::new(cache_name, replicaset_name, role, strategy, allow_primary_reads))
    }

    /// Returns the role-filtered candidate list, promoting primaries in
    /// when the filter would otherwise be empty for a secondary-only role
    /// with `allow_primary_reads` (or the fallback strategy) in effect.
    fn candidates(&self, members: &[ManagedInstance]) -> Vec<TCPAddress> {
        let primaries: Vec<TCPAddress> = members
            .iter()
            .filter(|m| m.mode == ServerMode::ReadWrite)
            .map(|m| TCPAddress::new(m.host.clone(), m.port))
            .collect();
        let secondaries: Vec<TCPAddress> = members
            .iter()
            .filter(|m| m.mode == ServerMode::ReadOnly)
            .map(|m| TCPAddress::new(m.host.clone(), m.port))
            .collect();

        let mut filtered = match self.role {
            RoleFilter::Primary => primaries.clone(),
            RoleFilter::Secondary => secondaries,
            RoleFilter::PrimaryAndSecondary => {
                let mut all = primaries.clone();
                all.extend(members.iter().filter(|m| m.mode == ServerMode::ReadOnly).map(|m| TCPAddress::new(m.host.clone(), m.port)));
                all
            }
        };
        if filtered.is_empty()
            && self.role == RoleFilter::Secondary
            && (self.allow_primary_reads || self.strategy == Strategy::RoundRobinWithFallback)
        {
            filtered = primaries;
        }
        filtered
    }
}

#[async_trait]
impl RouteDestination for MetadataCacheDestination {
    async fn get_server_socket(&self, connect_timeout: Duration) -> Result<(TcpStream, TCPAddress)> {
        let cache = lookup_cache(&self.cache_name)
            .ok_or_else(|| Error::Connection(format!("no metadata cache named '{}' is running", self.cache_name)))?;
        let members = cache.lookup_replicaset(&self.replicaset_name);

        match self.strategy {
            Strategy::RoundRobinWithFallback => {
                let secondaries: Vec<TCPAddress> = members
                    .iter()
                    .filter(|m| m.mode == ServerMode::ReadOnly)
                    .map(|m| TCPAddress::new(m.host.clone(), m.port))
                    .collect();
                let primaries: Vec<TCPAddress> = members
                    .iter()
                    .filter(|m| m.mode == ServerMode::ReadWrite)
                    .map(|m| TCPAddress::new(m.host.clone(), m.port))
                    .collect();
                pick_with_fallback(&secondaries, &primaries, &self.cursor, connect_timeout).await
            }
            Strategy::RoundRobin => {
                let candidates = self.candidates(&members);
                pick(&candidates, &self.cursor, None, connect_timeout).await
            }
            Strategy::NextAvailable => {
                if self.exhausted.load(Ordering::Relaxed) {
                    return Err(Error::Connection("destination list exhausted".to_string()));
                }
                let candidates = self.candidates(&members);
                loop {
                    let idx = *self.pinned.lock();
                    let Some(addr) = candidates.get(idx) else {
                        self.exhausted.store(true, Ordering::Relaxed);
                        return Err(Error::Connection("destination list exhausted".to_string()));
                    };
                    match super::connect_with_timeout(addr, connect_timeout).await {
                        Ok(stream) => return Ok((stream, addr.clone())),
                        Err(_) => {
                            let mut pinned = self.pinned.lock();
                            if *pinned == idx {
                                *pinned += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        match self.strategy {
            Strategy::NextAvailable => "next-available",
            Strategy::RoundRobin => "round-robin",
            Strategy::RoundRobinWithFallback => "round-robin-with-fallback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_uri_defaults_role_from_mode() {
        let d = MetadataCacheDestination::from_uri("metadata-cache://c/rs", Some("read-only"), None).unwrap();
        assert_eq!(d.role, RoleFilter::Secondary);
        assert_eq!(d.strategy, Strategy::RoundRobin);
    }

    #[test]
    fn from_uri_rejects_unknown_query_param() {
        assert!(MetadataCacheDestination::from_uri("metadata-cache://c/rs?bogus=1", None, None).is_err());
    }

    #[test]
    fn from_uri_rejects_allow_primary_reads_with_primary_role() {
        assert!(MetadataCacheDestination::from_uri(
            "metadata-cache://c/rs?role=PRIMARY&allow_primary_reads=yes",
            None,
            None
        )
        .is_err());
    }

    #[test]
    fn from_uri_rejects_mode_and_strategy_together() {
        assert!(MetadataCacheDestination::from_uri("metadata-cache://c/rs", Some("read-only"), Some("round-robin")).is_err());
    }
}
