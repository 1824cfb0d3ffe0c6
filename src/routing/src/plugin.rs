use crate::address::TCPAddress;
use crate::destination::metadata_cache::MetadataCacheDestination;
use crate::destination::next_available::NextAvailable;
use crate::destination::round_robin::RoundRobin;
use crate::destination::RouteDestination;
use crate::error::{Error, Result};
use crate::routing_service::{MySQLRouting, Protocol};
use async_trait::async_trait;
use router_config::ConfigSection;
use router_harness::{AppInfo, PluginDescriptor, Plugin};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

pub struct RoutingPlugin {
    descriptor: PluginDescriptor,
}

impl RoutingPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor {
                abi_version: router_harness::ABI_VERSION,
                name: "routing",
                brief: "accepts client connections and relays them to a backend",
                plugin_version: router_config::Version::new(1, 0, 0),
                requires: vec![router_config::Designator::parse("logger").unwrap()],
                conflicts: Vec::new(),
            },
        }
    }
}

impl Default for RoutingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct Parsed {
    bind_address: TCPAddress,
    destination: Arc<dyn RouteDestination>,
    protocol: Protocol,
    connect_timeout: Duration,
    wait_timeout: Duration,
    max_connections: usize,
}

fn ranged(key: &str, option: &str, raw: &str, min: u64, max: u64) -> Result<u64> {
    let v: u64 = raw
        .parse()
        .map_err(|_| Error::Config(format!("[routing:{key}] option '{option}' must be an integer")))?;
    if v < min || v > max {
        return Err(Error::Config(format!(
            "[routing:{key}] option '{option}' must satisfy {min} <= {option} <= {max}"
        )));
    }
    Ok(v)
}

fn parse_section(key: &str, section: &ConfigSection) -> Result<Parsed> {
    let bind_port: Option<u16> = match section.get("bind_port", None) {
        Ok(raw) => Some(
            raw.parse()
                .map_err(|_| Error::Config(format!("[routing:{key}] option 'bind_port' must be an integer")))?,
        ),
        Err(_) => None,
    };
    let bind_raw = section
        .get("bind_address", None)
        .map_err(|_| Error::Config(format!("[routing:{key}] option 'bind_address' is required")))?;
    let mut bind_address =
        TCPAddress::parse(&bind_raw, bind_port.unwrap_or(0)).map_err(|e| Error::Config(e.to_string()))?;
    if let Some(port) = bind_port {
        bind_address.port = port;
    }
    if bind_address.port == 0 {
        return Err(Error::Config(format!(
            "[routing:{key}] a non-zero port is required, either in 'bind_address' or via 'bind_port'"
        )));
    }

    let destinations_raw = section
        .get("destinations", None)
        .map_err(|_| Error::Config(format!("[routing:{key}] option 'destinations' is required")))?;

    let mode = section.get("mode", None).ok();
    let routing_strategy = section.get("routing_strategy", None).ok();
    if mode.is_some() && routing_strategy.is_some() {
        return Err(Error::Config(format!(
            "[routing:{key}] options 'mode' and 'routing_strategy' may not both be present"
        )));
    }
    if mode.is_none() && routing_strategy.is_none() {
        return Err(Error::Config(format!(
            "[routing:{key}] exactly one of 'mode' or 'routing_strategy' is required"
        )));
    }
    if let Some(m) = &mode {
        if m != "read-only" && m != "read-write" {
            return Err(Error::Config(format!(
                "[routing:{key}] option 'mode' must be one of: read-only, read-write"
            )));
        }
    }

    let destination: Arc<dyn RouteDestination> = if destinations_raw.starts_with("metadata-cache://") {
        Arc::new(
            MetadataCacheDestination::from_uri(&destinations_raw, mode.as_deref(), routing_strategy.as_deref())
                .map_err(|e| Error::Config(format!("[routing:{key}] {e}")))?,
        )
    } else {
        let mut list = Vec::new();
        for part in destinations_raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            list.push(TCPAddress::parse(part, 3306).map_err(|e| Error::Config(e.to_string()))?);
        }
        if list.is_empty() {
            return Err(Error::Config(format!(
                "[routing:{key}] option 'destinations' must name at least one address"
            )));
        }
        if list.iter().any(|d| *d == bind_address) {
            return Err(Error::Config(format!(
                "[routing:{key}] Bind Address can not be part of destinations"
            )));
        }
        match routing_strategy.as_deref() {
            Some("round-robin") => Arc::new(RoundRobin::new(list)),
            Some("round-robin-with-fallback") => {
                return Err(Error::Config(format!(
                    "[routing:{key}] 'round-robin-with-fallback' requires a metadata-cache:// destination"
                )))
            }
            Some("first-available") | Some("next-available") => Arc::new(NextAvailable::new(list)),
            Some(other) => {
                return Err(Error::Config(format!(
                    "[routing:{key}] option 'routing_strategy' must be one of: first-available, next-available, round-robin, round-robin-with-fallback (got '{other}')"
                )))
            }
            // no explicit routing_strategy: derive it from `mode` instead,
            // matching `read-only -> RouteDestination` (round-robin) and
            // `read-write -> DestFailover` (next-available).
            None => match mode.as_deref() {
                Some("read-only") => Arc::new(RoundRobin::new(list)),
                Some("read-write") => Arc::new(NextAvailable::new(list)),
                _ => Arc::new(NextAvailable::new(list)),
            },
        }
    };

    let connect_timeout = Duration::from_secs(
        section
            .get("connect_timeout", None)
            .map_or(Ok(1), |raw| ranged(key, "connect_timeout", &raw, 1, 65535))?,
    );
    let wait_timeout = Duration::from_secs(
        section
            .get("wait_timeout", None)
            .map_or(Ok(0), |raw| ranged(key, "wait_timeout", &raw, 0, 65535))?,
    );
    let max_connections = section
        .get("max_connections", None)
        .map_or(Ok(512), |raw| ranged(key, "max_connections", &raw, 1, 65535))? as usize;

    let protocol = match section.get("protocol", None).as_deref() {
        Ok("classic") | Err(_) => Protocol::Classic,
        Ok("x") => Protocol::X,
        Ok(other) => {
            return Err(Error::Config(format!(
                "[routing:{key}] option 'protocol' must be one of: classic, x (got '{other}')"
            )))
        }
    };

    Ok(Parsed {
        bind_address,
        destination,
        protocol,
        connect_timeout,
        wait_timeout,
        max_connections,
    })
}

#[async_trait]
impl Plugin for RoutingPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn has_start(&self) -> bool {
        true
    }

    async fn start(&self, section: &ConfigSection, stop: watch::Receiver<bool>) -> router_harness::Result<()> {
        let parsed = parse_section(&section.key, section)
            .map_err(|e| router_harness::Error::InitFailed("routing".to_string(), e.to_string()))?;

        info!(
            "router_routing: starting route '{}' on {} -> {:?} ({})",
            section.key,
            parsed.bind_address,
            parsed.protocol,
            parsed.destination.strategy_name()
        );
        let routing = Arc::new(MySQLRouting::new(
            section.key.clone(),
            parsed.bind_address,
            parsed.destination,
            parsed.protocol,
            parsed.connect_timeout,
            parsed.wait_timeout,
            parsed.max_connections,
        ));

        routing
            .run(stop)
            .await
            .map_err(|e| router_harness::Error::InitFailed("routing".to_string(), e.to_string()))
    }

    async fn init(&self, _app_info: &AppInfo) -> router_harness::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_config::ConfigSection;

    fn section(pairs: &[(&str, &str)]) -> ConfigSection {
        let mut s = ConfigSection::new("routing", "test");
        for (k, v) in pairs {
            s.set(k, v).unwrap();
        }
        s
    }

    #[test]
    fn classic_round_robin_three_backends() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("destinations", "10.0.0.1:3306,10.0.0.2:3306,10.0.0.3:3306"),
            ("routing_strategy", "round-robin"),
        ]);
        let parsed = parse_section("test", &s).expect("valid section");
        assert_eq!(parsed.protocol, Protocol::Classic);
        assert_eq!(parsed.max_connections, 512);
    }

    #[test]
    fn mode_read_write_selects_next_available_for_static_list() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("destinations", "10.0.0.1:3306,10.0.0.2:3306"),
            ("mode", "read-write"),
        ]);
        let parsed = parse_section("test", &s).expect("mode alone selects a strategy");
        assert_eq!(parsed.destination.strategy_name(), "next-available");
    }

    #[test]
    fn mode_read_only_selects_round_robin_for_static_list() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("destinations", "10.0.0.1:3306,10.0.0.2:3306"),
            ("mode", "read-only"),
        ]);
        let parsed = parse_section("test", &s).expect("mode alone selects a strategy");
        assert_eq!(parsed.destination.strategy_name(), "round-robin");
    }

    #[test]
    fn rejects_bind_address_in_destinations() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("destinations", "127.0.0.1:6446,10.0.0.2:3306"),
            ("routing_strategy", "next-available"),
        ]);
        let err = parse_section("test", &s).unwrap_err();
        assert!(err.to_string().contains("Bind Address can not be part of destinations"));
    }

    #[test]
    fn rejects_invalid_mode() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("destinations", "10.0.0.1:3306"),
            ("mode", "read-write-ish"),
        ]);
        let err = parse_section("test", &s).unwrap_err();
        assert!(err.to_string().contains("mode"));
    }

    #[test]
    fn rejects_mode_and_routing_strategy_together() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("destinations", "10.0.0.1:3306"),
            ("mode", "read-write"),
            ("routing_strategy", "round-robin"),
        ]);
        let err = parse_section("test", &s).unwrap_err();
        assert!(err.to_string().contains("may not both be present"));
    }

    #[test]
    fn rejects_round_robin_with_fallback_for_static_list() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("destinations", "10.0.0.1:3306,10.0.0.2:3306"),
            ("routing_strategy", "round-robin-with-fallback"),
        ]);
        let err = parse_section("test", &s).unwrap_err();
        assert!(err.to_string().contains("requires a metadata-cache://"));
    }

    #[test]
    fn accepts_long_destinations_line() {
        let hosts: Vec<String> = (0..40).map(|i| format!("10.0.{}.{}:3306", i / 256, i % 256)).collect();
        let destinations = hosts.join(",");
        assert!(destinations.len() > 420);
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("destinations", &destinations),
            ("routing_strategy", "round-robin"),
        ]);
        parse_section("test", &s).expect("long destinations line parses");
    }

    #[test]
    fn bind_port_option_is_overridden_by_bind_address_port() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6446"),
            ("bind_port", "9999"),
            ("destinations", "10.0.0.1:3306"),
            ("routing_strategy", "next-available"),
        ]);
        let parsed = parse_section("test", &s).expect("valid section");
        assert_eq!(parsed.bind_address.port, 6446);
    }

    #[test]
    fn bind_port_fills_in_when_bind_address_has_no_port() {
        let s = section(&[
            ("bind_address", "127.0.0.1"),
            ("bind_port", "6446"),
            ("destinations", "10.0.0.1:3306"),
            ("routing_strategy", "next-available"),
        ]);
        let parsed = parse_section("test", &s).expect("valid section");
        assert_eq!(parsed.bind_address.port, 6446);
    }

    #[test]
    fn metadata_cache_destination_accepts_uri_with_role() {
        let s = section(&[
            ("bind_address", "127.0.0.1:6447"),
            ("destinations", "metadata-cache://mycache/myreplicaset?role=SECONDARY"),
            ("routing_strategy", "round-robin-with-fallback"),
        ]);
        parse_section("test", &s).expect("metadata-cache destination with explicit role");
    }
}
