use crate::error::{Error, Result};
use crate::types::{derive_mode, derive_status, InstanceStatus, ManagedInstance, ManagedReplicaSet, Role};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Row};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// `host[:port]`, parsed out of `bootstrap_server_addresses`. Kept
/// separate from the routing crate's `TCPAddress` (§4.7) to avoid a
/// crate dependency edge between `metadata_cache` and `routing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAddress {
    pub host: String,
    pub port: u16,
}

impl BootstrapAddress {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().trim_start_matches("mysql://");
        let (host, port) = match s.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse::<u16>().map_err(|_| {
                Error::Config(format!("bad port in bootstrap address '{s}'"))
            })?),
            None => (s.to_string(), 3306),
        };
        if host.is_empty() {
            return Err(Error::Config(format!("empty host in bootstrap address '{s}'")));
        }
        Ok(Self { host, port })
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Produces, and keeps fresh, a mapping from replicaset name to its live
/// member list with each member's mode reflecting the latest observed
/// group-replication state.
///
/// The topology map and the bootstrap-server list are each guarded by
/// their own mutex (§5 shared-resource policy): readers never see a
/// partially-updated snapshot because the whole `HashMap` is swapped in
/// one assignment under the topology-map lock.
pub struct MetadataCache {
    bootstrap_servers: Mutex<Vec<BootstrapAddress>>,
    credentials: Credentials,
    ttl: Duration,
    cluster_name: String,
    topology: Mutex<HashMap<String, ManagedReplicaSet>>,
    accelerated: AtomicBool,
    primary_seen: Notify,
}

fn is_member(addr: &BootstrapAddress, members: &[ManagedInstance]) -> bool {
    members.iter().any(|m| m.host == addr.host && m.port == addr.port)
}

impl MetadataCache {
    /// Performs one synchronous refresh before returning, matching "the
    /// construction immediately performs one synchronous refresh."
    pub async fn new(
        bootstrap_servers: Vec<BootstrapAddress>,
        credentials: Credentials,
        ttl: Duration,
        cluster_name: String,
    ) -> Self {
        let cache = Self {
            bootstrap_servers: Mutex::new(bootstrap_servers),
            credentials,
            ttl,
            cluster_name,
            topology: Mutex::new(HashMap::new()),
            accelerated: AtomicBool::new(false),
            primary_seen: Notify::new(),
        };
        if let Err(e) = cache.refresh_once().await {
            warn!("router_metadata_cache: initial refresh failed: {e}");
        }
        cache
    }

    /// Background refresh loop; exits when `stop` fires.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            let period = if self.accelerated.load(Ordering::Relaxed) {
                Duration::from_secs(1)
            } else {
                self.ttl
            };
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if let Err(e) = self.refresh_once().await {
                        warn!("router_metadata_cache: refresh cycle failed, keeping previous snapshot: {e}");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        info!("router_metadata_cache: stopping refresh loop");
                        return;
                    }
                }
            }
        }
    }

    async fn connect_any(&self) -> Result<(Conn, BootstrapAddress)> {
        let servers = self.bootstrap_servers.lock().clone();
        let mut last_err = None;
        for addr in &servers {
            match self.connect_to(addr).await {
                Ok(conn) => return Ok((conn, addr.clone())),
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::Metadata(format!(
            "could not connect to any bootstrap server: {}",
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no bootstrap servers configured".to_string())
        )))
    }

    async fn connect_to(&self, addr: &BootstrapAddress) -> std::result::Result<Conn, mysql_async::Error> {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(addr.host.clone())
            .tcp_port(addr.port)
            .user(Some(self.credentials.user.clone()))
            .pass(Some(self.credentials.password.clone()))
            .into();
        Conn::new(opts).await
    }

    /// Runs one full refresh cycle (§4.4 steps 1-7). Any failure aborts
    /// the cycle without touching the existing snapshot.
    pub async fn refresh_once(&self) -> Result<()> {
        let (mut conn, bootstrap_addr) = self.connect_any().await?;

        let catalog_sql = format!(
            "SELECT r.replicaset_name, i.mysql_server_uuid, i.role, i.weight, \
             i.version_token, i.location, i.host, i.port, i.xport \
             FROM clusters c \
             JOIN replicasets r ON r.cluster_id = c.cluster_id \
             JOIN instances i ON i.replicaset_id = r.replicaset_id \
             JOIN hosts h ON h.host_id = i.host_id \
             WHERE c.cluster_name = '{}'",
            self.cluster_name.replace('\'', "''")
        );
        let rows: Vec<Row> = conn
            .query(catalog_sql)
            .await
            .map_err(|e| Error::Metadata(format!("catalog query failed: {e}")))?;

        if rows.is_empty() {
            return Err(Error::Metadata("catalog query returned no instances".to_string()));
        }

        let mut by_replicaset: HashMap<String, Vec<ManagedInstance>> = HashMap::new();
        for mut row in rows {
            let replicaset_name: String = row.take("replicaset_name").unwrap_or_default();
            let uuid: String = row.take("mysql_server_uuid").unwrap_or_default();
            let weight: f32 = row.take("weight").unwrap_or(1.0);
            let version_token: u32 = row.take("version_token").unwrap_or(0);
            let location: String = row.take("location").unwrap_or_default();
            let host: String = row.take("host").unwrap_or_default();
            let port: u16 = row.take("port").unwrap_or(3306);
            let xport: u16 = row
                .take::<Option<u16>, _>("xport")
                .unwrap_or(None)
                .unwrap_or(port.saturating_mul(10));

            by_replicaset.entry(replicaset_name.clone()).or_default().push(ManagedInstance {
                replicaset_name,
                mysql_server_uuid: uuid,
                role: Role::Secondary, // placeholder, fixed up below from GR status
                mode: crate::types::ServerMode::Unavailable,
                weight,
                version_token,
                location,
                host,
                port,
                xport,
            });
        }

        let mut new_topology = HashMap::with_capacity(by_replicaset.len());
        let mut any_missing_primary = false;

        for (replicaset_name, mut members) in by_replicaset {
            let group_conn = self.connect_to_member(&mut conn, &bootstrap_addr, &members).await;
            let (primary_uuid, gr_rows, single_primary_mode) = match group_conn {
                Ok(v) => v,
                Err(e) => {
                    warn!("router_metadata_cache: group status query failed for '{replicaset_name}': {e}");
                    any_missing_primary = true;
                    new_topology.insert(
                        replicaset_name.clone(),
                        ManagedReplicaSet { name: replicaset_name, members, single_primary_mode: true },
                    );
                    continue;
                }
            };

            let mut states_by_uuid: HashMap<String, String> = HashMap::new();
            for (uuid, state) in &gr_rows {
                states_by_uuid.insert(uuid.clone(), state.clone());
            }

            for member in members.iter_mut() {
                let is_primary = !single_primary_mode || Some(&member.mysql_server_uuid) == primary_uuid.as_ref();
                member.role = if is_primary { Role::Primary } else { Role::Secondary };
                let state = states_by_uuid
                    .get(&member.mysql_server_uuid)
                    .cloned()
                    .unwrap_or_else(|| {
                        warn!(
                            "router_metadata_cache: member {} of '{replicaset_name}' is in metadata but absent from live GR status",
                            member.mysql_server_uuid
                        );
                        "UNREACHABLE".to_string()
                    });
                member.mode = derive_mode(member.role, &state);
            }

            let has_primary = members.iter().any(|m| m.role == Role::Primary && m.mode == crate::types::ServerMode::ReadWrite);
            if !has_primary {
                any_missing_primary = true;
            } else {
                self.primary_seen.notify_waiters();
            }

            let states: Vec<&str> = states_by_uuid.values().map(String::as_str).collect();
            let status = derive_status(&states);
            debug!("router_metadata_cache: replicaset '{replicaset_name}' status = {status:?}");

            if matches!(status, crate::types::ReplicasetStatus::AvailableWritable | crate::types::ReplicasetStatus::AvailableReadOnly) {
                self.rotate_bootstrap_servers(&members);
            }

            new_topology.insert(replicaset_name.clone(), ManagedReplicaSet {
                name: replicaset_name,
                members,
                single_primary_mode,
            });
        }

        *self.topology.lock() = new_topology;
        self.accelerated.store(any_missing_primary, Ordering::Relaxed);
        Ok(())
    }

    /// Queries group-replication status for one replicaset on a real
    /// member of that replicaset, reusing `bootstrap_conn` only when it is
    /// itself a member; otherwise opens a fresh connection to one of
    /// `members`, trying each in turn until one accepts.
    async fn connect_to_member(
        &self,
        bootstrap_conn: &mut Conn,
        bootstrap_addr: &BootstrapAddress,
        members: &[ManagedInstance],
    ) -> Result<(Option<String>, Vec<(String, String)>, bool)> {
        if is_member(bootstrap_addr, members) {
            return Self::query_group_status(bootstrap_conn).await;
        }

        let mut last_err = None;
        for member in members {
            let addr = BootstrapAddress { host: member.host.clone(), port: member.port };
            match self.connect_to(&addr).await {
                Ok(mut member_conn) => return Self::query_group_status(&mut member_conn).await,
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::Metadata(format!(
            "could not connect to any member to query group status: {}",
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no members in replicaset".to_string())
        )))
    }

    async fn query_group_status(conn: &mut Conn) -> Result<(Option<String>, Vec<(String, String)>, bool)> {
        let primary_row: Option<Row> = conn
            .query_first("SHOW STATUS LIKE 'group_replication_primary_member'")
            .await
            .map_err(|e| Error::Metadata(format!("primary-member query failed: {e}")))?;
        let primary_uuid = primary_row
            .and_then(|mut r| r.take::<String, _>(1).ok())
            .filter(|s| !s.is_empty());

        let gr_rows: Vec<Row> = conn
            .query(
                "SELECT member_id, member_host, member_port, member_state, \
                 @@group_replication_single_primary_mode \
                 FROM performance_schema.replication_group_members \
                 WHERE channel_name = 'group_replication_applier'",
            )
            .await
            .map_err(|e| Error::Metadata(format!("group status query failed: {e}")))?;

        let mut single_primary_mode = true;
        let mut states = Vec::with_capacity(gr_rows.len());
        for mut row in gr_rows {
            let member_id: String = row.take("member_id").unwrap_or_default();
            let member_state: String = row.take("member_state").unwrap_or_default();
            if let Some(flag) = row.take::<Option<i64>, _>(4).unwrap_or(None) {
                single_primary_mode = flag != 0;
            }
            states.push((member_id, member_state));
        }

        Ok((primary_uuid, states, single_primary_mode))
    }

    fn rotate_bootstrap_servers(&self, members: &[ManagedInstance]) {
        let mut servers = self.bootstrap_servers.lock();
        let mut rotated: Vec<BootstrapAddress> = members
            .iter()
            .map(|m| BootstrapAddress { host: m.host.clone(), port: m.port })
            .collect();
        for existing in servers.iter() {
            if !rotated.contains(existing) {
                rotated.push(existing.clone());
            }
        }
        *servers = rotated;
    }

    /// Returns a snapshot copy of the member list. Unknown replicasets
    /// return an empty list (logged, not an error).
    pub fn lookup_replicaset(&self, name: &str) -> Vec<ManagedInstance> {
        match self.topology.lock().get(name) {
            Some(rs) => rs.members.clone(),
            None => {
                warn!("router_metadata_cache: lookup for unknown replicaset '{name}'");
                Vec::new()
            }
        }
    }

    /// A hint from the dataplane that `uuid` is unreachable/invalid/unusable.
    /// Sustained unreachability of a primary switches the refresh loop to
    /// 1s cadence until a new primary is observed.
    pub fn mark_instance_reachability(&self, uuid: &str, status: InstanceStatus) {
        if status != InstanceStatus::Reachable {
            let mut topology = self.topology.lock();
            for rs in topology.values_mut() {
                for member in rs.members.iter_mut() {
                    if member.mysql_server_uuid == uuid && member.role == Role::Primary {
                        self.accelerated.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// Blocks up to `timeout` for a primary to appear in `replicaset_name`.
    pub async fn wait_primary_failover(&self, replicaset_name: &str, timeout: Duration) -> bool {
        if self.has_primary(replicaset_name) {
            return true;
        }
        let wait = self.primary_seen.notified();
        tokio::select! {
            _ = wait => self.has_primary(replicaset_name),
            _ = tokio::time::sleep(timeout) => false,
        }
    }

    fn has_primary(&self, replicaset_name: &str) -> bool {
        self.topology
            .lock()
            .get(replicaset_name)
            .map(|rs| {
                rs.members
                    .iter()
                    .any(|m| m.role == Role::Primary && m.mode == crate::types::ServerMode::ReadWrite)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_address_parses_scheme_and_default_port() {
        let a = BootstrapAddress::parse("mysql://10.0.0.1:3307").unwrap();
        assert_eq!(a.host, "10.0.0.1");
        assert_eq!(a.port, 3307);
        let b = BootstrapAddress::parse("10.0.0.2").unwrap();
        assert_eq!(b.port, 3306);
    }

    #[test]
    fn bootstrap_address_rejects_bad_port() {
        assert!(BootstrapAddress::parse("host:notaport").is_err());
    }

    fn instance(host: &str, port: u16) -> ManagedInstance {
        ManagedInstance {
            replicaset_name: "rs1".to_string(),
            mysql_server_uuid: format!("{host}-uuid"),
            role: Role::Secondary,
            mode: crate::types::ServerMode::Unavailable,
            weight: 1.0,
            version_token: 0,
            location: String::new(),
            host: host.to_string(),
            port,
            xport: port.saturating_mul(10),
        }
    }

    #[test]
    fn bootstrap_server_recognized_as_replicaset_member() {
        let addr = BootstrapAddress { host: "10.0.0.1".to_string(), port: 3306 };
        let members = vec![instance("10.0.0.2", 3306), instance("10.0.0.1", 3306)];
        assert!(is_member(&addr, &members));
    }

    #[test]
    fn bootstrap_server_not_a_member_of_unrelated_replicaset() {
        let addr = BootstrapAddress { host: "10.0.0.9".to_string(), port: 3306 };
        let members = vec![instance("10.0.0.2", 3306), instance("10.0.0.3", 3306)];
        assert!(!is_member(&addr, &members));
    }
}
