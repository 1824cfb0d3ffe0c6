use std::fmt;

/// Mirrors `metadata_cache::ServerMode`: the mode a routing destination
/// should treat a member as having, derived from (role, group-replication
/// member state) per the mode-derivation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    ReadWrite,
    ReadOnly,
    Unavailable,
}

/// The role group replication assigns a member: `Primary` if it is the
/// identified primary (or the group is multi-primary), else `Secondary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicasetStatus {
    AvailableWritable,
    AvailableReadOnly,
    Partitioned,
    Unavailable,
}

/// A hint the dataplane reports back about a specific instance, via
/// [`crate::MetadataCache::mark_instance_reachability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Reachable,
    InvalidHost,
    Unreachable,
    Unusable,
}

/// A single server managed by the topology.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedInstance {
    pub replicaset_name: String,
    pub mysql_server_uuid: String,
    pub role: Role,
    pub mode: ServerMode,
    pub weight: f32,
    pub version_token: u32,
    pub location: String,
    pub host: String,
    pub port: u16,
    pub xport: u16,
}

impl fmt::Display for ManagedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A replicaset (a GR group) as last observed by a refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct ManagedReplicaSet {
    pub name: String,
    pub members: Vec<ManagedInstance>,
    pub single_primary_mode: bool,
}

/// Mode derivation table (§4.4 Table 1): Online+Primary -> ReadWrite,
/// Online+Secondary -> ReadOnly, anything else -> Unavailable.
pub fn derive_mode(role: Role, member_state: &str) -> ServerMode {
    if !member_state.eq_ignore_ascii_case("online") {
        return ServerMode::Unavailable;
    }
    match role {
        Role::Primary => ServerMode::ReadWrite,
        Role::Secondary => ServerMode::ReadOnly,
    }
}

/// `AvailableWritable` if >=2 members are `Online` and none `Unreachable`;
/// `AvailableReadOnly` if exactly one is `Online` and none `Unreachable`;
/// `Partitioned` if some are `Unreachable` and some `Online`; `Unavailable`
/// otherwise.
pub fn derive_status(member_states: &[&str]) -> ReplicasetStatus {
    let online = member_states
        .iter()
        .filter(|s| s.eq_ignore_ascii_case("online"))
        .count();
    let unreachable = member_states
        .iter()
        .filter(|s| s.eq_ignore_ascii_case("unreachable"))
        .count();
    if unreachable > 0 && online > 0 {
        ReplicasetStatus::Partitioned
    } else if online >= 2 && unreachable == 0 {
        ReplicasetStatus::AvailableWritable
    } else if online == 1 && unreachable == 0 {
        ReplicasetStatus::AvailableReadOnly
    } else {
        ReplicasetStatus::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_table() {
        assert_eq!(derive_mode(Role::Primary, "ONLINE"), ServerMode::ReadWrite);
        assert_eq!(derive_mode(Role::Secondary, "ONLINE"), ServerMode::ReadOnly);
        assert_eq!(derive_mode(Role::Primary, "RECOVERING"), ServerMode::Unavailable);
        assert_eq!(derive_mode(Role::Secondary, "UNREACHABLE"), ServerMode::Unavailable);
    }

    #[test]
    fn status_table() {
        assert_eq!(derive_status(&["ONLINE", "ONLINE"]), ReplicasetStatus::AvailableWritable);
        assert_eq!(derive_status(&["ONLINE"]), ReplicasetStatus::AvailableReadOnly);
        assert_eq!(derive_status(&["ONLINE", "UNREACHABLE"]), ReplicasetStatus::Partitioned);
        assert_eq!(derive_status(&["RECOVERING"]), ReplicasetStatus::Unavailable);
        assert_eq!(derive_status(&[]), ReplicasetStatus::Unavailable);
    }
}
