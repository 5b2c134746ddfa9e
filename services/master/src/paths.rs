//! Store layout.

use sha2::{Digest, Sha256};
use treadmill_id::InstanceId;
use treadmill_store::path::join;

pub const SCHEDULED: &str = "/scheduled";
pub const SERVERS: &str = "/servers";
pub const SERVER_PRESENCE: &str = "/server.presence";
pub const BUCKETS: &str = "/buckets";
pub const CELL: &str = "/cell";
pub const PARTITIONS: &str = "/partitions";
pub const ALLOCATIONS: &str = "/allocations";
pub const APPMONITORS: &str = "/appmonitors";
pub const IDENTITY_GROUPS: &str = "/identity-groups";
pub const PLACEMENT: &str = "/placement";
pub const RUNNING: &str = "/running";
pub const EVENTS: &str = "/events";
pub const BLACKEDOUT_SERVERS: &str = "/blackedout.servers";
pub const BLACKEDOUT_APPS: &str = "/blackedout.apps";
pub const SCHEDULED_STATS: &str = "/scheduled-stats";
pub const FINISHED: &str = "/finished";
pub const REBOOTS: &str = "/reboots";
pub const STATE_REPORTS: &str = "/state-reports";
pub const SERVERS_REPORT: &str = "/state-reports/servers";
pub const ALLOCATIONS_REPORT: &str = "/state-reports/allocations";
pub const TRACE: &str = "/trace";
pub const SERVER_TRACE: &str = "/server-trace";
pub const TIMEZONE: &str = "/timezone";
pub const MASTER_LOCK: &str = "/locks/master";

/// Namespaces created at bootstrap.
pub const NAMESPACES: &[&str] = &[
    SCHEDULED,
    SERVERS,
    SERVER_PRESENCE,
    BUCKETS,
    CELL,
    PARTITIONS,
    APPMONITORS,
    IDENTITY_GROUPS,
    PLACEMENT,
    RUNNING,
    EVENTS,
    BLACKEDOUT_SERVERS,
    FINISHED,
    REBOOTS,
    STATE_REPORTS,
    TRACE,
    SERVER_TRACE,
];

pub fn scheduled(id: &InstanceId) -> String {
    join(SCHEDULED, &id.to_string())
}

pub fn server(name: &str) -> String {
    join(SERVERS, name)
}

pub fn server_presence(name: &str) -> String {
    join(SERVER_PRESENCE, name)
}

pub fn bucket(name: &str) -> String {
    join(BUCKETS, name)
}

pub fn cell_bucket(name: &str) -> String {
    join(CELL, name)
}

pub fn partition(name: &str) -> String {
    join(PARTITIONS, name)
}

pub fn appmonitor(name: &str) -> String {
    join(APPMONITORS, name)
}

pub fn identity_group(name: &str) -> String {
    join(IDENTITY_GROUPS, name)
}

/// Placement node of a server; holds its `{state, since}`.
pub fn placement_server(server: &str) -> String {
    join(PLACEMENT, server)
}

pub fn placement(server: &str, id: &InstanceId) -> String {
    join(&placement_server(server), &id.to_string())
}

pub fn running(id: &InstanceId) -> String {
    join(RUNNING, &id.to_string())
}

pub fn blackedout_server(name: &str) -> String {
    join(BLACKEDOUT_SERVERS, name)
}

pub fn finished(id: &InstanceId) -> String {
    join(FINISHED, &id.to_string())
}

pub fn reboot(server: &str) -> String {
    join(REBOOTS, server)
}

/// Server name of a presence node.
///
/// Agents may register with a sequence node, `<server>#<seq>`.
pub fn presence_server_name(node: &str) -> &str {
    node.split_once('#').map_or(node, |(name, _)| name)
}

/// Trace shard of a subject: the first four hex digits of its sha256.
pub fn trace_shard(subject: &str) -> String {
    let digest = Sha256::digest(subject.as_bytes());
    hex::encode(&digest[..2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_paths() {
        let id: InstanceId = "proid.web#0000000007".parse().unwrap();
        assert_eq!(placement("host1", &id), "/placement/host1/proid.web#0000000007");
        assert_eq!(scheduled(&id), "/scheduled/proid.web#0000000007");
    }

    #[test]
    fn test_presence_name_strips_sequence() {
        assert_eq!(presence_server_name("host1#0000000003"), "host1");
        assert_eq!(presence_server_name("host1"), "host1");
    }

    #[test]
    fn test_trace_shard_is_stable() {
        let shard = trace_shard("proid.web#0000000001");
        assert_eq!(shard.len(), 4);
        assert_eq!(shard, trace_shard("proid.web#0000000001"));
        assert!(shard.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
