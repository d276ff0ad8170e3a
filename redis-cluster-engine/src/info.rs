//! Parsing of the `key:value` text returned by `INFO` and `CLUSTER INFO`.

use std::collections::BTreeMap;

use redis::{from_redis_value, FromRedisValue, RedisResult, Value};

/// Splits `INFO` style text into its properties.
///
/// Section headers (`# Server`) and blank lines are skipped, as are lines
/// without a colon.
pub(crate) fn parse_info(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// The state of the cluster as reported by `CLUSTER INFO`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    properties: BTreeMap<String, String>,
}

impl ClusterInfo {
    /// Parses the text returned by `CLUSTER INFO`.
    pub fn parse(raw: &str) -> Self {
        Self {
            properties: parse_info(raw),
        }
    }

    /// The raw value of a property.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// All reported properties.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn number(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|value| value.parse().ok())
    }

    /// `ok` or `fail`.
    pub fn state(&self) -> Option<&str> {
        self.get("cluster_state")
    }

    /// Returns `true` if the cluster reports state `ok`.
    pub fn is_ok(&self) -> bool {
        self.state() == Some("ok")
    }

    /// `cluster_slots_assigned`.
    pub fn slots_assigned(&self) -> Option<u64> {
        self.number("cluster_slots_assigned")
    }

    /// `cluster_slots_ok`.
    pub fn slots_ok(&self) -> Option<u64> {
        self.number("cluster_slots_ok")
    }

    /// Slots served by nodes in `PFAIL` state.
    pub fn slots_pfail(&self) -> Option<u64> {
        self.number("cluster_slots_pfail")
    }

    /// Slots served by nodes in `FAIL` state.
    pub fn slots_fail(&self) -> Option<u64> {
        self.number("cluster_slots_fail")
    }

    /// `cluster_known_nodes`.
    pub fn known_nodes(&self) -> Option<u64> {
        self.number("cluster_known_nodes")
    }

    /// Number of masters serving at least one slot.
    pub fn size(&self) -> Option<u64> {
        self.number("cluster_size")
    }

    /// `cluster_current_epoch`.
    pub fn current_epoch(&self) -> Option<u64> {
        self.number("cluster_current_epoch")
    }

    /// `cluster_stats_messages_sent`.
    pub fn messages_sent(&self) -> Option<u64> {
        self.number("cluster_stats_messages_sent")
    }

    /// `cluster_stats_messages_received`.
    pub fn messages_received(&self) -> Option<u64> {
        self.number("cluster_stats_messages_received")
    }
}

impl FromRedisValue for ClusterInfo {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        let raw: String = from_redis_value(v)?;
        Ok(ClusterInfo::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTER_INFO: &str = "cluster_state:ok\r\n\
cluster_slots_assigned:16384\r\n\
cluster_slots_ok:16384\r\n\
cluster_slots_pfail:0\r\n\
cluster_slots_fail:0\r\n\
cluster_known_nodes:6\r\n\
cluster_size:3\r\n\
cluster_current_epoch:6\r\n\
cluster_stats_messages_sent:1483972\r\n\
cluster_stats_messages_received:1483968\r\n";

    #[test]
    fn parse_info_skips_sections_and_blank_lines() {
        let info = parse_info("# Server\r\nredis_version:7.2.4\r\n\r\n# Clients\r\nconnected_clients:1\r\nnot a property\r\n");
        assert_eq!(info.len(), 2);
        assert_eq!(info["redis_version"], "7.2.4");
        assert_eq!(info["connected_clients"], "1");
    }

    #[test]
    fn parse_info_keeps_colons_in_values() {
        let info = parse_info("executable:/usr/bin/redis-server\r\nmaster_host:fe80::1\r\n");
        assert_eq!(info["master_host"], "fe80::1");
    }

    #[test]
    fn cluster_info_accessors() {
        let info = ClusterInfo::parse(CLUSTER_INFO);
        assert!(info.is_ok());
        assert_eq!(info.slots_assigned(), Some(16384));
        assert_eq!(info.slots_ok(), Some(16384));
        assert_eq!(info.slots_pfail(), Some(0));
        assert_eq!(info.slots_fail(), Some(0));
        assert_eq!(info.known_nodes(), Some(6));
        assert_eq!(info.size(), Some(3));
        assert_eq!(info.current_epoch(), Some(6));
        assert_eq!(info.messages_sent(), Some(1483972));
        assert_eq!(info.messages_received(), Some(1483968));
        assert_eq!(info.get("unknown"), None);
    }

    #[test]
    fn cluster_info_from_bulk_string() {
        let value = Value::BulkString(b"cluster_state:fail\r\n".to_vec());
        let info = ClusterInfo::from_redis_value(&value).unwrap();
        assert!(!info.is_ok());
        assert_eq!(info.state(), Some("fail"));
    }
}
