use std::collections::BTreeMap;
use std::time::Duration;

use log::debug;
use redis::ToRedisArgs;

use super::{tolerate_failures, ClusterConnection};
use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::executor::MultiNodeResult;
use crate::info::parse_info;
use crate::node::ClusterNode;
use crate::resources::NodeResourceProvider;

/// Options of `SHUTDOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOption {
    /// Save the dataset before exiting.
    Save,
    /// Exit without saving.
    NoSave,
}

fn namespaced(
    result: MultiNodeResult<BTreeMap<String, String>>,
) -> ClusterResult<BTreeMap<String, String>> {
    let mut merged = BTreeMap::new();
    for node_result in result.into_results() {
        let prefix = node_result.node().address();
        for (key, value) in node_result.into_value()? {
            merged.insert(format!("{prefix}.{key}"), value);
        }
    }
    Ok(merged)
}

fn info_of(raw: String) -> BTreeMap<String, String> {
    parse_info(&raw)
}

impl<P: NodeResourceProvider> ClusterConnection<P> {
    /// Pings every master. Fails if any master does not answer.
    pub fn ping(&self) -> ClusterResult<String> {
        let replies = self
            .executor()
            .execute_command_on_all_nodes(|connection| {
                redis::cmd("PING").query::<String>(connection)
            })?
            .results_as_list()?;
        replies.into_iter().next().ok_or_else(|| {
            ClusterError::from((ErrorKind::ClusterStateFailure, "Cluster has no active master"))
        })
    }

    /// Pings `node`.
    pub fn ping_on(&self, node: &ClusterNode) -> ClusterResult<String> {
        self.execute_on_node(node, |connection| redis::cmd("PING").query(connection))
    }

    /// Number of keys held by all masters.
    ///
    /// Masters that cannot be reached are skipped.
    pub fn db_size(&self) -> ClusterResult<u64> {
        let result = self.executor().execute_command_on_all_nodes(|connection| {
            redis::cmd("DBSIZE").query::<u64>(connection)
        })?;
        Ok(tolerate_failures(result, "DBSIZE")?.into_iter().sum())
    }

    /// Number of keys held by `node`.
    pub fn db_size_on(&self, node: &ClusterNode) -> ClusterResult<u64> {
        self.execute_on_node(node, |connection| redis::cmd("DBSIZE").query(connection))
    }

    /// The most recent successful save of any master, as unix time.
    pub fn last_save(&self) -> ClusterResult<u64> {
        let saves = self
            .executor()
            .execute_command_on_all_nodes(|connection| {
                redis::cmd("LASTSAVE").query::<u64>(connection)
            })?
            .results_as_list()?;
        Ok(saves.into_iter().max().unwrap_or_default())
    }

    /// The last successful save of `node`.
    pub fn last_save_on(&self, node: &ClusterNode) -> ClusterResult<u64> {
        self.execute_on_node(node, |connection| redis::cmd("LASTSAVE").query(connection))
    }

    /// `INFO` of every master.
    ///
    /// Each property is prefixed with the address of the node reporting it,
    /// as in `127.0.0.1:7000.redis_version`.
    pub fn info(&self) -> ClusterResult<BTreeMap<String, String>> {
        namespaced(self.executor().execute_command_on_all_nodes(|connection| {
            redis::cmd("INFO").query::<String>(connection).map(info_of)
        })?)
    }

    /// One `INFO` section of every master, prefixed like [`info`](ClusterConnection::info).
    pub fn info_section(&self, section: &str) -> ClusterResult<BTreeMap<String, String>> {
        let section = section.to_string();
        namespaced(self.executor().execute_command_on_all_nodes(move |connection| {
            redis::cmd("INFO")
                .arg(&section)
                .query::<String>(connection)
                .map(info_of)
        })?)
    }

    /// `INFO` of `node`, without prefixes.
    pub fn info_on(&self, node: &ClusterNode) -> ClusterResult<BTreeMap<String, String>> {
        self.execute_on_node(node, |connection| {
            redis::cmd("INFO").query::<String>(connection).map(info_of)
        })
    }

    /// Configuration parameters matching `pattern` on every master, prefixed
    /// with the node address.
    pub fn get_config(&self, pattern: &str) -> ClusterResult<BTreeMap<String, String>> {
        let pattern = pattern.to_string();
        namespaced(self.executor().execute_command_on_all_nodes(move |connection| {
            redis::cmd("CONFIG")
                .arg("GET")
                .arg(&pattern)
                .query::<BTreeMap<String, String>>(connection)
        })?)
    }

    /// Configuration parameters matching `pattern` on `node`.
    pub fn get_config_on(
        &self,
        node: &ClusterNode,
        pattern: &str,
    ) -> ClusterResult<BTreeMap<String, String>> {
        self.execute_on_node(node, |connection| {
            redis::cmd("CONFIG").arg("GET").arg(pattern).query(connection)
        })
    }

    /// Sets a configuration parameter on every master.
    pub fn set_config<V>(&self, param: &str, value: V) -> ClusterResult<()>
    where
        V: ToRedisArgs + Send + Sync + 'static,
    {
        let param = param.to_string();
        self.executor()
            .execute_command_on_all_nodes(move |connection| {
                redis::cmd("CONFIG")
                    .arg("SET")
                    .arg(&param)
                    .arg(&value)
                    .query::<()>(connection)
            })?
            .results_as_list()?;
        Ok(())
    }

    /// Sets a configuration parameter on `node`.
    pub fn set_config_on<V: ToRedisArgs>(
        &self,
        node: &ClusterNode,
        param: &str,
        value: V,
    ) -> ClusterResult<()> {
        self.execute_on_node(node, |connection| {
            redis::cmd("CONFIG")
                .arg("SET")
                .arg(param)
                .arg(&value)
                .query(connection)
        })
    }

    /// Resets the statistics reported by `INFO` on every master.
    pub fn reset_config_stats(&self) -> ClusterResult<()> {
        self.on_all_masters(&["CONFIG", "RESETSTAT"])
    }

    /// Like [`reset_config_stats`](ClusterConnection::reset_config_stats), on `node` only.
    pub fn reset_config_stats_on(&self, node: &ClusterNode) -> ClusterResult<()> {
        self.on_node(node, &["CONFIG", "RESETSTAT"])
    }

    /// Removes every key of every master.
    pub fn flush_all(&self) -> ClusterResult<()> {
        self.on_all_masters(&["FLUSHALL"])
    }

    /// Like [`flush_all`](ClusterConnection::flush_all), on `node` only.
    pub fn flush_all_on(&self, node: &ClusterNode) -> ClusterResult<()> {
        self.on_node(node, &["FLUSHALL"])
    }

    /// Removes every key of the only database of every master.
    pub fn flush_db(&self) -> ClusterResult<()> {
        self.on_all_masters(&["FLUSHDB"])
    }

    /// Like [`flush_db`](ClusterConnection::flush_db), on `node` only.
    pub fn flush_db_on(&self, node: &ClusterNode) -> ClusterResult<()> {
        self.on_node(node, &["FLUSHDB"])
    }

    /// Starts a background save on every master.
    pub fn bg_save(&self) -> ClusterResult<()> {
        self.on_all_masters(&["BGSAVE"])
    }

    /// Like [`bg_save`](ClusterConnection::bg_save), on `node` only.
    pub fn bg_save_on(&self, node: &ClusterNode) -> ClusterResult<()> {
        self.on_node(node, &["BGSAVE"])
    }

    /// Starts an append only file rewrite on every master.
    pub fn bg_rewrite_aof(&self) -> ClusterResult<()> {
        self.on_all_masters(&["BGREWRITEAOF"])
    }

    /// Like [`bg_rewrite_aof`](ClusterConnection::bg_rewrite_aof), on `node` only.
    pub fn bg_rewrite_aof_on(&self, node: &ClusterNode) -> ClusterResult<()> {
        self.on_node(node, &["BGREWRITEAOF"])
    }

    /// Saves synchronously on every master.
    pub fn save(&self) -> ClusterResult<()> {
        self.on_all_masters(&["SAVE"])
    }

    /// Like [`save`](ClusterConnection::save), on `node` only.
    pub fn save_on(&self, node: &ClusterNode) -> ClusterResult<()> {
        self.on_node(node, &["SAVE"])
    }

    /// Server time of any reachable node, since the unix epoch.
    pub fn time(&self) -> ClusterResult<Duration> {
        self.executor()
            .execute_command_on_arbitrary_node(|connection| {
                redis::cmd("TIME").query::<(u64, u64)>(connection)
            })?
            .into_value()
            .map(as_duration)
    }

    /// Server time of `node`.
    pub fn time_on(&self, node: &ClusterNode) -> ClusterResult<Duration> {
        self.execute_on_node(node, |connection| {
            redis::cmd("TIME").query::<(u64, u64)>(connection)
        })
        .map(as_duration)
    }

    /// Shuts down every master.
    ///
    /// Nodes dropping the connection while going down are not reported.
    pub fn shutdown(&self) -> ClusterResult<()> {
        let result = self.executor().execute_command_on_all_nodes(|connection| {
            redis::cmd("SHUTDOWN").query::<()>(connection)
        })?;
        for (node, err) in result.errors() {
            if !err.is_connection_failure() {
                return Err(ClusterError::from((
                    err.kind(),
                    "SHUTDOWN failed",
                    format!("{node}: {err}"),
                )));
            }
            debug!("{node} went down");
        }
        Ok(())
    }

    /// Shuts down `node`.
    pub fn shutdown_on(&self, node: &ClusterNode) -> ClusterResult<()> {
        match self.on_node(node, &["SHUTDOWN"]) {
            Err(err) if err.is_connection_failure() => Ok(()),
            other => other,
        }
    }

    /// `SHUTDOWN SAVE|NOSAVE` is not available in cluster mode.
    pub fn shutdown_with(&self, _option: ShutdownOption) -> ClusterResult<()> {
        Err(ClusterError::unsupported(
            "SHUTDOWN with options is currently not supported in cluster mode",
        ))
    }

    fn on_all_masters(&self, args: &'static [&'static str]) -> ClusterResult<()> {
        self.executor()
            .execute_command_on_all_nodes(move |connection| {
                redis::cmd(args[0]).arg(&args[1..]).query::<()>(connection)
            })?
            .results_as_list()?;
        Ok(())
    }

    fn on_node(&self, node: &ClusterNode, args: &[&str]) -> ClusterResult<()> {
        self.execute_on_node(node, |connection| {
            redis::cmd(args[0]).arg(&args[1..]).query(connection)
        })
    }
}

fn as_duration((seconds, micros): (u64, u64)) -> Duration {
    Duration::from_secs(seconds) + Duration::from_micros(micros)
}
