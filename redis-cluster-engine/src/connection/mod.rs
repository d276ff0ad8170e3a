//! The synchronous command surface of a cluster.
//!
//! [`ClusterConnection`] routes every command to the node (or nodes) that
//! has to see it and reduces multi node replies to a single answer. Key
//! commands live in `keys`, server administration in `server` and cluster
//! administration in `cluster`.

mod cluster;
mod keys;
mod server;

pub use cluster::SlotState;
pub use server::ShutdownOption;

use std::sync::Arc;

use log::{trace, warn};
use redis::{RedisResult, Value};

use crate::client::ClusterParams;
use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::executor::{ClusterCommandExecutor, ExecutorConfig, MultiNodeResult};
use crate::node::ClusterNode;
use crate::resources::{NodeResourceProvider, PooledNodeProvider};
use crate::routing::common_slot;
use crate::topology::ClusterTopology;
use crate::topology_provider::ClusterTopologyProvider;

/// A connection to a Redis cluster.
///
/// Holds no socket itself. Every call obtains connections to the nodes it
/// needs from the [`NodeResourceProvider`] and gives them back before
/// returning, so one `ClusterConnection` can be shared between threads.
///
/// Operations that cannot work across shards (transactions, pipelines,
/// database selection) fail with [`ErrorKind::Unsupported`] without talking to
/// any node.
pub struct ClusterConnection<P: NodeResourceProvider = PooledNodeProvider> {
    executor: ClusterCommandExecutor<P>,
}

impl<P: NodeResourceProvider> ClusterConnection<P> {
    pub(crate) fn new(
        params: &ClusterParams,
        initial_nodes: Vec<ClusterNode>,
        resources: Arc<P>,
    ) -> ClusterResult<Self> {
        let topology = ClusterTopologyProvider::new(resources.clone(), initial_nodes)
            .with_cache_timeout(params.topology_cache_timeout);
        let config = ExecutorConfig::default()
            .set_max_redirects(params.max_redirects)
            .set_command_timeout(params.command_timeout)
            .set_max_threads(params.executor_threads);
        let executor = ClusterCommandExecutor::new(Arc::new(topology), resources, config)?;
        Ok(Self::from_executor(executor))
    }

    /// Creates a connection on top of an existing executor.
    pub fn from_executor(executor: ClusterCommandExecutor<P>) -> Self {
        Self { executor }
    }

    /// The executor commands are dispatched through.
    pub fn executor(&self) -> &ClusterCommandExecutor<P> {
        &self.executor
    }

    /// The current topology snapshot.
    pub fn topology(&self) -> ClusterResult<Arc<ClusterTopology>> {
        self.executor.topology()
    }

    /// Runs `command` on the master serving `key`.
    pub fn execute_on_key<T, F>(&self, key: &[u8], command: F) -> ClusterResult<T>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T>,
    {
        let node = self.topology()?.key_serving_master(key)?.clone();
        trace!("Routing key {} to {node}", String::from_utf8_lossy(key));
        self.executor
            .execute_command_on_resolved_node(command, node)?
            .into_value()
    }

    /// Runs `command` on `node`.
    pub fn execute_on_node<T, F>(&self, node: &ClusterNode, command: F) -> ClusterResult<T>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T>,
    {
        self.executor
            .execute_command_on_single_node(command, node)?
            .into_value()
    }

    /// Runs `command` on the master serving the slot all `keys` hash to.
    ///
    /// Fails with [`ErrorKind::InvalidUsage`] before anything is sent if the
    /// keys hash to different slots.
    pub(crate) fn execute_on_same_slot<T, K, F>(&self, keys: &[K], command: F) -> ClusterResult<T>
    where
        K: AsRef<[u8]>,
        F: Fn(&mut P::Connection) -> RedisResult<T>,
    {
        let slot = common_slot(keys)?;
        let topology = self.topology()?;
        let node = topology.master_for_slot(slot).cloned().ok_or_else(|| {
            ClusterError::from((
                ErrorKind::ClusterStateFailure,
                "Could not find master node serving slot",
                slot.to_string(),
            ))
        })?;
        self.executor
            .execute_command_on_resolved_node(command, node)?
            .into_value()
    }

    /// Switches the database. Only database `0` exists in a cluster.
    pub fn select(&self, db: i64) -> ClusterResult<()> {
        if db == 0 {
            Ok(())
        } else {
            Err(ClusterError::from((
                ErrorKind::Unsupported,
                "Cannot SELECT non zero index in cluster mode",
                db.to_string(),
            )))
        }
    }

    /// Transactions span one node only and are not available on a cluster.
    pub fn multi(&self) -> ClusterResult<()> {
        Err(ClusterError::unsupported("MULTI is currently not supported in cluster mode"))
    }

    /// Always fails with [`ErrorKind::Unsupported`].
    pub fn exec(&self) -> ClusterResult<Vec<Value>> {
        Err(ClusterError::unsupported("EXEC is currently not supported in cluster mode"))
    }

    /// Always fails with [`ErrorKind::Unsupported`].
    pub fn discard(&self) -> ClusterResult<()> {
        Err(ClusterError::unsupported("DISCARD is currently not supported in cluster mode"))
    }

    /// Always fails with [`ErrorKind::Unsupported`].
    pub fn watch<K: AsRef<[u8]>>(&self, _keys: &[K]) -> ClusterResult<()> {
        Err(ClusterError::unsupported("WATCH is currently not supported in cluster mode"))
    }

    /// Always fails with [`ErrorKind::Unsupported`].
    pub fn unwatch(&self) -> ClusterResult<()> {
        Err(ClusterError::unsupported("UNWATCH is currently not supported in cluster mode"))
    }

    /// Pipelines are not available on a cluster.
    pub fn open_pipeline(&self) -> ClusterResult<()> {
        Err(ClusterError::unsupported("Pipeline is currently not supported in cluster mode"))
    }

    /// Always fails with [`ErrorKind::Unsupported`].
    pub fn close_pipeline(&self) -> ClusterResult<Vec<Value>> {
        Err(ClusterError::unsupported("Pipeline is currently not supported in cluster mode"))
    }

    /// Client names are per node and cannot be set through a cluster connection.
    pub fn set_client_name(&self, _name: &str) -> ClusterResult<()> {
        Err(ClusterError::unsupported("CLIENT SETNAME is not supported in cluster mode"))
    }

    /// Always fails with [`ErrorKind::Unsupported`].
    pub fn get_client_name(&self) -> ClusterResult<Option<String>> {
        Err(ClusterError::unsupported("CLIENT GETNAME is not supported in cluster mode"))
    }

    /// Use [`cluster_replicate`](ClusterConnection::cluster_replicate) instead.
    pub fn replica_of(&self, _host: &str, _port: u16) -> ClusterResult<()> {
        Err(ClusterError::unsupported(
            "REPLICAOF is not supported in cluster mode, use CLUSTER REPLICATE",
        ))
    }

    /// Use [`cluster_replicate`](ClusterConnection::cluster_replicate) instead.
    pub fn replica_of_no_one(&self) -> ClusterResult<()> {
        Err(ClusterError::unsupported(
            "REPLICAOF is not supported in cluster mode, use CLUSTER REPLICATE",
        ))
    }
}

/// Values of the nodes that succeeded.
///
/// Failed nodes are logged and skipped. Fails only if there were nodes and
/// all of them failed.
fn tolerate_failures<T>(result: MultiNodeResult<T>, desc: &'static str) -> ClusterResult<Vec<T>> {
    if !result.is_empty() && result.results().iter().all(|node| !node.is_ok()) {
        let failures = result
            .into_results()
            .into_iter()
            .filter_map(|node| {
                let address = node.node().address();
                node.into_value().err().map(|err| (address, err))
            })
            .collect();
        return Err(ClusterError::from_node_failures(
            ErrorKind::ClusterStateFailure,
            desc,
            failures,
        ));
    }
    for (node, err) in result.errors() {
        warn!("{desc}: skipping {node}: {err}");
    }
    Ok(result.successful_results())
}

fn require_keys<K>(keys: &[K]) -> ClusterResult<()> {
    if keys.is_empty() {
        Err(ClusterError::from((ErrorKind::InvalidUsage, "Keys must not be empty")))
    } else {
        Ok(())
    }
}
