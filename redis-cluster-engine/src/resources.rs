//! Acquisition of connections bound to one specific node.

use std::collections::HashMap;

use arcstr::ArcStr;
use log::{debug, trace};
use parking_lot::RwLock;
use redis::{ConnectionInfo, ConnectionLike, RedisConnectionInfo, RedisResult, Value};

use crate::client::ClusterParams;
use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::node::ClusterNode;
use crate::topology::ClusterTopology;

/// Hands out connections to specific cluster nodes.
///
/// Every successful [`acquire`](NodeResourceProvider::acquire) must be paired
/// with exactly one [`release`](NodeResourceProvider::release) of the same
/// connection, on success and failure paths alike. Implementations have to be
/// safe to call concurrently, including for the same node.
pub trait NodeResourceProvider: Send + Sync + 'static {
    /// The node bound connection handed to commands.
    type Connection: ConnectionLike + Send + 'static;

    /// Obtains a connection to exactly `node`.
    ///
    /// Fails with [`ErrorKind::IllegalArgument`] if the node is unknown.
    fn acquire(&self, node: &ClusterNode) -> ClusterResult<Self::Connection>;

    /// Gives a connection obtained from [`acquire`](NodeResourceProvider::acquire) back.
    fn release(&self, node: &ClusterNode, connection: Self::Connection);

    /// Called with every freshly refreshed topology.
    fn register_topology(&self, _topology: &ClusterTopology) {}
}

/// A connection acquired for one node, released when the lease is dropped.
///
/// Releasing on drop keeps acquire and release paired even when the command
/// using the connection fails or panics.
pub(crate) struct NodeLease<'a, P: NodeResourceProvider + ?Sized> {
    resources: &'a P,
    node: &'a ClusterNode,
    connection: Option<P::Connection>,
}

impl<'a, P: NodeResourceProvider + ?Sized> NodeLease<'a, P> {
    pub(crate) fn acquire(resources: &'a P, node: &'a ClusterNode) -> ClusterResult<Self> {
        let connection = resources.acquire(node)?;
        Ok(Self {
            resources,
            node,
            connection: Some(connection),
        })
    }

    pub(crate) fn connection(&mut self) -> &mut P::Connection {
        match self.connection.as_mut() {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<P: NodeResourceProvider + ?Sized> Drop for NodeLease<'_, P> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.resources.release(self.node, connection);
        }
    }
}

pub(crate) fn unknown_node(node: &ClusterNode) -> ClusterError {
    ClusterError::from((
        ErrorKind::IllegalArgument,
        "Node is unknown to cluster",
        node.to_string(),
    ))
}

pub(crate) fn connection_info(node: &ClusterNode, params: &ClusterParams) -> ConnectionInfo {
    ConnectionInfo {
        addr: redis::ConnectionAddr::Tcp(node.host().to_string(), node.port()),
        redis: RedisConnectionInfo {
            username: params.username.clone(),
            password: params.password.clone(),
            ..Default::default()
        },
    }
}

/// A connection borrowed from a node's pool.
///
/// Dropping it hands it back to the pool.
pub struct PooledNodeConnection(r2d2::PooledConnection<redis::Client>);

impl ConnectionLike for PooledNodeConnection {
    fn req_packed_command(&mut self, cmd: &[u8]) -> RedisResult<Value> {
        self.0.req_packed_command(cmd)
    }

    fn req_packed_commands(
        &mut self,
        cmd: &[u8],
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<Value>> {
        self.0.req_packed_commands(cmd, offset, count)
    }

    fn get_db(&self) -> i64 {
        self.0.get_db()
    }

    fn check_connection(&mut self) -> bool {
        self.0.check_connection()
    }

    fn is_open(&self) -> bool {
        self.0.is_open()
    }
}

/// Resource provider keeping one r2d2 pool per node address.
///
/// Pools exist for the initial nodes and for every node of the latest
/// topology. Pools are created lazily and only connect on first use.
pub struct PooledNodeProvider {
    pools: RwLock<HashMap<ArcStr, r2d2::Pool<redis::Client>>>,
    seeds: Vec<ArcStr>,
    params: ClusterParams,
}

impl PooledNodeProvider {
    pub(crate) fn new(params: ClusterParams, initial_nodes: &[ClusterNode]) -> ClusterResult<Self> {
        let mut pools = HashMap::with_capacity(initial_nodes.len());
        for node in initial_nodes {
            pools.insert(node.address(), build_pool(node, &params)?);
        }
        Ok(Self {
            pools: RwLock::new(pools),
            seeds: initial_nodes.iter().map(ClusterNode::address).collect(),
            params,
        })
    }

    /// Addresses a pool is currently registered for.
    pub fn registered_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<_> = self.pools.read().keys().map(|a| a.to_string()).collect();
        addresses.sort_unstable();
        addresses
    }
}

fn build_pool(
    node: &ClusterNode,
    params: &ClusterParams,
) -> ClusterResult<r2d2::Pool<redis::Client>> {
    let client = redis::Client::open(connection_info(node, params))?;
    Ok(r2d2::Pool::builder()
        .max_size(params.pool_max_size)
        .min_idle(Some(0))
        .connection_timeout(params.pool_connection_timeout)
        .build_unchecked(client))
}

impl NodeResourceProvider for PooledNodeProvider {
    type Connection = PooledNodeConnection;

    fn acquire(&self, node: &ClusterNode) -> ClusterResult<PooledNodeConnection> {
        let pool = self
            .pools
            .read()
            .get(&node.address())
            .cloned()
            .ok_or_else(|| unknown_node(node))?;
        trace!("Borrowing connection to {node}");
        Ok(PooledNodeConnection(pool.get()?))
    }

    fn release(&self, node: &ClusterNode, connection: PooledNodeConnection) {
        trace!("Returning connection to {node}");
        drop(connection);
    }

    fn register_topology(&self, topology: &ClusterTopology) {
        let mut pools = self.pools.write();
        pools.retain(|address, _| {
            self.seeds.contains(address)
                || topology
                    .nodes()
                    .iter()
                    .any(|node| node.address() == *address)
        });
        for node in topology.nodes() {
            let address = node.address();
            if pools.contains_key(&address) {
                continue;
            }
            match build_pool(node, &self.params) {
                Ok(pool) => {
                    debug!("Registered connection pool for {address}");
                    pools.insert(address, pool);
                }
                Err(err) => debug!("Could not create connection pool for {address}: {err}"),
            }
        }
    }
}
