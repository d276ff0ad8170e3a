//! Cached access to the current cluster topology.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use log::{debug, warn};

use crate::client::DEFAULT_TOPOLOGY_CACHE_TIMEOUT;
use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::node::ClusterNode;
use crate::resources::{NodeLease, NodeResourceProvider};
use crate::topology::{parse_cluster_nodes, ClusterTopology};

/// Source of [`ClusterTopology`] snapshots.
pub trait TopologyProvider: Send + Sync {
    /// Returns the current topology.
    ///
    /// Callers get an immutable snapshot and may keep it as long as they like.
    fn topology(&self) -> ClusterResult<Arc<ClusterTopology>>;

    /// Marks the current snapshot as stale so the next call to
    /// [`topology`](TopologyProvider::topology) fetches a fresh one.
    fn invalidate(&self) {}
}

/// Serves one fixed topology, for clusters whose layout is known upfront.
pub struct FixedTopologyProvider {
    topology: Arc<ClusterTopology>,
}

impl FixedTopologyProvider {
    /// Serves `topology` until dropped.
    pub fn new(topology: ClusterTopology) -> Self {
        Self {
            topology: Arc::new(topology),
        }
    }
}

impl TopologyProvider for FixedTopologyProvider {
    fn topology(&self) -> ClusterResult<Arc<ClusterTopology>> {
        Ok(self.topology.clone())
    }
}

struct CachedTopology {
    topology: Arc<ClusterTopology>,
    expires_at: Instant,
}

impl CachedTopology {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Discovers the topology by asking nodes for `CLUSTER NODES`.
///
/// A fetched topology is served from cache until the cache timeout elapsed.
/// Concurrent callers that find the cache expired may each fetch, the last
/// fetch wins. Readers never block each other.
pub struct ClusterTopologyProvider<P: NodeResourceProvider> {
    resources: Arc<P>,
    initial_nodes: Vec<ClusterNode>,
    cache_timeout: Duration,
    cached: ArcSwapOption<CachedTopology>,
}

impl<P: NodeResourceProvider> ClusterTopologyProvider<P> {
    /// Creates a provider that discovers the cluster through `initial_nodes`.
    pub fn new(resources: Arc<P>, initial_nodes: Vec<ClusterNode>) -> Self {
        Self {
            resources,
            initial_nodes,
            cache_timeout: DEFAULT_TOPOLOGY_CACHE_TIMEOUT,
            cached: ArcSwapOption::empty(),
        }
    }

    /// Sets how long a fetched topology is reused.
    pub fn with_cache_timeout(mut self, cache_timeout: Duration) -> Self {
        self.cache_timeout = cache_timeout;
        self
    }

    /// Nodes asked for the topology, in order: the nodes of the last known
    /// topology followed by initial nodes that were not part of it.
    fn candidates(&self) -> Vec<ClusterNode> {
        let mut candidates = match self.cached.load_full() {
            Some(cached) => cached
                .topology
                .active_nodes()
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::with_capacity(self.initial_nodes.len()),
        };
        for node in &self.initial_nodes {
            if !candidates.contains(node) {
                candidates.push(node.clone());
            }
        }
        candidates
    }

    fn fetch_from(&self, node: &ClusterNode) -> ClusterResult<ClusterTopology> {
        let response = {
            let mut lease = NodeLease::acquire(&*self.resources, node)?;
            redis::cmd("CLUSTER")
                .arg("NODES")
                .query::<String>(lease.connection())?
        };
        let nodes = parse_cluster_nodes(&response, node.host())?;
        if nodes.is_empty() {
            return Err(ClusterError::from((
                ErrorKind::UnexpectedResponse,
                "CLUSTER NODES did not list any reachable node",
                node.to_string(),
            )));
        }
        Ok(ClusterTopology::new(nodes))
    }

    fn refresh(&self) -> ClusterResult<Arc<ClusterTopology>> {
        let mut failures = Vec::new();
        for node in self.candidates() {
            match self.fetch_from(&node) {
                Ok(topology) => {
                    let topology = Arc::new(topology);
                    debug!(
                        "Fetched topology with {} nodes from {node}",
                        topology.nodes().len()
                    );
                    if !topology.is_fully_covered() {
                        warn!(
                            "Topology from {node} only covers {} slots",
                            topology.slot_coverage()
                        );
                    }
                    self.resources.register_topology(&topology);
                    self.cached.store(Some(Arc::new(CachedTopology {
                        topology: topology.clone(),
                        expires_at: Instant::now() + self.cache_timeout,
                    })));
                    return Ok(topology);
                }
                Err(err) => {
                    debug!("Could not fetch topology from {node}: {err}");
                    failures.push((node.address(), err));
                }
            }
        }
        Err(ClusterError::from_node_failures(
            ErrorKind::ClusterStateFailure,
            "Could not retrieve cluster information",
            failures,
        ))
    }
}

impl<P: NodeResourceProvider> TopologyProvider for ClusterTopologyProvider<P> {
    fn topology(&self) -> ClusterResult<Arc<ClusterTopology>> {
        if let Some(cached) = self.cached.load().as_ref() {
            if cached.is_fresh() {
                return Ok(cached.topology.clone());
            }
        }
        self.refresh()
    }

    fn invalidate(&self) {
        if let Some(cached) = self.cached.load_full() {
            self.cached.store(Some(Arc::new(CachedTopology {
                topology: cached.topology.clone(),
                expires_at: Instant::now(),
            })));
        }
    }
}
