use std::sync::Arc;
use std::time::Duration;

use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo};

use crate::connection::ClusterConnection;
use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::node::ClusterNode;
use crate::resources::{NodeResourceProvider, PooledNodeProvider};

/// Default time a fetched topology is served from cache.
pub const DEFAULT_TOPOLOGY_CACHE_TIMEOUT: Duration = Duration::from_millis(100);
/// Default number of MOVED or ASK redirects followed for one command.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;
/// Default upper bound for connections pooled per node.
pub const DEFAULT_POOL_MAX_SIZE: u32 = 8;
/// Default time to wait for a pooled connection.
pub const DEFAULT_POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(2);
/// Default number of threads running multi node commands.
pub const DEFAULT_EXECUTOR_THREADS: usize = 16;

/// Redis cluster specific parameters.
#[derive(Clone, Debug)]
pub(crate) struct ClusterParams {
    pub(crate) password: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) topology_cache_timeout: Duration,
    pub(crate) max_redirects: usize,
    pub(crate) command_timeout: Option<Duration>,
    pub(crate) pool_max_size: u32,
    pub(crate) pool_connection_timeout: Duration,
    pub(crate) executor_threads: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            password: None,
            username: None,
            topology_cache_timeout: DEFAULT_TOPOLOGY_CACHE_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            command_timeout: None,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            pool_connection_timeout: DEFAULT_POOL_CONNECTION_TIMEOUT,
            executor_threads: DEFAULT_EXECUTOR_THREADS,
        }
    }
}

/// Collects the seed nodes and tuning knobs of a [`ClusterClient`].
pub struct ClusterClientBuilder {
    initial_nodes: ClusterResult<Vec<ConnectionInfo>>,
    cluster_params: ClusterParams,
}

impl ClusterClientBuilder {
    /// Starts a builder seeded with `initial_nodes`. Unparsable addresses are
    /// reported by [`build`](Self::build).
    pub fn new<T: IntoConnectionInfo>(initial_nodes: Vec<T>) -> ClusterClientBuilder {
        ClusterClientBuilder {
            initial_nodes: initial_nodes
                .into_iter()
                .map(|node| node.into_connection_info().map_err(ClusterError::from))
                .collect(),
            cluster_params: ClusterParams::default(),
        }
    }

    /// Validates the seed nodes and produces the client.
    ///
    /// Nothing is contacted here; the first topology fetch happens once a
    /// connection issues a command.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::IllegalArgument`] when the seed list is empty,
    /// when a seed is not a TCP address or when seeds disagree on credentials.
    pub fn build(self) -> ClusterResult<ClusterClient> {
        let seeds = self.initial_nodes?;
        let Some(first) = seeds.first() else {
            return Err(illegal("At least one initial node is required"));
        };

        let mut cluster_params = self.cluster_params;
        cluster_params.password = cluster_params
            .password
            .or_else(|| first.redis.password.clone());
        cluster_params.username = cluster_params
            .username
            .or_else(|| first.redis.username.clone());

        let mut nodes: Vec<ClusterNode> = Vec::with_capacity(seeds.len());
        for seed in &seeds {
            if conflicts(&seed.redis.password, &cluster_params.password) {
                return Err(illegal("Initial nodes disagree on the password"));
            }
            if conflicts(&seed.redis.username, &cluster_params.username) {
                return Err(illegal("Initial nodes disagree on the username"));
            }
            let ConnectionAddr::Tcp(host, port) = &seed.addr else {
                return Err(ClusterError::from((
                    ErrorKind::IllegalArgument,
                    "Initial nodes must be TCP addresses",
                    seed.addr.to_string(),
                )));
            };
            let node = ClusterNode::new(host.as_str(), *port);
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }

        Ok(ClusterClient {
            initial_nodes: nodes,
            cluster_params,
        })
    }

    /// Overrides the password taken from the seed URLs.
    pub fn password(mut self, password: String) -> ClusterClientBuilder {
        self.cluster_params.password = Some(password);
        self
    }

    /// Overrides the username taken from the seed URLs.
    pub fn username(mut self, username: String) -> ClusterClientBuilder {
        self.cluster_params.username = Some(username);
        self
    }

    /// Sets how long a fetched topology is reused before it is fetched again
    /// (default is 100 ms).
    pub fn topology_cache_timeout(mut self, timeout: Duration) -> ClusterClientBuilder {
        self.cluster_params.topology_cache_timeout = timeout;
        self
    }

    /// Sets how many MOVED or ASK redirects are followed for one command
    /// (default is 5).
    pub fn max_redirects(mut self, max_redirects: usize) -> ClusterClientBuilder {
        self.cluster_params.max_redirects = max_redirects;
        self
    }

    /// Bounds the total wait for a multi node command.
    ///
    /// Without a timeout (the default) the caller waits until every node
    /// answered or failed.
    pub fn command_timeout(mut self, timeout: Duration) -> ClusterClientBuilder {
        self.cluster_params.command_timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of pooled connections per node (default is 8).
    pub fn pool_max_size(mut self, max_size: u32) -> ClusterClientBuilder {
        self.cluster_params.pool_max_size = max_size;
        self
    }

    /// Sets how long acquiring a pooled connection may take (default is 2 s).
    pub fn pool_connection_timeout(mut self, timeout: Duration) -> ClusterClientBuilder {
        self.cluster_params.pool_connection_timeout = timeout;
        self
    }

    /// Sets the number of threads running multi node commands (default is 16).
    pub fn executor_threads(mut self, threads: usize) -> ClusterClientBuilder {
        self.cluster_params.executor_threads = threads.max(1);
        self
    }
}

/// Entry point of the engine: remembers the seed nodes and settings and
/// hands out [`ClusterConnection`]s.
#[derive(Clone)]
pub struct ClusterClient {
    initial_nodes: Vec<ClusterNode>,
    cluster_params: ClusterParams,
}

impl ClusterClient {
    /// Shorthand for `ClusterClient::builder(initial_nodes).build()`.
    pub fn new<T: IntoConnectionInfo>(initial_nodes: Vec<T>) -> ClusterResult<ClusterClient> {
        ClusterClientBuilder::new(initial_nodes).build()
    }

    /// Starts configuring a client seeded with `initial_nodes`.
    pub fn builder<T: IntoConnectionInfo>(initial_nodes: Vec<T>) -> ClusterClientBuilder {
        ClusterClientBuilder::new(initial_nodes)
    }

    /// The nodes used to discover the cluster.
    pub fn initial_nodes(&self) -> &[ClusterNode] {
        &self.initial_nodes
    }

    /// Creates a [`ClusterConnection`] backed by one connection pool per node.
    ///
    /// Pools connect lazily, so this only fails if the executor threads
    /// cannot be started.
    pub fn get_connection(&self) -> ClusterResult<ClusterConnection<PooledNodeProvider>> {
        let resources =
            PooledNodeProvider::new(self.cluster_params.clone(), &self.initial_nodes)?;
        self.get_connection_with(Arc::new(resources))
    }

    /// Creates a [`ClusterConnection`] that obtains node connections from
    /// `resources`.
    pub fn get_connection_with<P: NodeResourceProvider>(
        &self,
        resources: Arc<P>,
    ) -> ClusterResult<ClusterConnection<P>> {
        ClusterConnection::new(&self.cluster_params, self.initial_nodes.clone(), resources)
    }
}

fn illegal(message: &'static str) -> ClusterError {
    ClusterError::from((ErrorKind::IllegalArgument, message))
}

// A seed may omit credentials, but when it names them they must match.
fn conflicts(seed: &Option<String>, chosen: &Option<String>) -> bool {
    seed.is_some() && seed != chosen
}
