//! Runs commands on one, some or all cluster nodes.
//!
//! Single node commands run on the calling thread. Multi node commands run
//! concurrently on a bounded pool of blocking threads owned by the executor,
//! and the caller waits for all of them.

mod result;

pub use result::{MultiNodeResult, NodeResult};

use std::borrow::Borrow;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, trace};
use redis::{ConnectionLike, RedisResult};
use tokio::runtime::Runtime;

use crate::client::{DEFAULT_EXECUTOR_THREADS, DEFAULT_MAX_REDIRECTS};
use crate::errors::{translate, ClusterError, ClusterResult, ErrorKind};
use crate::node::ClusterNode;
use crate::resources::{unknown_node, NodeLease, NodeResourceProvider};
use crate::topology::ClusterTopology;
use crate::topology_provider::TopologyProvider;

/// Settings of a [`ClusterCommandExecutor`].
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    max_redirects: usize,
    command_timeout: Option<Duration>,
    max_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            command_timeout: None,
            max_threads: DEFAULT_EXECUTOR_THREADS,
        }
    }
}

impl ExecutorConfig {
    /// Sets how many MOVED or ASK redirects are followed for one command.
    pub fn set_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Bounds the total wait for a multi node command.
    pub fn set_command_timeout(mut self, command_timeout: Option<Duration>) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Sets the number of threads multi node commands run on.
    pub fn set_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.max(1);
        self
    }

    /// How many redirects are followed for one command.
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// The bound for multi node commands, if any.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }
}

type KeyedCommand<C, T> = dyn Fn(&mut C, Option<&[u8]>) -> RedisResult<T> + Send + Sync;

type Task = (ClusterNode, Option<(usize, Vec<u8>)>);

/// Runs a command against one node, following redirects.
struct NodeInvoker<P: NodeResourceProvider> {
    topology: Arc<dyn TopologyProvider>,
    resources: Arc<P>,
    max_redirects: usize,
}

fn run_command<C, T, F>(connection: &mut C, asking: bool, command: &F) -> RedisResult<T>
where
    C: ConnectionLike,
    F: Fn(&mut C) -> RedisResult<T> + ?Sized,
{
    if asking {
        redis::cmd("ASKING").query::<()>(&mut *connection)?;
    }
    command(connection)
}

impl<P: NodeResourceProvider> NodeInvoker<P> {
    fn invoke<T, F>(&self, command: &F, node: ClusterNode) -> ClusterResult<T>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T> + ?Sized,
    {
        let mut target = node;
        let mut asking = false;
        let mut redirects = 0;
        loop {
            let result = {
                let mut lease = NodeLease::acquire(&*self.resources, &target)?;
                run_command(lease.connection(), asking, command)
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => translate(err),
            };
            let redirect = match err.redirect() {
                Some(redirect) => redirect.clone(),
                None => return Err(err),
            };

            let (host, port) = redirect.target();
            if redirects >= self.max_redirects {
                return Err(ClusterError::from((
                    ErrorKind::TooManyRedirects,
                    "Too many cluster redirects",
                    format!("gave up after {redirects} redirects, last one to {host}:{port}"),
                )));
            }
            redirects += 1;

            if redirect.is_ask() {
                trace!("Slot {} is migrating to {host}:{port}", redirect.slot());
            } else {
                debug!("Slot {} moved to {host}:{port}", redirect.slot());
                self.topology.invalidate();
            }
            target = self.redirect_target(host, port)?;
            asking = redirect.is_ask();
        }
    }

    /// Looks up a redirect target, refreshing the topology once if the
    /// cached snapshot does not know it yet.
    fn redirect_target(&self, host: &str, port: u16) -> ClusterResult<ClusterNode> {
        if let Ok(node) = self.topology.topology()?.lookup_address(host, port) {
            return Ok(node.clone());
        }
        debug!("Redirect target {host}:{port} is not in the topology, refreshing");
        self.topology.invalidate();
        let topology = self.topology.topology()?;
        let node = topology.lookup_address(host, port)?;
        Ok(node.clone())
    }
}

fn resolve(topology: &ClusterTopology, node: &ClusterNode) -> ClusterResult<ClusterNode> {
    topology
        .lookup(node)
        .cloned()
        .map_err(|_| unknown_node(node))
}

/// Dispatches commands to cluster nodes.
///
/// Every command is a closure receiving a connection bound to one node. The
/// connection is acquired from the [`NodeResourceProvider`] right before the
/// command runs and released right after, whatever the outcome.
pub struct ClusterCommandExecutor<P: NodeResourceProvider> {
    invoker: Arc<NodeInvoker<P>>,
    command_timeout: Option<Duration>,
    runtime: Option<Runtime>,
}

impl<P: NodeResourceProvider> ClusterCommandExecutor<P> {
    /// Creates an executor and starts its worker threads.
    ///
    /// Threads are only spawned once multi node commands come in.
    pub fn new(
        topology: Arc<dyn TopologyProvider>,
        resources: Arc<P>,
        config: ExecutorConfig,
    ) -> ClusterResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_threads)
            .thread_name("redis-cluster-executor")
            .enable_time()
            .build()
            .map_err(|err| {
                ClusterError::from((
                    ErrorKind::ResourceFailure,
                    "Could not start executor threads",
                    err.to_string(),
                ))
            })?;
        Ok(Self {
            invoker: Arc::new(NodeInvoker {
                topology,
                resources,
                max_redirects: config.max_redirects,
            }),
            command_timeout: config.command_timeout,
            runtime: Some(runtime),
        })
    }

    /// The current topology snapshot.
    pub fn topology(&self) -> ClusterResult<Arc<ClusterTopology>> {
        self.invoker.topology.topology()
    }

    /// Runs `command` on `node`, following MOVED and ASK redirects.
    ///
    /// `node` may be a partial descriptor, it is resolved against the current
    /// topology. Failures are returned as is.
    pub fn execute_command_on_single_node<T, F>(
        &self,
        command: F,
        node: &ClusterNode,
    ) -> ClusterResult<NodeResult<T>>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T>,
    {
        let topology = self.topology()?;
        let target = resolve(&topology, node)?;
        self.execute_command_on_resolved_node(command, target)
    }

    /// Runs `command` on a node taken from a topology snapshot, without
    /// resolving it again.
    pub(crate) fn execute_command_on_resolved_node<T, F>(
        &self,
        command: F,
        target: ClusterNode,
    ) -> ClusterResult<NodeResult<T>>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T>,
    {
        let value = self.invoker.invoke(&command, target.clone())?;
        Ok(NodeResult::new(target, Ok(value)))
    }

    /// Runs `command` on the first active node that can be reached.
    pub fn execute_command_on_arbitrary_node<T, F>(&self, command: F) -> ClusterResult<NodeResult<T>>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T>,
    {
        let topology = self.topology()?;
        let mut last_error = None;
        for node in topology.active_nodes() {
            match self.invoker.invoke(&command, node.clone()) {
                Ok(value) => return Ok(NodeResult::new(node.clone(), Ok(value))),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::ResourceFailure | ErrorKind::ConnectionFailure
                    ) =>
                {
                    debug!("Node {node} is unavailable, trying the next one: {err}");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ClusterError::from((ErrorKind::ClusterStateFailure, "Cluster has no active node"))
        }))
    }

    /// Runs `command` concurrently on every active master.
    pub fn execute_command_on_all_nodes<T, F>(&self, command: F) -> ClusterResult<MultiNodeResult<T>>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let topology = self.topology()?;
        let tasks = topology
            .active_master_nodes()
            .into_iter()
            .map(|node| (node.clone(), None))
            .collect();
        self.fan_out(keyless(command), tasks)
    }

    /// Runs `command` concurrently on every active node, replicas included.
    pub fn execute_command_on_all_active_nodes<T, F>(
        &self,
        command: F,
    ) -> ClusterResult<MultiNodeResult<T>>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let topology = self.topology()?;
        let tasks = topology
            .active_nodes()
            .into_iter()
            .map(|node| (node.clone(), None))
            .collect();
        self.fan_out(keyless(command), tasks)
    }

    /// Runs `command` concurrently on the given nodes.
    ///
    /// Fails with [`ErrorKind::IllegalArgument`] before anything runs if one of
    /// the nodes is not part of the cluster.
    pub fn execute_command_async_on_nodes<T, F, I>(
        &self,
        command: F,
        nodes: I,
    ) -> ClusterResult<MultiNodeResult<T>>
    where
        F: Fn(&mut P::Connection) -> RedisResult<T> + Send + Sync + 'static,
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Borrow<ClusterNode>,
    {
        let topology = self.topology()?;
        let tasks = nodes
            .into_iter()
            .map(|node| Ok((resolve(&topology, node.borrow())?, None)))
            .collect::<ClusterResult<Vec<_>>>()?;
        self.fan_out(keyless(command), tasks)
    }

    /// Runs `command` once per key on the master serving that key.
    ///
    /// The results carry their key and can be put back into key order with
    /// [`MultiNodeResult::results_in_key_order`].
    pub fn execute_multi_key_command<T, F, K>(
        &self,
        command: F,
        keys: &[K],
    ) -> ClusterResult<MultiNodeResult<T>>
    where
        F: Fn(&mut P::Connection, &[u8]) -> RedisResult<T> + Send + Sync + 'static,
        T: Send + 'static,
        K: AsRef<[u8]>,
    {
        let topology = self.topology()?;
        let tasks = keys
            .iter()
            .enumerate()
            .map(|(position, key)| {
                let key = key.as_ref();
                let node = topology.key_serving_master(key)?.clone();
                Ok((node, Some((position, key.to_vec()))))
            })
            .collect::<ClusterResult<Vec<_>>>()?;
        let command: Arc<KeyedCommand<P::Connection, T>> =
            Arc::new(move |connection: &mut P::Connection, key: Option<&[u8]>| {
                command(connection, key.unwrap_or_default())
            });
        self.fan_out(command, tasks)
    }

    fn fan_out<T: Send + 'static>(
        &self,
        command: Arc<KeyedCommand<P::Connection, T>>,
        tasks: Vec<Task>,
    ) -> ClusterResult<MultiNodeResult<T>> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            ClusterError::from((ErrorKind::ExecutionFailure, "Executor is shut down"))
        })?;
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ClusterError::from((
                ErrorKind::InvalidUsage,
                "Multi node commands cannot be run from within an async runtime",
            )));
        }
        debug!("Running command on {} nodes", tasks.len());

        let mut abort_handles = Vec::with_capacity(tasks.len());
        let pending: Vec<_> = tasks
            .into_iter()
            .map(|(node, key)| {
                let invoker = self.invoker.clone();
                let command = command.clone();
                let task_node = node.clone();
                let task_key = key.as_ref().map(|(_, key)| key.clone());
                let handle = runtime.spawn_blocking(move || {
                    invoker.invoke(
                        &|connection: &mut P::Connection| {
                            (*command)(connection, task_key.as_deref())
                        },
                        task_node,
                    )
                });
                abort_handles.push(handle.abort_handle());
                async move {
                    let value = match handle.await {
                        Ok(value) => value,
                        Err(err) => Err(ClusterError::from((
                            ErrorKind::ExecutionFailure,
                            "Command task failed",
                            err.to_string(),
                        ))),
                    };
                    match key {
                        Some((position, key)) => NodeResult::for_key(node, position, key, value),
                        None => NodeResult::new(node, value),
                    }
                }
            })
            .collect();

        let command_timeout = self.command_timeout;
        let results = runtime.block_on(async move {
            let all = join_all(pending);
            match command_timeout {
                Some(limit) => tokio::time::timeout(limit, all).await.ok(),
                None => Some(all.await),
            }
        });
        match results {
            Some(results) => Ok(MultiNodeResult::new(results)),
            None => {
                for handle in abort_handles {
                    handle.abort();
                }
                Err(ClusterError::from((
                    ErrorKind::CommandTimeout,
                    "Multi node command timed out",
                    format!("no complete result within {command_timeout:?}"),
                )))
            }
        }
    }
}

fn keyless<C, T, F>(command: F) -> Arc<KeyedCommand<C, T>>
where
    C: 'static,
    F: Fn(&mut C) -> RedisResult<T> + Send + Sync + 'static,
{
    Arc::new(move |connection: &mut C, _key: Option<&[u8]>| command(connection))
}

impl<P: NodeResourceProvider> Drop for ClusterCommandExecutor<P> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
