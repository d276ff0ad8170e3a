//! redis-cluster-engine routes commands across the nodes of a Redis Cluster.
//!
//! It sits on top of the `redis` crate and adds what a cluster needs on top
//! of single node connections: slot routing, a cached view of the cluster
//! topology, concurrent execution of a command on many nodes and reduction of
//! their replies.
//!
//! # Basic Operation
//!
//! ```rust,no_run
//! use redis_cluster_engine::ClusterClient;
//!
//! fn do_something() -> redis_cluster_engine::ClusterResult<()> {
//!     let client = ClusterClient::new(vec!["redis://127.0.0.1:7000", "redis://127.0.0.1:7001"])?;
//!     let connection = client.get_connection()?;
//!
//!     connection.set("key", 42)?;
//!     let value: i64 = connection.get("key")?;
//!     let keys_in_cluster = connection.db_size()?;
//!     # let _ = (value, keys_in_cluster);
//!     Ok(())
//! }
//! ```
//!
//! # Building Blocks
//!
//! * [`ClusterTopologyProvider`] asks nodes for `CLUSTER NODES` and caches the
//!   resulting [`ClusterTopology`] for a short time.
//! * A [`NodeResourceProvider`] hands out connections to one specific node.
//!   [`PooledNodeProvider`] keeps an r2d2 pool per node.
//! * [`ClusterCommandExecutor`] runs closures on one node, on an arbitrary
//!   node, on all masters or per key, collecting per node outcomes in a
//!   [`MultiNodeResult`].
//! * [`ClusterConnection`] offers the command methods and decides per command
//!   which nodes to ask and how to combine their answers.
//!
//! Every failure is reported as a [`ClusterError`] with an [`ErrorKind`], never
//! as the error type of the underlying client.

#![deny(non_camel_case_types)]
#![warn(missing_docs)]

pub use crate::client::{
    ClusterClient, ClusterClientBuilder, DEFAULT_EXECUTOR_THREADS, DEFAULT_MAX_REDIRECTS,
    DEFAULT_POOL_CONNECTION_TIMEOUT, DEFAULT_POOL_MAX_SIZE, DEFAULT_TOPOLOGY_CACHE_TIMEOUT,
};
pub use crate::connection::{ClusterConnection, ShutdownOption, SlotState};
pub use crate::errors::{translate, ClusterError, ClusterResult, ErrorKind, Redirect};
pub use crate::executor::{ClusterCommandExecutor, ExecutorConfig, MultiNodeResult, NodeResult};
pub use crate::info::ClusterInfo;
pub use crate::node::{ClusterNode, LinkState, NodeFlag, NodeRole, SlotRange};
pub use crate::resources::{NodeResourceProvider, PooledNodeConnection, PooledNodeProvider};
pub use crate::routing::{get_slot, is_same_slot};
pub use crate::slot_map::SLOT_SIZE;
pub use crate::topology::ClusterTopology;
pub use crate::topology_provider::{
    ClusterTopologyProvider, FixedTopologyProvider, TopologyProvider,
};

mod client;
mod connection;
mod errors;
mod executor;
mod info;
mod node;
mod resources;
mod routing;
mod slot_map;
mod topology;
mod topology_provider;
