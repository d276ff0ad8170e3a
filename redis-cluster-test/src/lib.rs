//! Testing support
//!
//! This crate provides `MockNodeProvider`, a [`NodeResourceProvider`] whose
//! connections answer through a handler closure instead of a Redis server,
//! and counts every acquire and release. Together with the reply builders
//! below it lets cluster behaviour be tested without a running cluster.
//!
//! # Example
//!
//! ```rust
//! use redis_cluster_engine::ClusterClient;
//! use redis_cluster_test::{contains_slice, respond_cluster_nodes, MockNodeProvider, MockSlotRange};
//! use redis::Value;
//! use std::sync::Arc;
//!
//! let layout = MockSlotRange::three_masters();
//! let provider = Arc::new(MockNodeProvider::new(move |cmd: &[u8], _port| {
//!     respond_cluster_nodes(cmd, &layout)?;
//!     if contains_slice(cmd, b"DBSIZE") {
//!         return Err(Ok(Value::Int(1)));
//!     }
//!     Ok(())
//! }));
//!
//! let client = ClusterClient::new(vec!["redis://127.0.0.1:7000"]).unwrap();
//! let connection = client.get_connection_with(provider).unwrap();
//! assert_eq!(connection.db_size().unwrap(), 3);
//! ```

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use redis::{ConnectionLike, ErrorKind, RedisError, RedisResult, Value};
use redis_cluster_engine::{
    ClusterError, ClusterNode, ClusterResult, ClusterTopology, NodeResourceProvider, NodeRole,
    SlotRange,
};

/// Host every mock node listens on.
pub const MOCK_HOST: &str = "127.0.0.1";

/// Answers a packed command sent to the node with the given port.
///
/// `Err(reply)` answers the command, `Ok(())` means the handler does not know
/// the command, which fails the call with a client error.
pub type Handler = Arc<dyn Fn(&[u8], u16) -> Result<(), RedisResult<Value>> + Send + Sync>;

/// A node handle answering through a [`Handler`].
pub struct MockConnection {
    handler: Handler,
    port: u16,
    id: u64,
}

impl MockConnection {
    /// Port of the node the connection belongs to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Unique number of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl ConnectionLike for MockConnection {
    fn req_packed_command(&mut self, cmd: &[u8]) -> RedisResult<Value> {
        match (self.handler)(cmd, self.port) {
            Err(reply) => reply,
            Ok(()) => Err(RedisError::from((
                ErrorKind::ClientError,
                "Unexpected command",
                String::from_utf8_lossy(cmd).into_owned(),
            ))),
        }
    }

    fn req_packed_commands(
        &mut self,
        cmd: &[u8],
        _offset: usize,
        _count: usize,
    ) -> RedisResult<Vec<Value>> {
        self.req_packed_command(cmd).map(|value| vec![value])
    }

    fn get_db(&self) -> i64 {
        0
    }

    fn check_connection(&mut self) -> bool {
        true
    }

    fn is_open(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct Leases {
    acquired: Vec<(ClusterNode, u64)>,
    released: Vec<(ClusterNode, u64)>,
}

/// A resource provider handing out [`MockConnection`]s and recording every
/// acquire and release.
pub struct MockNodeProvider {
    handler: Handler,
    known_ports: Option<HashSet<u16>>,
    failing_ports: HashSet<u16>,
    next_id: AtomicU64,
    leases: Mutex<Leases>,
}

impl MockNodeProvider {
    /// Creates a provider whose nodes answer with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[u8], u16) -> Result<(), RedisResult<Value>> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            known_ports: None,
            failing_ports: HashSet::new(),
            next_id: AtomicU64::new(0),
            leases: Mutex::new(Leases::default()),
        }
    }

    /// Only nodes with these ports can be acquired, others are unknown.
    pub fn with_known_ports(mut self, ports: &[u16]) -> Self {
        self.known_ports = Some(ports.iter().copied().collect());
        self
    }

    /// Acquiring a connection to these ports fails with a resource failure.
    pub fn with_failing_ports(mut self, ports: &[u16]) -> Self {
        self.failing_ports = ports.iter().copied().collect();
        self
    }

    /// Ports of all acquired connections, in acquisition order.
    pub fn acquired_ports(&self) -> Vec<u16> {
        self.leases
            .lock()
            .acquired
            .iter()
            .map(|(node, _)| node.port())
            .collect()
    }

    /// Number of successful acquisitions.
    pub fn acquire_count(&self) -> usize {
        self.leases.lock().acquired.len()
    }

    /// Number of releases.
    pub fn release_count(&self) -> usize {
        self.leases.lock().released.len()
    }

    /// Connection ids handed out and connection ids given back, both sorted.
    pub fn lease_ids(&self) -> (Vec<u64>, Vec<u64>) {
        let leases = self.leases.lock();
        let mut acquired: Vec<_> = leases.acquired.iter().map(|(_, id)| *id).collect();
        let mut released: Vec<_> = leases.released.iter().map(|(_, id)| *id).collect();
        acquired.sort_unstable();
        released.sort_unstable();
        (acquired, released)
    }

    /// Returns `true` if every connection was released exactly once to the
    /// node it was acquired for.
    pub fn leases_balanced(&self) -> bool {
        let leases = self.leases.lock();
        let mut acquired = leases.acquired.clone();
        let mut released = leases.released.clone();
        acquired.sort_by_key(|(_, id)| *id);
        released.sort_by_key(|(_, id)| *id);
        acquired == released
    }

    /// Forgets all recorded acquisitions and releases.
    pub fn reset(&self) {
        *self.leases.lock() = Leases::default();
    }
}

impl NodeResourceProvider for MockNodeProvider {
    type Connection = MockConnection;

    fn acquire(&self, node: &ClusterNode) -> ClusterResult<MockConnection> {
        if let Some(known) = &self.known_ports {
            if !known.contains(&node.port()) {
                return Err(ClusterError::from((
                    redis_cluster_engine::ErrorKind::IllegalArgument,
                    "Node is unknown to cluster",
                    node.to_string(),
                )));
            }
        }
        if self.failing_ports.contains(&node.port()) {
            return Err(ClusterError::from((
                redis_cluster_engine::ErrorKind::ResourceFailure,
                "Could not get a resource from the pool",
                node.to_string(),
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.leases.lock().acquired.push((node.clone(), id));
        Ok(MockConnection {
            handler: self.handler.clone(),
            port: node.port(),
            id,
        })
    }

    fn release(&self, node: &ClusterNode, connection: MockConnection) {
        self.leases.lock().released.push((node.clone(), connection.id));
    }
}

/// Returns `true` if `ys` occurs in `xs`.
pub fn contains_slice(xs: &[u8], ys: &[u8]) -> bool {
    for i in 0..xs.len() {
        if xs[i..].starts_with(ys) {
            return true;
        }
    }
    false
}

/// Splits a packed command into its arguments.
pub fn command_args(cmd: &[u8]) -> Vec<String> {
    fn line(buf: &[u8]) -> (&[u8], &[u8]) {
        let end = buf
            .windows(2)
            .position(|w| w == b"\r\n")
            .expect("packed command lines end with CRLF");
        (&buf[..end], &buf[end + 2..])
    }

    let (_, mut rest) = line(cmd);
    let mut args = Vec::new();
    while rest.first() == Some(&b'$') {
        let (header, body) = line(rest);
        let len: usize = std::str::from_utf8(&header[1..])
            .unwrap()
            .parse()
            .unwrap();
        args.push(String::from_utf8_lossy(&body[..len]).into_owned());
        rest = &body[len + 2..];
    }
    args
}

/// One master of a mock cluster, with its replicas.
#[derive(Clone)]
pub struct MockSlotRange {
    pub primary_port: u16,
    pub replica_ports: Vec<u16>,
    pub slot_range: RangeInclusive<u16>,
}

impl MockSlotRange {
    /// Masters on 7000, 7001 and 7002 splitting the slots evenly, no replicas.
    pub fn three_masters() -> Vec<MockSlotRange> {
        vec![
            MockSlotRange {
                primary_port: 7000,
                replica_ports: vec![],
                slot_range: 0..=5460,
            },
            MockSlotRange {
                primary_port: 7001,
                replica_ports: vec![],
                slot_range: 5461..=10922,
            },
            MockSlotRange {
                primary_port: 7002,
                replica_ports: vec![],
                slot_range: 10923..=16383,
            },
        ]
    }

    /// Like [`three_masters`](MockSlotRange::three_masters) with one replica
    /// per master on 7003, 7004 and 7005.
    pub fn three_masters_with_replicas() -> Vec<MockSlotRange> {
        let mut layout = Self::three_masters();
        for (range, replica_port) in layout.iter_mut().zip(7003..) {
            range.replica_ports.push(replica_port);
        }
        layout
    }
}

/// The id a mock node reports for itself.
pub fn node_id(port: u16) -> String {
    format!("{port:0>40}")
}

fn master_line(range: &MockSlotRange) -> String {
    format!(
        "{} {MOCK_HOST}:{port}@{bus} master - 0 0 1 connected {}-{}",
        node_id(range.primary_port),
        range.slot_range.start(),
        range.slot_range.end(),
        port = range.primary_port,
        bus = u32::from(range.primary_port) + 10000,
    )
}

fn replica_line(master_port: u16, port: u16) -> String {
    format!(
        "{} {MOCK_HOST}:{port}@{bus} slave {} 0 0 1 connected",
        node_id(port),
        node_id(master_port),
        bus = u32::from(port) + 10000,
    )
}

/// The `CLUSTER NODES` text describing `layout`.
pub fn cluster_nodes_reply(layout: &[MockSlotRange]) -> String {
    let mut lines = Vec::new();
    for range in layout {
        lines.push(master_line(range));
        for replica_port in &range.replica_ports {
            lines.push(replica_line(range.primary_port, *replica_port));
        }
    }
    lines.join("\n") + "\n"
}

/// The `CLUSTER REPLICAS` reply of the master on `master_port`.
pub fn cluster_replicas_reply(layout: &[MockSlotRange], master_port: u16) -> Value {
    let lines = layout
        .iter()
        .filter(|range| range.primary_port == master_port)
        .flat_map(|range| range.replica_ports.iter())
        .map(|port| Value::BulkString(replica_line(master_port, *port).into_bytes()))
        .collect();
    Value::Array(lines)
}

/// Answers `CLUSTER NODES` with `layout`, leaves every other command alone.
pub fn respond_cluster_nodes(cmd: &[u8], layout: &[MockSlotRange]) -> Result<(), RedisResult<Value>> {
    if contains_slice(cmd, b"CLUSTER") && contains_slice(cmd, b"NODES") {
        Err(Ok(Value::BulkString(cluster_nodes_reply(layout).into_bytes())))
    } else {
        Ok(())
    }
}

/// The topology `layout` describes, built without asking any node.
pub fn mock_topology(layout: &[MockSlotRange]) -> ClusterTopology {
    let mut nodes = Vec::new();
    for range in layout {
        let slots = SlotRange::new(*range.slot_range.start(), *range.slot_range.end())
            .expect("valid mock slot range");
        nodes.push(
            ClusterNode::new(MOCK_HOST, range.primary_port)
                .with_id(node_id(range.primary_port))
                .with_role(NodeRole::Master)
                .with_slots(slots),
        );
        for replica_port in &range.replica_ports {
            nodes.push(
                ClusterNode::new(MOCK_HOST, *replica_port)
                    .with_id(node_id(*replica_port))
                    .replica_of(node_id(range.primary_port)),
            );
        }
    }
    ClusterTopology::new(nodes)
}

/// A node reference carrying only an address, as a caller would build it.
pub fn mock_node(port: u16) -> ClusterNode {
    ClusterNode::new(MOCK_HOST, port)
}

/// An I/O error as raised when a node cannot be reached.
pub fn connection_refused() -> RedisError {
    RedisError::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
}

/// A `MOVED` error pointing at `port`.
pub fn moved(slot: u16, port: u16) -> RedisError {
    RedisError::from((
        ErrorKind::Moved,
        "An error was signalled by the server",
        format!("{slot} {MOCK_HOST}:{port}"),
    ))
}

/// An `ASK` error pointing at `port`.
pub fn ask(slot: u16, port: u16) -> RedisError {
    RedisError::from((
        ErrorKind::Ask,
        "An error was signalled by the server",
        format!("{slot} {MOCK_HOST}:{port}"),
    ))
}
