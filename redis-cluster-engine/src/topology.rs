//! Immutable snapshots of the cluster layout and the parser producing them.

use std::collections::HashSet;

use log::debug;

use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::node::{ClusterNode, LinkState, NodeFlag, NodeRole, SlotRange};
use crate::routing::get_slot;
use crate::slot_map::{SlotMap, SLOT_SIZE};

/// A fully resolved view of the cluster at one point in time.
///
/// Snapshots are never mutated. A topology refresh builds a new snapshot and
/// readers holding the previous one keep a consistent, if stale, view.
#[derive(Debug)]
pub struct ClusterTopology {
    nodes: Vec<ClusterNode>,
    slots: SlotMap,
}

impl ClusterTopology {
    /// Builds a snapshot from the nodes reported by the cluster.
    ///
    /// Duplicate addresses are collapsed, keeping the first occurrence.
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        let mut seen = HashSet::new();
        let nodes: Vec<ClusterNode> = nodes
            .into_iter()
            .filter(|node| seen.insert(node.address()))
            .collect();

        let slots = SlotMap::from_intervals(
            nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| node.is_master())
                .flat_map(|(index, node)| {
                    node.slots()
                        .intervals()
                        .iter()
                        .map(move |(start, end)| (*start, *end, index))
                }),
        );
        Self { nodes, slots }
    }

    /// All nodes, in the order the cluster reported them.
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// Nodes that are connected and not flagged as failing.
    pub fn active_nodes(&self) -> Vec<&ClusterNode> {
        self.nodes
            .iter()
            .filter(|node| node.is_connected() && !node.is_marked_as_fail())
            .collect()
    }

    /// All masters, whatever their link state.
    pub fn master_nodes(&self) -> Vec<&ClusterNode> {
        self.nodes.iter().filter(|node| node.is_master()).collect()
    }

    /// Masters that are connected and not flagged as failing.
    pub fn active_master_nodes(&self) -> Vec<&ClusterNode> {
        self.nodes
            .iter()
            .filter(|node| node.is_master() && node.is_connected() && !node.is_marked_as_fail())
            .collect()
    }

    /// Replicas of the given master.
    pub fn replicas_of(&self, master: &ClusterNode) -> ClusterResult<Vec<&ClusterNode>> {
        let master = self.lookup(master)?;
        let Some(master_id) = master.id() else {
            return Ok(Vec::new());
        };
        Ok(self
            .nodes
            .iter()
            .filter(|node| node.is_replica() && node.master_id() == Some(master_id))
            .collect())
    }

    /// Nodes that list `slot` among their slots.
    pub fn slot_serving_nodes(&self, slot: u16) -> Vec<&ClusterNode> {
        self.nodes
            .iter()
            .filter(|node| node.serves_slot(slot))
            .collect()
    }

    /// The master serving `slot`, if any.
    ///
    /// A topology in transition may leave slots unassigned.
    pub fn master_for_slot(&self, slot: u16) -> Option<&ClusterNode> {
        self.slots.node_for_slot(slot).map(|index| &self.nodes[index])
    }

    /// The master serving the slot `key` hashes to.
    pub fn key_serving_master(&self, key: &[u8]) -> ClusterResult<&ClusterNode> {
        let slot = get_slot(key);
        self.master_for_slot(slot).ok_or_else(|| {
            ClusterError::from((
                ErrorKind::ClusterStateFailure,
                "Could not find master node serving slot",
                format!(
                    "slot {slot} for key {}",
                    String::from_utf8_lossy(key)
                ),
            ))
        })
    }

    /// Resolves a possibly partial node descriptor to the node of this snapshot.
    ///
    /// The node id is used when present, the address otherwise.
    pub fn lookup(&self, node: &ClusterNode) -> ClusterResult<&ClusterNode> {
        if let Some(id) = node.id() {
            if let Ok(found) = self.lookup_id(id) {
                return Ok(found);
            }
        }
        self.lookup_address(node.host(), node.port())
    }

    /// The node listening on `host:port`.
    pub fn lookup_address(&self, host: &str, port: u16) -> ClusterResult<&ClusterNode> {
        self.nodes
            .iter()
            .find(|node| node.host() == host && node.port() == port)
            .ok_or_else(|| {
                ClusterError::from((
                    ErrorKind::ClusterStateFailure,
                    "Could not find node",
                    format!("no node at {host}:{port}"),
                ))
            })
    }

    /// The node with id `id`.
    pub fn lookup_id(&self, id: &str) -> ClusterResult<&ClusterNode> {
        self.nodes
            .iter()
            .find(|node| node.id() == Some(id))
            .ok_or_else(|| {
                ClusterError::from((
                    ErrorKind::ClusterStateFailure,
                    "Could not find node",
                    format!("no node with id {id}"),
                ))
            })
    }

    /// Number of slots served by a master.
    pub fn slot_coverage(&self) -> usize {
        self.slots.covered_slots()
    }

    /// Returns true if every slot is served by exactly one master.
    pub fn is_fully_covered(&self) -> bool {
        self.slot_coverage() == SLOT_SIZE as usize
    }
}

/// Parses the text returned by `CLUSTER NODES` (or `CLUSTER REPLICAS`).
///
/// Every line has the form
/// `<id> <ip:port@cport[,hostname]> <flags> <master> <ping-sent> <pong-recv> <config-epoch> <link-state> <slot> ...`.
/// An empty host is replaced with the host of the node that answered the query.
/// Importing and migrating slot markers are skipped.
pub(crate) fn parse_cluster_nodes(
    raw: &str,
    // The host of the node from which `raw` was received.
    host_of_answering_node: &str,
) -> ClusterResult<Vec<ClusterNode>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_node_line(line, host_of_answering_node).transpose())
        .collect()
}

fn parse_node_line(line: &str, host_of_answering_node: &str) -> ClusterResult<Option<ClusterNode>> {
    let invalid_line = || {
        ClusterError::from((
            ErrorKind::UnexpectedResponse,
            "Invalid CLUSTER NODES line",
            line.to_string(),
        ))
    };

    let parts: Vec<&str> = line.split_ascii_whitespace().collect();
    if parts.len() < 8 {
        return Err(invalid_line());
    }

    let address = parts[1]
        .split_once('@')
        .map_or(parts[1], |(address, _bus)| address);
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid_line)?;
    let port: u16 = port.parse().map_err(|_| invalid_line())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let flags: Vec<NodeFlag> = parts[2].split(',').filter_map(NodeFlag::parse).collect();

    let host = if host.is_empty() && flags.contains(&NodeFlag::Myself) {
        host_of_answering_node
    } else {
        host
    };
    if host.is_empty() || port == 0 {
        debug!("Skipping cluster node without address: {line}");
        return Ok(None);
    }

    let mut node = ClusterNode::new(host, port).with_id(parts[0]);
    if flags.contains(&NodeFlag::Master) {
        node = node.with_role(NodeRole::Master);
    }
    match parts[3] {
        "-" => {
            if flags.contains(&NodeFlag::Replica) {
                node = node.with_role(NodeRole::Replica);
            }
        }
        master_id => node = node.replica_of(master_id),
    }

    node = match parts[7] {
        "connected" => node.with_link_state(LinkState::Connected),
        "disconnected" => node.with_link_state(LinkState::Disconnected),
        _ => return Err(invalid_line()),
    };

    let mut slots = SlotRange::empty();
    for &raw_slot in &parts[8..] {
        if raw_slot.starts_with('[') {
            continue;
        }
        let (start, end) = raw_slot.split_once('-').unwrap_or((raw_slot, raw_slot));
        let start: u16 = start.parse().map_err(|_| invalid_line())?;
        let end: u16 = end.parse().map_err(|_| invalid_line())?;
        slots.insert(start, end)?;
    }

    Ok(Some(node.with_slots(slots).with_flags(flags)))
}
