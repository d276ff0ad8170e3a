//! Value types describing the members of a cluster.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use arcstr::ArcStr;

use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::slot_map::SLOT_SIZE;

pub(crate) fn split_node_address(node: &str) -> ClusterResult<(&str, u16)> {
    let invalid_error = || ClusterError::from((ErrorKind::IllegalArgument, "Invalid node string"));
    node.rsplit_once(':')
        .and_then(|(host, port)| {
            Some(host.trim_start_matches('[').trim_end_matches(']'))
                .filter(|h| !h.is_empty())
                .zip(u16::from_str(port).ok())
        })
        .ok_or_else(invalid_error)
}

/// The role a node plays for the slots it is associated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Owns write authority over its slots.
    Master,
    /// Replicates a master.
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Master => f.write_str("master"),
            NodeRole::Replica => f.write_str("replica"),
        }
    }
}

/// Flags reported for a node by `CLUSTER NODES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeFlag {
    /// The node answering the query.
    Myself,
    /// The node is a master.
    Master,
    /// The node is a replica.
    Replica,
    /// The node is suspected to be failing (`fail?`).
    PossibleFail,
    /// The node has been marked as failing by the majority of masters.
    Fail,
    /// Handshake with the node is still in progress.
    Handshake,
    /// The address of the node is unknown.
    NoAddr,
    /// The replica will not try a failover.
    NoFailover,
    /// No flags are set.
    NoFlags,
}

impl NodeFlag {
    pub(crate) fn parse(raw: &str) -> Option<NodeFlag> {
        Some(match raw {
            "myself" => NodeFlag::Myself,
            "master" => NodeFlag::Master,
            "slave" | "replica" => NodeFlag::Replica,
            "fail?" => NodeFlag::PossibleFail,
            "fail" => NodeFlag::Fail,
            "handshake" => NodeFlag::Handshake,
            "noaddr" => NodeFlag::NoAddr,
            "nofailover" => NodeFlag::NoFailover,
            "noflags" => NodeFlag::NoFlags,
            _ => return None,
        })
    }
}

/// State of the cluster bus link to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// The link is up.
    Connected,
    /// The link is down.
    Disconnected,
}

/// An ordered set of hash slots.
///
/// Stored as merged, inclusive `(start, end)` intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotRange {
    ranges: Vec<(u16, u16)>,
}

impl SlotRange {
    /// Returns a range covering `start..=end`.
    pub fn new(start: u16, end: u16) -> ClusterResult<Self> {
        if start > end {
            return Err(ClusterError::from((
                ErrorKind::IllegalArgument,
                "Slot start cannot be greater than slot end",
            )));
        }
        if end >= SLOT_SIZE {
            return Err(ClusterError::from((
                ErrorKind::IllegalArgument,
                "Slot out of range",
                format!("{end} is not in 0..{SLOT_SIZE}"),
            )));
        }
        Ok(Self {
            ranges: vec![(start, end)],
        })
    }

    /// Returns an empty range.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Collects single slots into a range. Slots outside `0..16384` are rejected.
    pub fn from_slots<I: IntoIterator<Item = u16>>(slots: I) -> ClusterResult<Self> {
        let mut range = Self::default();
        for slot in slots {
            range.insert(slot, slot)?;
        }
        Ok(range)
    }

    pub(crate) fn insert(&mut self, start: u16, end: u16) -> ClusterResult<()> {
        let added = Self::new(start, end)?.ranges[0];
        self.ranges.push(added);
        self.ranges.sort_unstable();

        let mut merged: Vec<(u16, u16)> = Vec::with_capacity(self.ranges.len());
        for (start, end) in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        self.ranges = merged;
        Ok(())
    }

    /// Returns true if `slot` is part of the range.
    pub fn contains(&self, slot: u16) -> bool {
        self.ranges
            .iter()
            .any(|(start, end)| *start <= slot && slot <= *end)
    }

    /// The merged intervals of the range.
    pub fn intervals(&self) -> &[(u16, u16)] {
        &self.ranges
    }

    /// Iterates over every slot in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = u16> + '_ {
        self.ranges.iter().flat_map(|(start, end)| *start..=*end)
    }

    /// Number of slots in the range.
    pub fn len(&self) -> usize {
        self.ranges
            .iter()
            .map(|(start, end)| (end - start) as usize + 1)
            .sum()
    }

    /// Returns true if the range holds no slot.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (start, end)) in self.ranges.iter().enumerate() {
            if index != 0 {
                f.write_str(" ")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

/// One Redis server process taking part in the cluster.
///
/// Nodes are immutable once built. Two nodes are equal if they share the same
/// host and port; [`ClusterNode::is_same_node`] additionally takes the node id
/// into account.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    host: ArcStr,
    port: u16,
    id: Option<ArcStr>,
    role: Option<NodeRole>,
    master_id: Option<ArcStr>,
    flags: Vec<NodeFlag>,
    link_state: Option<LinkState>,
    slots: SlotRange,
}

impl ClusterNode {
    /// Creates a node descriptor that only knows its address.
    pub fn new(host: impl Into<ArcStr>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            id: None,
            role: None,
            master_id: None,
            flags: Vec::new(),
            link_state: None,
            slots: SlotRange::empty(),
        }
    }

    /// Parses a `host:port` string. IPv6 hosts may be wrapped in brackets.
    pub fn from_addr(addr: &str) -> ClusterResult<Self> {
        let (host, port) = split_node_address(addr)?;
        Ok(Self::new(host, port))
    }

    /// Sets the node id.
    pub fn with_id(mut self, id: impl Into<ArcStr>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the node role.
    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Marks the node as replica of the master with the given id.
    pub fn replica_of(mut self, master_id: impl Into<ArcStr>) -> Self {
        self.role = Some(NodeRole::Replica);
        self.master_id = Some(master_id.into());
        self
    }

    /// Sets the slots served by the node.
    pub fn with_slots(mut self, slots: SlotRange) -> Self {
        self.slots = slots;
        self
    }

    /// Sets the node flags.
    pub fn with_flags(mut self, flags: Vec<NodeFlag>) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the link state.
    pub fn with_link_state(mut self, link_state: LinkState) -> Self {
        self.link_state = Some(link_state);
        self
    }

    /// Host part of the address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Client port of the node.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` address of the node.
    pub fn address(&self) -> ArcStr {
        arcstr::format!("{}:{}", self.host, self.port)
    }

    /// The node id, if known.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The role, if known.
    pub fn role(&self) -> Option<NodeRole> {
        self.role
    }

    /// Id of the master this node replicates, for replicas.
    pub fn master_id(&self) -> Option<&str> {
        self.master_id.as_deref()
    }

    /// Flags as reported by `CLUSTER NODES`.
    pub fn flags(&self) -> &[NodeFlag] {
        &self.flags
    }

    /// State of the cluster bus link, if reported.
    pub fn link_state(&self) -> Option<LinkState> {
        self.link_state
    }

    /// Slots served by this node.
    pub fn slots(&self) -> &SlotRange {
        &self.slots
    }

    /// Returns true if the node id is known.
    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    /// Returns true if the node is a master.
    pub fn is_master(&self) -> bool {
        self.role == Some(NodeRole::Master)
    }

    /// Returns true if the node replicates a master.
    pub fn is_replica(&self) -> bool {
        self.role == Some(NodeRole::Replica)
    }

    /// Returns false only if the cluster reported the link as down.
    pub fn is_connected(&self) -> bool {
        self.link_state != Some(LinkState::Disconnected)
    }

    /// Returns true if the cluster flagged the node as failing or possibly failing.
    pub fn is_marked_as_fail(&self) -> bool {
        self.flags
            .iter()
            .any(|flag| matches!(flag, NodeFlag::Fail | NodeFlag::PossibleFail))
    }

    /// Returns true if the node serves `slot`.
    pub fn serves_slot(&self, slot: u16) -> bool {
        self.slots.contains(slot)
    }

    /// Compares by id when both nodes carry one, by address otherwise.
    pub fn is_same_node(&self, other: &ClusterNode) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl PartialEq for ClusterNode {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for ClusterNode {}

impl Hash for ClusterNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
