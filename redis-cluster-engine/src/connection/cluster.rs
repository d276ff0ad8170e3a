use std::collections::HashMap;

use log::debug;
use redis::FromRedisValue;

use super::ClusterConnection;
use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::info::ClusterInfo;
use crate::node::{ClusterNode, SlotRange};
use crate::resources::{unknown_node, NodeResourceProvider};
use crate::routing::get_slot;
use crate::slot_map::SLOT_SIZE;
use crate::topology::{parse_cluster_nodes, ClusterTopology};

/// The slot state set with `CLUSTER SETSLOT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// The slot is being imported from the given node.
    Importing(ClusterNode),
    /// The slot is being migrated to the given node.
    Migrating(ClusterNode),
    /// Clears any importing or migrating state.
    Stable,
    /// Assigns the slot to the given node.
    Node(ClusterNode),
}

fn check_slot(slot: u16) -> ClusterResult<u16> {
    if slot < SLOT_SIZE {
        Ok(slot)
    } else {
        Err(ClusterError::from((
            ErrorKind::IllegalArgument,
            "Invalid slot",
            format!("{slot} is not within 0-{}", SLOT_SIZE - 1),
        )))
    }
}

fn known<'a>(topology: &'a ClusterTopology, node: &ClusterNode) -> ClusterResult<&'a ClusterNode> {
    topology.lookup(node).map_err(|_| unknown_node(node))
}

fn node_id(topology: &ClusterTopology, node: &ClusterNode) -> ClusterResult<String> {
    let resolved = known(topology, node)?;
    resolved.id().map(str::to_string).ok_or_else(|| {
        ClusterError::from((
            ErrorKind::ClusterStateFailure,
            "Node id is unknown",
            resolved.to_string(),
        ))
    })
}

fn node_lines(lines: Vec<String>) -> String {
    lines.join("\n")
}

impl<P: NodeResourceProvider> ClusterConnection<P> {
    /// Every node of the current topology.
    pub fn cluster_get_nodes(&self) -> ClusterResult<Vec<ClusterNode>> {
        Ok(self.topology()?.nodes().to_vec())
    }

    /// The replicas of `master` as reported by `master` itself.
    pub fn cluster_get_replicas(&self, master: &ClusterNode) -> ClusterResult<Vec<ClusterNode>> {
        let topology = self.topology()?;
        let master = known(&topology, master)?;
        let id = node_id(&topology, master)?;
        let lines = self.execute_on_node(master, |connection| {
            redis::cmd("CLUSTER")
                .arg("REPLICAS")
                .arg(&id)
                .query::<Vec<String>>(connection)
        })?;
        parse_cluster_nodes(&node_lines(lines), master.host())
    }

    /// Every active master with the replicas it reports.
    pub fn cluster_get_master_replica_map(
        &self,
    ) -> ClusterResult<HashMap<ClusterNode, Vec<ClusterNode>>> {
        let result = self.executor().execute_command_on_all_nodes(|connection| {
            let id: String = redis::cmd("CLUSTER").arg("MYID").query(&mut *connection)?;
            redis::cmd("CLUSTER")
                .arg("REPLICAS")
                .arg(id)
                .query::<Vec<String>>(connection)
        })?;
        let mut map = HashMap::with_capacity(result.len());
        for node_result in result.into_results() {
            let master = node_result.node().clone();
            let replicas = parse_cluster_nodes(&node_lines(node_result.into_value()?), master.host())?;
            map.insert(master, replicas);
        }
        Ok(map)
    }

    /// The slot `key` hashes to.
    pub fn cluster_get_slot_for_key(&self, key: &[u8]) -> u16 {
        get_slot(key)
    }

    /// The master serving `slot`.
    pub fn cluster_get_node_for_slot(&self, slot: u16) -> ClusterResult<ClusterNode> {
        let slot = check_slot(slot)?;
        let topology = self.topology()?;
        topology
            .slot_serving_nodes(slot)
            .into_iter()
            .find(|node| node.is_master())
            .cloned()
            .ok_or_else(|| {
                ClusterError::from((
                    ErrorKind::ClusterStateFailure,
                    "Could not find master node serving slot",
                    slot.to_string(),
                ))
            })
    }

    /// The master serving the slot `key` hashes to.
    pub fn cluster_get_node_for_key(&self, key: &[u8]) -> ClusterResult<ClusterNode> {
        self.cluster_get_node_for_slot(get_slot(key))
    }

    /// `CLUSTER INFO` of any reachable node.
    pub fn cluster_get_cluster_info(&self) -> ClusterResult<ClusterInfo> {
        self.executor()
            .execute_command_on_arbitrary_node(|connection| {
                redis::cmd("CLUSTER").arg("INFO").query::<ClusterInfo>(connection)
            })?
            .into_value()
    }

    /// Assigns `slots` to `node`.
    pub fn cluster_add_slots(&self, node: &ClusterNode, slots: &[u16]) -> ClusterResult<()> {
        self.slot_command(node, "ADDSLOTS", slots)
    }

    /// Assigns every slot of `range` to `node`.
    pub fn cluster_add_slots_in_range(&self, node: &ClusterNode, range: &SlotRange) -> ClusterResult<()> {
        self.slot_command(node, "ADDSLOTS", &range.slots().collect::<Vec<_>>())
    }

    /// Removes `slots` from `node`.
    pub fn cluster_delete_slots(&self, node: &ClusterNode, slots: &[u16]) -> ClusterResult<()> {
        self.slot_command(node, "DELSLOTS", slots)
    }

    /// Removes every slot of `range` from `node`.
    pub fn cluster_delete_slots_in_range(&self, node: &ClusterNode, range: &SlotRange) -> ClusterResult<()> {
        self.slot_command(node, "DELSLOTS", &range.slots().collect::<Vec<_>>())
    }

    fn slot_command(&self, node: &ClusterNode, subcommand: &str, slots: &[u16]) -> ClusterResult<()> {
        for slot in slots {
            check_slot(*slot)?;
        }
        if slots.is_empty() {
            return Err(ClusterError::from((ErrorKind::InvalidUsage, "Slots must not be empty")));
        }
        self.execute_on_node(node, |connection| {
            redis::cmd("CLUSTER").arg(subcommand).arg(slots).query(connection)
        })
    }

    /// Number of keys in `slot`, asked from the master serving it.
    pub fn cluster_count_keys_in_slot(&self, slot: u16) -> ClusterResult<u64> {
        let node = self.cluster_get_node_for_slot(slot)?;
        self.execute_on_node(&node, |connection| {
            redis::cmd("CLUSTER")
                .arg("COUNTKEYSINSLOT")
                .arg(slot)
                .query(connection)
        })
    }

    /// Up to `count` keys of `slot`, asked from the master serving it.
    pub fn cluster_get_keys_in_slot<RV: FromRedisValue>(&self, slot: u16, count: usize) -> ClusterResult<Vec<RV>> {
        let node = self.cluster_get_node_for_slot(slot)?;
        self.execute_on_node(&node, |connection| {
            redis::cmd("CLUSTER")
                .arg("GETKEYSINSLOT")
                .arg(slot)
                .arg(count)
                .query(connection)
        })
    }

    /// Introduces `node` to every active master.
    pub fn cluster_meet(&self, node: &ClusterNode) -> ClusterResult<()> {
        let host = node.host().to_string();
        let port = node.port();
        debug!("Introducing {node} to the cluster");
        self.executor()
            .execute_command_on_all_nodes(move |connection| {
                redis::cmd("CLUSTER")
                    .arg("MEET")
                    .arg(&host)
                    .arg(port)
                    .query::<()>(connection)
            })?
            .results_as_list()?;
        Ok(())
    }

    /// Makes every other active master forget `node`.
    pub fn cluster_forget(&self, node: &ClusterNode) -> ClusterResult<()> {
        let topology = self.topology()?;
        let forgotten = known(&topology, node)?;
        let id = node_id(&topology, forgotten)?;
        let targets: Vec<&ClusterNode> = topology
            .active_master_nodes()
            .into_iter()
            .filter(|candidate| !candidate.is_same_node(forgotten))
            .collect();
        debug!("Forgetting {forgotten} on {} nodes", targets.len());
        self.executor()
            .execute_command_async_on_nodes(
                move |connection| {
                    redis::cmd("CLUSTER")
                        .arg("FORGET")
                        .arg(&id)
                        .query::<()>(connection)
                },
                targets,
            )?
            .results_as_list()?;
        Ok(())
    }

    /// Makes `replica` replicate `master`.
    pub fn cluster_replicate(&self, master: &ClusterNode, replica: &ClusterNode) -> ClusterResult<()> {
        let topology = self.topology()?;
        let master_id = node_id(&topology, master)?;
        self.execute_on_node(replica, |connection| {
            redis::cmd("CLUSTER")
                .arg("REPLICATE")
                .arg(&master_id)
                .query(connection)
        })
    }

    /// Sets the state of `slot` on `node`.
    pub fn cluster_set_slot(&self, node: &ClusterNode, slot: u16, state: &SlotState) -> ClusterResult<()> {
        let slot = check_slot(slot)?;
        let topology = self.topology()?;
        let (subcommand, other) = match state {
            SlotState::Importing(source) => ("IMPORTING", Some(node_id(&topology, source)?)),
            SlotState::Migrating(target) => ("MIGRATING", Some(node_id(&topology, target)?)),
            SlotState::Stable => ("STABLE", None),
            SlotState::Node(owner) => ("NODE", Some(node_id(&topology, owner)?)),
        };
        self.execute_on_node(node, |connection| {
            let mut cmd = redis::cmd("CLUSTER");
            cmd.arg("SETSLOT").arg(slot).arg(subcommand);
            if let Some(id) = &other {
                cmd.arg(id);
            }
            cmd.query(connection)
        })
    }
}
