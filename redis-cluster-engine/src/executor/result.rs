use crate::errors::{ClusterError, ClusterResult};
use crate::node::ClusterNode;

/// The outcome of a command on one node.
///
/// Multi key commands also record the key the command was run for and the
/// key's position in the caller's key list.
#[derive(Debug)]
pub struct NodeResult<T> {
    node: ClusterNode,
    key: Option<(usize, Vec<u8>)>,
    value: ClusterResult<T>,
}

impl<T> NodeResult<T> {
    pub(crate) fn new(node: ClusterNode, value: ClusterResult<T>) -> Self {
        Self {
            node,
            key: None,
            value,
        }
    }

    pub(crate) fn for_key(
        node: ClusterNode,
        position: usize,
        key: Vec<u8>,
        value: ClusterResult<T>,
    ) -> Self {
        Self {
            node,
            key: Some((position, key)),
            value,
        }
    }

    /// The node the command ran on.
    pub fn node(&self) -> &ClusterNode {
        &self.node
    }

    /// The key the command ran for, if it was a per key command.
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_ref().map(|(_, key)| key.as_slice())
    }

    /// The value or the failure of the command.
    pub fn value(&self) -> Result<&T, &ClusterError> {
        self.value.as_ref()
    }

    /// Returns `true` if the command succeeded on the node.
    pub fn is_ok(&self) -> bool {
        self.value.is_ok()
    }

    /// The failure of the command, if it failed.
    pub fn error(&self) -> Option<&ClusterError> {
        self.value.as_ref().err()
    }

    /// Consumes the result and returns the node's value or failure.
    pub fn into_value(self) -> ClusterResult<T> {
        self.value
    }

    fn position(&self) -> Option<usize> {
        self.key.as_ref().map(|(position, _)| *position)
    }
}

/// The outcome of a command that ran on several nodes.
///
/// Holds one [`NodeResult`] per targeted node (or per key), failures
/// included. How failures are treated is up to the caller.
#[derive(Debug)]
pub struct MultiNodeResult<T> {
    results: Vec<NodeResult<T>>,
}

impl<T> MultiNodeResult<T> {
    pub(crate) fn new(results: Vec<NodeResult<T>>) -> Self {
        Self { results }
    }

    /// Every per node result, in the order the nodes were targeted.
    pub fn results(&self) -> &[NodeResult<T>] {
        &self.results
    }

    /// Consumes `self` and returns the per node results.
    pub fn into_results(self) -> Vec<NodeResult<T>> {
        self.results
    }

    /// Number of per node results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if no node was targeted.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns `true` if the command failed on at least one node.
    pub fn has_errors(&self) -> bool {
        self.results.iter().any(|result| !result.is_ok())
    }

    /// The result of `node`, if it was targeted.
    pub fn result_for(&self, node: &ClusterNode) -> Option<&NodeResult<T>> {
        self.results.iter().find(|result| result.node == *node)
    }

    /// Every failure together with the node it happened on.
    pub fn errors(&self) -> Vec<(&ClusterNode, &ClusterError)> {
        self.results
            .iter()
            .filter_map(|result| result.error().map(|err| (&result.node, err)))
            .collect()
    }

    /// All values, or the first failure if any node failed.
    pub fn results_as_list(self) -> ClusterResult<Vec<T>> {
        self.results.into_iter().map(NodeResult::into_value).collect()
    }

    /// The values of the nodes that succeeded. Failures are dropped.
    pub fn successful_results(self) -> Vec<T> {
        self.results
            .into_iter()
            .filter_map(|result| result.value.ok())
            .collect()
    }

    /// All values ordered like the keys passed to a multi key command, or the
    /// first failure if any key failed.
    ///
    /// Results that were not produced for a key come last.
    pub fn results_in_key_order(mut self) -> ClusterResult<Vec<T>> {
        self.results
            .sort_by_key(|result| result.position().unwrap_or(usize::MAX));
        self.results_as_list()
    }
}

impl<T> MultiNodeResult<Option<T>> {
    /// The first value that is present, skipping failures.
    pub fn first_some(self) -> Option<T> {
        self.results
            .into_iter()
            .find_map(|result| result.value.ok().flatten())
    }
}
