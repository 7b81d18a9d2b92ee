//! Successor assignment for a ring laid out from a list of addresses.

use crate::identity::NodeId;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology requires at least one node")]
    Empty,
    #[error("node {0} appears more than once")]
    Duplicate(NodeId),
}

/// Nodes in ring order: each node's successor is the next entry, and the
/// last wraps around to the first.
#[derive(Debug, Clone)]
pub struct RingTopology {
    nodes: Vec<NodeId>,
}

impl RingTopology {
    pub fn new(nodes: Vec<NodeId>) -> Result<Self, TopologyError> {
        if nodes.is_empty() {
            return Err(TopologyError::Empty);
        }
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node) {
                return Err(TopologyError::Duplicate(node.clone()));
            }
        }
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Successor of `node`, or `None` if it is not part of the ring.
    pub fn successor_of(&self, node: &NodeId) -> Option<&NodeId> {
        let index = self.nodes.iter().position(|n| n == node)?;
        Some(&self.nodes[(index + 1) % self.nodes.len()])
    }

    /// `(node, successor)` pairs in ring order.
    pub fn assignments(&self) -> impl Iterator<Item = (&NodeId, &NodeId)> {
        self.nodes
            .iter()
            .zip(self.nodes.iter().cycle().skip(1))
    }

    /// The node with the greatest identity, i.e. the one an election picks.
    pub fn expected_leader(&self) -> &NodeId {
        // `new` rejects empty rings, so max() always has an element.
        self.nodes.iter().max().unwrap_or(&self.nodes[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(port: u16) -> NodeId {
        NodeId::new("127.0.0.1", port)
    }

    #[test]
    fn test_successors_wrap_around() {
        let ring = RingTopology::new(vec![node(1), node(2), node(3)]).unwrap();
        assert_eq!(ring.successor_of(&node(1)), Some(&node(2)));
        assert_eq!(ring.successor_of(&node(3)), Some(&node(1)));
        assert_eq!(ring.successor_of(&node(9)), None);
    }

    #[test]
    fn test_single_node_points_at_itself() {
        let ring = RingTopology::new(vec![node(1)]).unwrap();
        assert_eq!(ring.successor_of(&node(1)), Some(&node(1)));
    }

    #[test]
    fn test_assignments_in_order() {
        let ring = RingTopology::new(vec![node(5), node(1), node(3)]).unwrap();
        let pairs: Vec<_> = ring
            .assignments()
            .map(|(a, b)| (a.port(), b.port()))
            .collect();
        assert_eq!(pairs, vec![(5, 1), (1, 3), (3, 5)]);
        assert_eq!(ring.expected_leader(), &node(5));
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert_eq!(RingTopology::new(vec![]).unwrap_err(), TopologyError::Empty);
        assert_eq!(
            RingTopology::new(vec![node(1), node(2), node(1)]).unwrap_err(),
            TopologyError::Duplicate(node(1))
        );
    }
}
