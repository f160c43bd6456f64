//! Run statistics
//!
//! Flit-level accounting across the whole network, with per-node breakdowns.
//! Applications gate recording behind their warmup window, so the counters
//! only see steady-state traffic.

use serde::Serialize;

use crate::topology::NodeId;

/// Per-node counters
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct NodeStats {
    /// Flits injected by the node's application
    pub injected_flits: u64,
    /// Flits delivered to the node's application
    pub received_flits: u64,
}

/// Network-wide counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct NetworkStats {
    /// Flits injected into the network
    pub injected_flits: u64,
    /// Whole packets injected (counted at their head)
    pub injected_packets: u64,
    /// Flits delivered to their destination application
    pub received_flits: u64,
    /// Flits dropped (routing failures, interface down)
    pub dropped_flits: u64,
    per_node: Vec<NodeStats>,
}

impl NetworkStats {
    /// Counters for a network of `node_count` nodes
    pub fn new(node_count: u32) -> Self {
        Self {
            per_node: vec![NodeStats::default(); node_count as usize],
            ..Self::default()
        }
    }

    /// Account an injected flit
    pub fn record_injected(&mut self, node: NodeId, is_head: bool) {
        self.injected_flits += 1;
        if is_head {
            self.injected_packets += 1;
        }
        self.per_node[node.0 as usize].injected_flits += 1;
    }

    /// Account a flit delivered to its destination
    pub fn record_received(&mut self, node: NodeId) {
        self.received_flits += 1;
        self.per_node[node.0 as usize].received_flits += 1;
    }

    /// Account a dropped flit
    pub fn record_dropped(&mut self) {
        self.dropped_flits += 1;
    }

    /// Per-node view
    pub fn node(&self, node: NodeId) -> NodeStats {
        self.per_node[node.0 as usize]
    }
}
