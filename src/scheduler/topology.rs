use crate::types::NodeId;

/// One NUMA node of the scheduling topology.
#[derive(Debug, Clone)]
pub struct TopologyNode {
    worker_count: usize,
}

impl TopologyNode {
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

/// Description of the machine the scheduler runs on: how many NUMA nodes
/// exist and how many workers each gets. Used as a scheduling-affinity hint,
/// not as a hard binding.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<TopologyNode>,
}

impl Topology {
    /// One node with a worker per logical CPU.
    pub fn default_topology() -> Self {
        Self::single_node(num_cpus::get().max(1))
    }

    /// One node with a fixed worker count.
    pub fn single_node(worker_count: usize) -> Self {
        assert!(worker_count > 0, "topology needs at least one worker");
        Self {
            nodes: vec![TopologyNode { worker_count }],
        }
    }

    /// A synthetic multi-node topology. Locality behaves as if the nodes
    /// were real, which makes cross-node stealing testable on any machine.
    pub fn fake_numa_topology(num_nodes: usize, workers_per_node: usize) -> Self {
        assert!(num_nodes > 0, "topology needs at least one node");
        assert!(workers_per_node > 0, "topology needs at least one worker per node");
        Self {
            nodes: vec![
                TopologyNode {
                    worker_count: workers_per_node,
                };
                num_nodes
            ],
        }
    }

    pub fn nodes(&self) -> &[TopologyNode] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn worker_count(&self, node_id: NodeId) -> usize {
        self.nodes[node_id as usize].worker_count
    }

    pub fn total_worker_count(&self) -> usize {
        self.nodes.iter().map(|node| node.worker_count).sum()
    }
}
