//! A small integer-indexed graph, adapted from dagrs's hand-rolled `Graph`
//! type. Nodes are addressed by their task number (`u64`); edges are
//! producer → consumer (spec §3: "Edge a → b exists iff some dependency of
//! b is a target of a, or b explicitly names a as an upstream task").

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct Graph {
    id_to_index: HashMap<u64, usize>,
    index_to_id: Vec<u64>,
    out_edges: Vec<Vec<usize>>,
    in_edges: Vec<Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: u64) -> usize {
        if let Some(&idx) = self.id_to_index.get(&id) {
            return idx;
        }
        let idx = self.index_to_id.len();
        self.index_to_id.push(id);
        self.id_to_index.insert(id, idx);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        idx
    }

    /// Removes the most recently added node. Used to roll back a task
    /// registration that failed mid-resolution (spec §7: "the task is rolled
    /// back (popped and unlinked) before raising"). Only valid when `id` is
    /// the last node added; anadama only ever rolls back the task currently
    /// being registered, so that invariant always holds at the call site.
    pub fn remove_last_node(&mut self, id: u64) {
        if self.index_to_id.last() != Some(&id) {
            return;
        }
        self.index_to_id.pop();
        self.id_to_index.remove(&id);
        let idx = self.index_to_id.len();
        self.out_edges.pop();
        self.in_edges.pop();
        for edges in self.out_edges.iter_mut() {
            edges.retain(|&t| t != idx);
        }
    }

    pub fn find_index_by_id(&self, id: &u64) -> Option<usize> {
        self.id_to_index.get(id).copied()
    }

    pub fn find_id_by_index(&self, idx: usize) -> Option<u64> {
        self.index_to_id.get(idx).copied()
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        if !self.out_edges[from].contains(&to) {
            self.out_edges[from].push(to);
            self.in_edges[to].push(from);
        }
    }

    pub fn get_node_out_degree(&self, id: &u64) -> usize {
        self.find_index_by_id(id).map(|i| self.out_edges[i].len()).unwrap_or(0)
    }

    /// Ids of the direct predecessors (producers) of `id`.
    pub fn predecessors(&self, id: u64) -> Vec<u64> {
        self.find_index_by_id(&id)
            .map(|i| self.in_edges[i].iter().map(|&p| self.index_to_id[p]).collect())
            .unwrap_or_default()
    }

    /// Ids of the direct successors (consumers) of `id`.
    pub fn successors(&self, id: u64) -> Vec<u64> {
        self.find_index_by_id(&id)
            .map(|i| self.out_edges[i].iter().map(|&s| self.index_to_id[s]).collect())
            .unwrap_or_default()
    }

    /// Ids of every ancestor of `id`, including `id` itself (reverse BFS,
    /// spec §4.1 step 2: "restrict to the ancestors of the named task
    /// (inclusive) by reverse BFS").
    pub fn ancestors_inclusive(&self, id: u64) -> std::collections::HashSet<u64> {
        let mut seen = std::collections::HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(id);
        queue.push_back(id);
        while let Some(cur) = queue.pop_front() {
            for parent in self.predecessors(cur) {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        seen
    }

    /// Kahn's algorithm. Returns node ids with every producer preceding its
    /// consumers ("leaves first": tasks with no unmet dependency come
    /// first). `None` if the graph has a cycle.
    pub fn topo_sort(&self) -> Option<Vec<u64>> {
        let n = self.index_to_id.len();
        let mut indeg: Vec<usize> = self.in_edges.iter().map(|v| v.len()).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indeg[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(self.index_to_id[i]);
            for &succ in &self.out_edges[i] {
                indeg[succ] -= 1;
                if indeg[succ] == 0 {
                    queue.push_back(succ);
                }
            }
        }
        if order.len() == n {
            Some(order)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topo_sort_orders_producers_before_consumers() {
        let mut g = Graph::new();
        g.add_node(1);
        g.add_node(2);
        g.add_node(3);
        let i1 = g.find_index_by_id(&1).unwrap();
        let i2 = g.find_index_by_id(&2).unwrap();
        let i3 = g.find_index_by_id(&3).unwrap();
        g.add_edge(i1, i2);
        g.add_edge(i2, i3);

        let order = g.topo_sort().unwrap();
        let pos = |id: u64| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(1) < pos(2));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn topo_sort_detects_cycle() {
        let mut g = Graph::new();
        g.add_node(1);
        g.add_node(2);
        let i1 = g.find_index_by_id(&1).unwrap();
        let i2 = g.find_index_by_id(&2).unwrap();
        g.add_edge(i1, i2);
        g.add_edge(i2, i1);
        assert!(g.topo_sort().is_none());
    }

    #[test]
    fn remove_last_node_prunes_dangling_edges() {
        let mut g = Graph::new();
        g.add_node(1);
        g.add_node(2);
        let i1 = g.find_index_by_id(&1).unwrap();
        let i2 = g.find_index_by_id(&2).unwrap();
        g.add_edge(i1, i2);
        g.remove_last_node(2);
        assert_eq!(g.find_index_by_id(&2), None);
        assert_eq!(g.get_node_out_degree(&1), 0);
    }
}
