use std::collections::{HashMap, VecDeque};

use duckdb::{params, Connection};

use crate::encoder::encoder::{EdgeRow, ModelEncoding, NodeRow};
use crate::error::{RelunetError, Result};
use crate::network::state_dict::StateDict;

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: i64,
    pub bias: f64,
    pub name: String,
}

/// Arena form of one encoded model: nodes indexed by position, adjacency
/// lists built once from the edge rows.
///
/// Layering and evaluation are derived from the edges alone, the same way
/// the SQL queries derive them: input nodes are the ones without incoming
/// edges, output nodes the ones without outgoing edges.
#[derive(Debug, Clone)]
pub struct NetworkGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<i64, usize>,
    outgoing: Vec<Vec<(usize, f64)>>,
    in_degree: Vec<usize>,
}

impl NetworkGraph {
    pub fn new<N, E>(nodes: N, edges: E) -> Result<NetworkGraph>
    where
        N: IntoIterator<Item = NodeRow>,
        E: IntoIterator<Item = EdgeRow>,
    {
        let mut nodes: Vec<GraphNode> = nodes
            .into_iter()
            .map(|n| GraphNode { id: n.id, bias: n.bias, name: n.name })
            .collect();
        nodes.sort_by_key(|n| n.id);

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id, i).is_some() {
                return Err(RelunetError::precondition(format!("duplicate node id {}", node.id)));
            }
        }

        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut in_degree = vec![0; nodes.len()];
        for edge in edges {
            let (src, dst) = match (index.get(&edge.src), index.get(&edge.dst)) {
                (Some(&s), Some(&d)) => (s, d),
                _ => {
                    return Err(RelunetError::precondition(format!(
                        "edge {} -> {} references an unknown node", edge.src, edge.dst
                    )))
                }
            };
            outgoing[src].push((dst, edge.weight));
            in_degree[dst] += 1;
        }

        Ok(NetworkGraph { nodes, index, outgoing, in_degree })
    }

    /// Builds the graph straight from a parameter state, without a database.
    pub fn from_state_dict(state_dict: &StateDict) -> Result<NetworkGraph> {
        let encoding = ModelEncoding::new(state_dict, 1, 1)?;
        NetworkGraph::new(encoding.nodes(), encoding.edges())
    }

    /// Reads one model's rows back from the `node` and `edge` tables.
    pub fn from_tables(conn: &Connection, model_id: i64) -> Result<NetworkGraph> {
        let mut stmt = conn.prepare("SELECT id, bias, name FROM node WHERE model_id = ? ORDER BY id")?;
        let nodes = stmt
            .query_map(params![model_id], |row| {
                Ok(NodeRow { id: row.get(0)?, bias: row.get(1)?, name: row.get(2)?, model_id })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT src, dst, weight FROM edge WHERE model_id = ?")?;
        let edges = stmt
            .query_map(params![model_id], |row| {
                Ok(EdgeRow { src: row.get(0)?, dst: row.get(1)?, weight: row.get(2)?, model_id })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        NetworkGraph::new(nodes, edges)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.iter().map(Vec::len).sum()
    }

    pub fn node(&self, id: i64) -> Option<&GraphNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    /// Outgoing `(dst id, weight)` pairs of a node.
    pub fn successors(&self, id: i64) -> Vec<(i64, f64)> {
        self.index
            .get(&id)
            .map(|&i| self.outgoing[i].iter().map(|&(d, w)| (self.nodes[d].id, w)).collect())
            .unwrap_or_default()
    }

    /// Ids of nodes without incoming edges, ascending.
    pub fn input_nodes(&self) -> Vec<i64> {
        self.positions(|i| self.in_degree[i] == 0)
    }

    /// Ids of nodes without outgoing edges, ascending.
    pub fn output_nodes(&self) -> Vec<i64> {
        self.positions(|i| self.outgoing[i].is_empty())
    }

    /// Ids of nodes that are neither input nor output nodes, ascending.
    pub fn hidden_nodes(&self) -> Vec<i64> {
        self.positions(|i| self.in_degree[i] > 0 && !self.outgoing[i].is_empty())
    }

    fn positions(&self, keep: impl Fn(usize) -> bool) -> Vec<i64> {
        (0..self.nodes.len()).filter(|&i| keep(i)).map(|i| self.nodes[i].id).collect()
    }

    /// Breadth-first layering from the input nodes (layer 0). Each node lands
    /// in the layer of its shortest path from an input node; nodes are sorted
    /// by id within a layer.
    pub fn layers(&self) -> Vec<Vec<i64>> {
        let mut depth: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut queue = VecDeque::new();
        for i in 0..self.nodes.len() {
            if self.in_degree[i] == 0 {
                depth[i] = Some(0);
                queue.push_back(i);
            }
        }

        while let Some(i) = queue.pop_front() {
            let next = depth[i].map_or(0, |d| d + 1);
            for &(j, _) in &self.outgoing[i] {
                if depth[j].is_none() {
                    depth[j] = Some(next);
                    queue.push_back(j);
                }
            }
        }

        let mut layers: Vec<Vec<i64>> = Vec::new();
        for (i, d) in depth.into_iter().enumerate() {
            if let Some(d) = d {
                if layers.len() <= d {
                    layers.resize(d + 1, Vec::new());
                }
                layers[d].push(self.nodes[i].id);
            }
        }
        layers
    }

    /// Forward pass over the DAG with a dependency-count worklist.
    ///
    /// `input[k]` feeds the k-th input node in id order. A node becomes ready
    /// once all its predecessors are evaluated; internal nodes apply ReLU,
    /// output nodes keep the raw sum. Returns `(output node id, value)`
    /// pairs in id order.
    pub fn forward(&self, input: &[f64]) -> Result<Vec<(i64, f64)>> {
        let inputs = self.input_nodes();
        if inputs.len() != input.len() {
            return Err(RelunetError::precondition(format!(
                "graph has {} input nodes, got {} values", inputs.len(), input.len()
            )));
        }

        let mut pending = self.in_degree.clone();
        let mut sums = vec![0.0; self.nodes.len()];
        let mut values = vec![0.0; self.nodes.len()];
        let mut ready: VecDeque<usize> = inputs.iter().map(|id| self.index[id]).collect();
        for (&i, &x) in ready.iter().zip(input) {
            sums[i] = x;
        }

        let mut evaluated = 0;
        while let Some(i) = ready.pop_front() {
            evaluated += 1;
            values[i] = if self.in_degree[i] == 0 {
                sums[i]
            } else if self.outgoing[i].is_empty() {
                sums[i] + self.nodes[i].bias
            } else {
                (sums[i] + self.nodes[i].bias).max(0.0)
            };

            for &(j, w) in &self.outgoing[i] {
                sums[j] += w * values[i];
                pending[j] -= 1;
                if pending[j] == 0 {
                    ready.push_back(j);
                }
            }
        }

        if evaluated != self.nodes.len() {
            return Err(RelunetError::precondition("graph contains a cycle"));
        }

        Ok(self.output_nodes().into_iter().map(|id| (id, values[self.index[&id]])).collect())
    }
}
