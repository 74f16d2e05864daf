//! Graph payload codec for GRAPH_COMPUTE.
//!
//! Wire form: three little-endian `i32`s (`n_nodes | has_grads | n_leafs`)
//! followed by `n_nodes` then `n_leafs` tensor ids as `u64`s. The device
//! resolves each id against the tensors it already holds.

use crate::{ProtoError, TensorHandle};

/// Fixed header: `n_nodes`, `has_grads`, `n_leafs` as `i32`.
pub const GRAPH_HEADER_SIZE: usize = 12;

/// Host-side description of a compute graph to ship across the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDesc {
    /// Ids of the graph's operation nodes, in evaluation order.
    pub nodes: Vec<TensorHandle>,
    /// Ids of the graph's leaf tensors.
    pub leafs: Vec<TensorHandle>,
    /// Whether the runtime graph carries gradient tensors.
    pub has_grads: bool,
}

impl GraphDesc {
    /// Encoded payload size in bytes.
    pub fn wire_size(&self) -> usize {
        GRAPH_HEADER_SIZE + (self.nodes.len() + self.leafs.len()) * 8
    }
}

pub fn encode_graph(graph: &GraphDesc) -> Vec<u8> {
    let mut buf = Vec::with_capacity(graph.wire_size());
    buf.extend_from_slice(&(graph.nodes.len() as i32).to_le_bytes());
    buf.extend_from_slice(&(graph.has_grads as i32).to_le_bytes());
    buf.extend_from_slice(&(graph.leafs.len() as i32).to_le_bytes());
    for node in &graph.nodes {
        buf.extend_from_slice(&node.0.to_le_bytes());
    }
    for leaf in &graph.leafs {
        buf.extend_from_slice(&leaf.0.to_le_bytes());
    }
    buf
}

pub fn decode_graph(buf: &[u8]) -> Result<GraphDesc, ProtoError> {
    if buf.len() < GRAPH_HEADER_SIZE {
        return Err(ProtoError::ShortBuffer { need: GRAPH_HEADER_SIZE, got: buf.len() });
    }
    let i32_at = |off: usize| i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    let n_nodes = i32_at(0);
    let has_grads = i32_at(4);
    let n_leafs = i32_at(8);
    if n_nodes < 0 || n_leafs < 0 {
        return Err(ProtoError::BadGraphHeader);
    }
    let (n_nodes, n_leafs) = (n_nodes as usize, n_leafs as usize);

    let need = GRAPH_HEADER_SIZE + (n_nodes + n_leafs) * 8;
    if buf.len() < need {
        return Err(ProtoError::ShortBuffer { need, got: buf.len() });
    }
    let u64_at = |off: usize| u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());

    let mut nodes = Vec::with_capacity(n_nodes);
    for i in 0..n_nodes {
        nodes.push(TensorHandle(u64_at(GRAPH_HEADER_SIZE + i * 8)));
    }
    let leaf_base = GRAPH_HEADER_SIZE + n_nodes * 8;
    let mut leafs = Vec::with_capacity(n_leafs);
    for i in 0..n_leafs {
        leafs.push(TensorHandle(u64_at(leaf_base + i * 8)));
    }

    Ok(GraphDesc { nodes, leafs, has_grads: has_grads != 0 })
}
