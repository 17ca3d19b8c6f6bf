//! Huffman coding of quantization symbols.
//!
//! Trees are built from symbol frequencies with a min-heap keyed by
//! `(weight, node index)`, so identical inputs always produce identical
//! trees. The node table stores the used leaves first, in ascending symbol
//! order, followed by the internal nodes in creation order; the root is the
//! last node.
//!
//! Serialized form, per node: a tag byte (`0` leaf, `1` internal) followed
//! by the symbol as u32 BE, or the left and right child indices as u32 BE.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::bitmap::{BitReader, BitWriter};
use crate::error::{Result, SzError};

const TAG_LEAF: u8 = 0;
const TAG_INTERNAL: u8 = 1;

/// Longest codeword the bit writer accepts.
pub const MAX_CODE_LEN: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Leaf(u32),
    Internal { left: u32, right: u32 },
}

impl Node {
    fn serialized_len(&self) -> usize {
        match self {
            Node::Leaf(_) => 5,
            Node::Internal { .. } => 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Code {
    bits: u64,
    len: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HuffmanTree {
    state_num: usize,
    nodes: Vec<Node>,
    leaf_count: usize,
    /// Codewords of `nodes[..leaf_count]`, same order.
    codes: Vec<Code>,
}

impl HuffmanTree {
    /// Build a code for `symbols`, each of which must lie in `0..state_num`.
    pub fn from_symbols(symbols: &[i32], state_num: usize) -> Result<Self> {
        let mut freq: Vec<u64> = crate::error::try_filled(state_num, 0)?;
        for &s in symbols {
            let slot = usize::try_from(s)
                .ok()
                .and_then(|s| freq.get_mut(s))
                .ok_or_else(|| {
                    SzError::Huffman(format!("symbol {s} outside alphabet of {state_num}"))
                })?;
            *slot += 1;
        }
        Self::from_frequencies(&freq)
    }

    /// Build a code from a dense frequency table indexed by symbol.
    pub fn from_frequencies(freq: &[u64]) -> Result<Self> {
        let mut nodes = Vec::new();
        let mut heap = BinaryHeap::new();
        for (symbol, &weight) in freq.iter().enumerate() {
            if weight > 0 {
                heap.push(Reverse((weight, nodes.len())));
                nodes.push(Node::Leaf(symbol as u32));
            }
        }
        let leaf_count = nodes.len();
        if leaf_count == 0 {
            return Err(SzError::Huffman("no symbols to code".into()));
        }

        while heap.len() > 1 {
            let (Some(Reverse((wl, left))), Some(Reverse((wr, right)))) = (heap.pop(), heap.pop())
            else {
                break;
            };
            heap.push(Reverse((wl + wr, nodes.len())));
            nodes.push(Node::Internal {
                left: left as u32,
                right: right as u32,
            });
        }

        Self::with_nodes(freq.len(), nodes, leaf_count)
    }

    fn with_nodes(state_num: usize, nodes: Vec<Node>, leaf_count: usize) -> Result<Self> {
        let mut codes = vec![Code { bits: 0, len: 0 }; leaf_count];
        let root = nodes.len() - 1;
        if root == 0 {
            // A lone leaf still spends one bit per symbol.
            codes[0] = Code { bits: 0, len: 1 };
        } else {
            let mut stack = vec![(root, 0u64, 0u32)];
            while let Some((idx, bits, len)) = stack.pop() {
                match nodes[idx] {
                    Node::Leaf(_) => codes[idx] = Code { bits, len },
                    Node::Internal { left, right } => {
                        if len == MAX_CODE_LEN {
                            return Err(SzError::Huffman(format!(
                                "code length exceeds {MAX_CODE_LEN} bits"
                            )));
                        }
                        stack.push((right as usize, (bits << 1) | 1, len + 1));
                        stack.push((left as usize, bits << 1, len + 1));
                    }
                }
            }
        }
        Ok(Self {
            state_num,
            nodes,
            leaf_count,
            codes,
        })
    }

    pub fn state_num(&self) -> usize {
        self.state_num
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Longest codeword, in bits.
    pub fn max_code_len(&self) -> u32 {
        self.codes.iter().map(|c| c.len).max().unwrap_or(0)
    }

    /// Byte size of [`write_to`](Self::write_to)'s output.
    pub fn serialized_len(&self) -> usize {
        self.nodes.iter().map(Node::serialized_len).sum()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for node in &self.nodes {
            match *node {
                Node::Leaf(symbol) => {
                    out.push(TAG_LEAF);
                    out.extend_from_slice(&symbol.to_be_bytes());
                }
                Node::Internal { left, right } => {
                    out.push(TAG_INTERNAL);
                    out.extend_from_slice(&left.to_be_bytes());
                    out.extend_from_slice(&right.to_be_bytes());
                }
            }
        }
    }

    /// Parse `node_count` nodes that must occupy all of `bytes`.
    pub fn from_bytes(bytes: &[u8], node_count: usize, state_num: usize) -> Result<Self> {
        if node_count % 2 == 0 || node_count > bytes.len() / 5 {
            return Err(SzError::Huffman(format!(
                "invalid node count {node_count} for a {}-byte tree",
                bytes.len()
            )));
        }
        let word = |at: usize| -> Result<u32> {
            bytes
                .get(at..at + 4)
                .and_then(|b| b.try_into().ok())
                .map(u32::from_be_bytes)
                .ok_or_else(|| SzError::Huffman("tree truncated".into()))
        };

        let mut nodes: Vec<Node> = crate::error::try_with_capacity(node_count)?;
        let mut used = vec![false; node_count];
        let mut leaf_count = 0;
        let mut pos = 0;
        for idx in 0..node_count {
            let tag = *bytes
                .get(pos)
                .ok_or_else(|| SzError::Huffman("tree truncated".into()))?;
            let node = match tag {
                TAG_LEAF => {
                    let symbol = word(pos + 1)?;
                    if leaf_count != idx {
                        return Err(SzError::Huffman(format!("leaf after internal node at {idx}")));
                    }
                    if symbol as usize >= state_num {
                        return Err(SzError::Huffman(format!(
                            "leaf symbol {symbol} outside alphabet of {state_num}"
                        )));
                    }
                    if let Some(&Node::Leaf(prev)) = nodes.last() {
                        if symbol <= prev {
                            return Err(SzError::Huffman("leaf symbols not ascending".into()));
                        }
                    }
                    leaf_count += 1;
                    Node::Leaf(symbol)
                }
                TAG_INTERNAL => {
                    let left = word(pos + 1)?;
                    let right = word(pos + 5)?;
                    for child in [left as usize, right as usize] {
                        if child >= idx || used[child] {
                            return Err(SzError::Huffman(format!(
                                "node {idx} has invalid child {child}"
                            )));
                        }
                        used[child] = true;
                    }
                    Node::Internal { left, right }
                }
                other => {
                    return Err(SzError::Huffman(format!("unknown node tag {other}")));
                }
            };
            pos += node.serialized_len();
            nodes.push(node);
        }
        if pos != bytes.len() {
            return Err(SzError::Huffman(format!(
                "tree occupies {pos} bytes but {} were declared",
                bytes.len()
            )));
        }
        if node_count + 1 != 2 * leaf_count {
            return Err(SzError::Huffman(format!(
                "{node_count} nodes cannot hold {leaf_count} leaves"
            )));
        }
        Self::with_nodes(state_num, nodes, leaf_count)
    }

    fn code_of(&self, symbol: i32) -> Result<Code> {
        let symbol = u32::try_from(symbol)
            .map_err(|_| SzError::Huffman(format!("negative symbol {symbol}")))?;
        self.nodes[..self.leaf_count]
            .binary_search_by_key(&symbol, |node| match node {
                Node::Leaf(s) => *s,
                Node::Internal { .. } => u32::MAX,
            })
            .map(|i| self.codes[i])
            .map_err(|_| SzError::Huffman(format!("symbol {symbol} has no codeword")))
    }

    /// Append the byte-aligned encoding of `symbols` to `out`, returning
    /// the number of bytes appended.
    pub fn encode(&self, symbols: &[i32], out: &mut Vec<u8>) -> Result<usize> {
        let mut writer = BitWriter::new(out);
        for &s in symbols {
            let code = self.code_of(s)?;
            writer.write(code.bits, code.len);
        }
        Ok(writer.finish())
    }

    /// Exact byte size [`encode`](Self::encode) would produce.
    pub fn encoded_len(&self, symbols: &[i32]) -> Result<usize> {
        let mut bits = 0u64;
        for &s in symbols {
            bits += self.code_of(s)?.len as u64;
        }
        Ok(bits.div_ceil(8) as usize)
    }

    /// Decode `out.len()` symbols from `bytes`, which must hold exactly
    /// their byte-aligned encoding.
    pub fn decode(&self, bytes: &[u8], out: &mut [i32]) -> Result<()> {
        let root = self.nodes.len() - 1;
        let mut reader = BitReader::new(bytes);
        for slot in out.iter_mut() {
            let mut idx = root;
            if root == 0 {
                reader.read_bit()?;
            }
            loop {
                match self.nodes[idx] {
                    Node::Leaf(symbol) => {
                        *slot = symbol as i32;
                        break;
                    }
                    Node::Internal { left, right } => {
                        idx = if reader.read_bit()? { right } else { left } as usize;
                    }
                }
            }
        }
        if reader.bytes_consumed() != bytes.len() {
            return Err(SzError::Huffman(format!(
                "stream holds {} bytes but decoding used {}",
                bytes.len(),
                reader.bytes_consumed()
            )));
        }
        Ok(())
    }
}
