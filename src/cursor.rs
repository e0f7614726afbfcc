//! Forward iteration over a query tree: a fork stack of ancestor branch
//! choices plus the current position within a leaf or its overflow chain.
//!
//! Grounded on the teacher's `btree::cursor::Cursor`, generalized per
//! `examples/original_source/src/libbruce/src/tree_iterator_impl.cpp`'s
//! `fork` stack to additionally walk into duplicate-key overflow chains.

use std::cmp::Ordering;

use crate::bytes::Bytes;
use crate::error::{Result, TreeError};
use crate::node::{InternalNode, LeafNode, Node, OverflowLink, OverflowNode, OverflowTail};
use crate::query::QueryTree;

/// Below this many steps, `skip` walks forward one item at a time instead
/// of recomputing the position from a rank seek.
const LOCAL_ADVANCE_THRESHOLD: u64 = 8;

/// A forward-only cursor over a query tree's items in key order.
pub struct Cursor {
    query: QueryTree,
    path: Vec<(InternalNode, usize)>,
    leaf: LeafNode,
    leaf_idx: usize,
    overflow_node: Option<OverflowNode>,
    overflow_idx: usize,
    rank: u64,
    done: bool,
}

impl Cursor {
    fn empty(query: QueryTree) -> Self {
        Self {
            query,
            path: Vec::new(),
            leaf: LeafNode::new(),
            leaf_idx: 0,
            overflow_node: None,
            overflow_idx: 0,
            rank: 0,
            done: true,
        }
    }

    pub(crate) fn seek_key(query: &QueryTree, key: &[u8]) -> Result<Cursor> {
        let root_id = match query.root_id {
            Some(id) => id,
            None => return Ok(Cursor::empty(query.clone())),
        };
        let mut node = query.load(root_id)?;
        let mut path = Vec::new();
        let mut rank_before = 0u64;
        loop {
            match node {
                Node::Internal(internal) => {
                    let idx = query.find_branch_index(&internal, key);
                    rank_before += internal.branches[..idx].iter().map(|b| b.item_count as u64).sum::<u64>();
                    let child = query.load_child(&internal.branches[idx].child)?;
                    path.push((internal, idx));
                    node = child;
                }
                Node::Leaf(leaf) => {
                    let mut idx = leaf.pairs.len();
                    for (i, (k, _)) in leaf.pairs.iter().enumerate() {
                        if query.fns.key_cmp(k.as_slice(), key) != Ordering::Less {
                            idx = i;
                            break;
                        }
                    }
                    let done = idx >= leaf.pairs.len();
                    let rank = rank_before + idx as u64;
                    return Ok(Cursor {
                        query: query.clone(),
                        path,
                        leaf,
                        leaf_idx: idx,
                        overflow_node: None,
                        overflow_idx: 0,
                        rank,
                        done,
                    });
                }
                Node::Overflow(_) => return Err(TreeError::invariant("overflow node reached via branch descent")),
            }
        }
    }

    pub(crate) fn seek_rank(query: &QueryTree, target: u64) -> Result<Cursor> {
        let root_id = match query.root_id {
            Some(id) => id,
            None => return Ok(Cursor::empty(query.clone())),
        };
        let mut node = query.load(root_id)?;
        let mut path = Vec::new();
        let mut remaining = target;
        loop {
            match node {
                Node::Internal(internal) => {
                    let mut idx = internal.branches.len() - 1;
                    for (i, b) in internal.branches.iter().enumerate() {
                        if remaining < b.item_count as u64 {
                            idx = i;
                            break;
                        }
                        remaining -= b.item_count as u64;
                    }
                    let child = query.load_child(&internal.branches[idx].child)?;
                    path.push((internal, idx));
                    node = child;
                }
                Node::Leaf(leaf) => {
                    return Self::position_in_leaf_chain(query.clone(), path, leaf, remaining, target);
                }
                Node::Overflow(_) => return Err(TreeError::invariant("overflow node reached via branch descent")),
            }
        }
    }

    fn position_in_leaf_chain(
        query: QueryTree,
        path: Vec<(InternalNode, usize)>,
        leaf: LeafNode,
        mut remaining: u64,
        rank: u64,
    ) -> Result<Cursor> {
        let pairs_len = leaf.pairs.len() as u64;
        if remaining < pairs_len {
            return Ok(Cursor {
                query,
                path,
                leaf,
                leaf_idx: remaining as usize,
                overflow_node: None,
                overflow_idx: 0,
                rank,
                done: false,
            });
        }
        remaining -= pairs_len;
        let mut tail = leaf.overflow.clone();
        loop {
            match &tail.link {
                OverflowLink::None => {
                    return Ok(Cursor {
                        query,
                        path,
                        leaf_idx: pairs_len as usize,
                        leaf,
                        overflow_node: None,
                        overflow_idx: 0,
                        rank,
                        done: true,
                    });
                }
                OverflowLink::Id(id) => {
                    let node = query.load(*id)?;
                    let node = node
                        .as_overflow()
                        .cloned()
                        .ok_or_else(|| TreeError::invariant("expected overflow node"))?;
                    if remaining < node.values.len() as u64 {
                        return Ok(Cursor {
                            query,
                            path,
                            leaf_idx: pairs_len as usize,
                            leaf,
                            overflow_idx: remaining as usize,
                            overflow_node: Some(node),
                            rank,
                            done: false,
                        });
                    }
                    remaining -= node.values.len() as u64;
                    tail = node.next.clone();
                }
                OverflowLink::Owned(_) => unreachable!("query trees only ever see resolved ids"),
            }
        }
    }

    pub fn valid(&self) -> bool {
        !self.done
    }

    pub fn rank(&self) -> u64 {
        self.rank
    }

    pub fn key(&self) -> Option<Bytes> {
        if self.done {
            return None;
        }
        if self.overflow_node.is_some() {
            self.leaf.terminal_key()
        } else {
            self.leaf.pairs.get(self.leaf_idx).map(|(k, _)| k.clone())
        }
    }

    pub fn value(&self) -> Option<Bytes> {
        if self.done {
            return None;
        }
        if let Some(node) = &self.overflow_node {
            node.values.get(self.overflow_idx).cloned()
        } else {
            self.leaf.pairs.get(self.leaf_idx).map(|(_, v)| v.clone())
        }
    }

    /// Advances to the next item in key order.
    pub fn next(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.rank += 1;

        if let Some(node) = self.overflow_node.take() {
            if self.overflow_idx + 1 < node.values.len() {
                self.overflow_idx += 1;
                self.overflow_node = Some(node);
                return Ok(());
            }
            return self.advance_past_tail(node.next);
        }

        if self.leaf_idx + 1 < self.leaf.pairs.len() {
            self.leaf_idx += 1;
            return Ok(());
        }

        if !self.leaf.overflow.is_empty() {
            let tail = self.leaf.overflow.clone();
            return self.advance_past_tail(tail);
        }

        self.advance_to_next_leaf()
    }

    fn advance_past_tail(&mut self, tail: OverflowTail) -> Result<()> {
        match tail.link {
            OverflowLink::None => self.advance_to_next_leaf(),
            OverflowLink::Id(id) => {
                let node = self.query.load(id)?;
                let node = node
                    .as_overflow()
                    .cloned()
                    .ok_or_else(|| TreeError::invariant("expected overflow node"))?;
                self.overflow_idx = 0;
                self.overflow_node = Some(node);
                Ok(())
            }
            OverflowLink::Owned(_) => unreachable!("query trees only ever see resolved ids"),
        }
    }

    fn advance_to_next_leaf(&mut self) -> Result<()> {
        self.overflow_node = None;
        loop {
            match self.path.pop() {
                None => {
                    self.done = true;
                    return Ok(());
                }
                Some((internal, idx)) => {
                    if idx + 1 < internal.branches.len() {
                        let next_idx = idx + 1;
                        let child = self.query.load_child(&internal.branches[next_idx].child)?;
                        self.path.push((internal, next_idx));
                        return self.descend_leftmost(child);
                    }
                }
            }
        }
    }

    fn descend_leftmost(&mut self, mut node: Node) -> Result<()> {
        loop {
            match node {
                Node::Leaf(leaf) => {
                    self.leaf = leaf;
                    self.leaf_idx = 0;
                    return Ok(());
                }
                Node::Internal(internal) => {
                    let child = self.query.load_child(&internal.branches[0].child)?;
                    self.path.push((internal, 0));
                    node = child;
                }
                Node::Overflow(_) => {
                    return Err(TreeError::invariant("overflow node reached via branch descent"));
                }
            }
        }
    }

    /// Advances by `n` items, walking forward locally for small `n` and
    /// falling back to a rank-based seek for larger jumps.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 || self.done {
            return Ok(());
        }
        if n <= LOCAL_ADVANCE_THRESHOLD {
            for _ in 0..n {
                if self.done {
                    return Ok(());
                }
                self.next()?;
            }
            return Ok(());
        }
        let target = self.rank + n;
        *self = Cursor::seek_rank(&self.query, target)?;
        Ok(())
    }
}
