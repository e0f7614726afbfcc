//! The mutating tree: insert, remove, upsert, and the copy-on-write flush.
//!
//! Grounded on the teacher's `btree::tree::BTree::put`/`delete` recursive
//! descend-and-split structure, generalized per
//! `examples/original_source/src/libbruce/src/operations.cpp`
//! (`mutable_tree::insertRec`, `splitresult_t`, `flush`'s three phases) to
//! add duplicate-key overflow chains, the pending edit queue on internal
//! nodes, and the `Mutation` report.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::bytes::Bytes;
use crate::codec::{self, TreeFunctions};
use crate::config::TreeLimits;
use crate::error::{Result, TreeError};
use crate::node::{
    Branch, ChildRef, EditKind, InternalNode, ItemCount, LeafNode, Node, NodeId, OverflowLink,
    OverflowNode, OverflowTail, PendingEdit,
};
use crate::size::{self, LeafSplitDecision};
use crate::store::{BlockStore, PutEntry};

/// The result of a flush: the new root and the bookkeeping needed for
/// garbage collection, per spec §4.8.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub new_root_id: Option<NodeId>,
    pub created_ids: Vec<NodeId>,
    pub obsolete_ids: Vec<NodeId>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Outcome of applying one edit to a subtree: either it stayed a single
/// node, or it grew past its budget and split in two.
enum EditOutcome {
    Single(Node, ItemCount),
    Split {
        left: Node,
        left_count: ItemCount,
        separator: Bytes,
        right: Node,
        right_count: ItemCount,
    },
}

/// A handle over one mutation session: an optional root, a block store, and
/// the tree functions, frozen after its first flush.
pub struct EditTree {
    store: Arc<dyn BlockStore>,
    fns: TreeFunctions,
    limits: TreeLimits,
    original_root_id: Option<NodeId>,
    root: Option<Node>,
    loaded_ids: Vec<NodeId>,
    touched: bool,
    frozen: bool,
}

impl EditTree {
    pub fn new(
        store: Arc<dyn BlockStore>,
        fns: TreeFunctions,
        limits: TreeLimits,
        root_id: Option<NodeId>,
    ) -> Self {
        Self {
            store,
            fns,
            limits,
            original_root_id: root_id,
            root: None,
            loaded_ids: Vec::new(),
            touched: false,
            frozen: false,
        }
    }

    pub fn insert(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        self.validate_mutable(key.len(), value.len())?;
        self.apply_edit(PendingEdit::insert(key, value))
    }

    pub fn upsert(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        self.validate_mutable(key.len(), value.len())?;
        self.apply_edit(PendingEdit::upsert(key, value))
    }

    pub fn remove(&mut self, key: Bytes) -> Result<()> {
        self.check_not_frozen()?;
        self.apply_edit(PendingEdit::remove_key(key))
    }

    pub fn remove_kv(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        self.check_not_frozen()?;
        self.apply_edit(PendingEdit::remove_kv(key, value))
    }

    fn check_not_frozen(&self) -> Result<()> {
        if self.frozen {
            return Err(TreeError::AlreadyFlushed);
        }
        Ok(())
    }

    fn validate_mutable(&self, key_len: usize, value_len: usize) -> Result<()> {
        self.check_not_frozen()?;
        let max = self.limits.max_block_size as usize;
        if key_len + value_len > max {
            return Err(TreeError::ValueTooLarge {
                size: key_len + value_len,
                max,
            });
        }
        Ok(())
    }

    fn apply_edit(&mut self, edit: PendingEdit) -> Result<()> {
        self.load_root_if_needed()?;
        match self.root.take() {
            None => {
                if edit.kind.carries_value() {
                    let leaf = LeafNode {
                        pairs: vec![(edit.key, edit.value.unwrap())],
                        overflow: OverflowTail::none(),
                    };
                    self.root = Some(Node::Leaf(leaf));
                } else {
                    self.root = None;
                }
            }
            Some(root) => match self.apply_rec(root, edit)? {
                EditOutcome::Single(n, _) => self.root = Some(n),
                EditOutcome::Split {
                    left,
                    left_count,
                    separator,
                    right,
                    right_count,
                } => {
                    let branches = vec![
                        Branch::new_owned(Bytes::empty(), left, left_count),
                        Branch::new_owned(separator, right, right_count),
                    ];
                    self.root = Some(Node::Internal(InternalNode {
                        branches,
                        edits: Vec::new(),
                    }));
                }
            },
        }
        self.touched = true;
        Ok(())
    }

    fn load_root_if_needed(&mut self) -> Result<()> {
        if self.touched || self.root.is_some() {
            return Ok(());
        }
        if let Some(id) = self.original_root_id {
            let bytes = self.store.get(id)?;
            self.loaded_ids.push(id);
            self.root = Some(codec::parse_node(&bytes, &self.fns)?);
        }
        Ok(())
    }

    fn apply_rec(&mut self, node: Node, edit: PendingEdit) -> Result<EditOutcome> {
        match node {
            Node::Leaf(leaf) => self.apply_edit_to_leaf(leaf, edit),
            Node::Internal(internal) => self.apply_edit_to_internal(internal, edit),
            Node::Overflow(_) => Err(TreeError::invariant(
                "overflow node encountered on the branch-indexed descent path",
            )),
        }
    }

    fn take_child_owned(&mut self, child: ChildRef) -> Result<Node> {
        match child {
            ChildRef::Owned(n) => Ok(*n),
            ChildRef::Id(id) => {
                let bytes = self.store.get(id)?;
                self.loaded_ids.push(id);
                codec::parse_node(&bytes, &self.fns)
            }
        }
    }

    fn find_branch_index(&self, branches: &[Branch], key: &[u8]) -> usize {
        let mut idx = 0;
        for (i, b) in branches.iter().enumerate().skip(1) {
            if self.fns.key_cmp(b.min_key.as_slice(), key) != Ordering::Greater {
                idx = i;
            } else {
                break;
            }
        }
        idx
    }

    fn apply_edit_to_internal(&mut self, mut internal: InternalNode, edit: PendingEdit) -> Result<EditOutcome> {
        let projected = size::edit_queue_size(&internal) + 1 + edit.payload_len();
        if (projected as u32) <= self.limits.max_edit_queue_size {
            internal.edits.push(edit);
            return self.finish_internal(internal);
        }

        let queued = std::mem::take(&mut internal.edits);
        for queued_edit in queued {
            internal = self.dispatch_edit_to_child(internal, queued_edit)?;
        }
        internal = self.dispatch_edit_to_child(internal, edit)?;
        self.finish_internal(internal)
    }

    fn dispatch_edit_to_child(&mut self, mut internal: InternalNode, edit: PendingEdit) -> Result<InternalNode> {
        let idx = self.find_branch_index(&internal.branches, edit.key.as_slice());
        let placeholder = std::mem::replace(&mut internal.branches[idx].child, ChildRef::Id(0));
        let child = self.take_child_owned(placeholder)?;
        let min_key = internal.branches[idx].min_key.clone();

        match self.apply_rec(child, edit)? {
            EditOutcome::Single(new_child, new_count) => {
                if new_count == 0 && internal.branches.len() > 1 {
                    // Drop branches that emptied out entirely. This is not a
                    // sibling merge: a nonempty sibling's contents are never
                    // touched, only the dead branch disappears.
                    internal.branches.remove(idx);
                    if idx == 0 {
                        internal.branches[0].min_key = Bytes::empty();
                    }
                } else {
                    internal.branches[idx] = Branch::new_owned(min_key, new_child, new_count);
                }
            }
            EditOutcome::Split {
                left,
                left_count,
                separator,
                right,
                right_count,
            } => {
                internal.branches[idx] = Branch::new_owned(min_key, left, left_count);
                internal
                    .branches
                    .insert(idx + 1, Branch::new_owned(separator, right, right_count));
            }
        }
        Ok(internal)
    }

    fn finish_internal(&mut self, internal: InternalNode) -> Result<EditOutcome> {
        match size::decide_internal_split(
            &internal,
            self.limits.max_block_size as usize,
            self.limits.max_edit_queue_size as usize,
        ) {
            None => {
                let count = internal.item_count();
                Ok(EditOutcome::Single(Node::Internal(internal), count))
            }
            Some(split_at) => {
                let InternalNode { mut branches, edits } = internal;
                let mut right_branches = branches.split_off(split_at);
                let separator = right_branches[0].min_key.clone();
                right_branches[0].min_key = Bytes::empty();

                let (left_edits, right_edits): (Vec<_>, Vec<_>) = edits
                    .into_iter()
                    .partition(|e| self.fns.key_cmp(e.key.as_slice(), separator.as_slice()) != Ordering::Greater);

                let left = InternalNode {
                    branches,
                    edits: left_edits,
                };
                let right = InternalNode {
                    branches: right_branches,
                    edits: right_edits,
                };
                let left_count = left.item_count();
                let right_count = right.item_count();
                Ok(EditOutcome::Split {
                    left: Node::Internal(left),
                    left_count,
                    separator,
                    right: Node::Internal(right),
                    right_count,
                })
            }
        }
    }

    fn apply_edit_to_leaf(&mut self, mut leaf: LeafNode, edit: PendingEdit) -> Result<EditOutcome> {
        match edit.kind {
            EditKind::Insert => {
                let pos = self.stable_insert_position(&leaf.pairs, edit.key.as_slice());
                leaf.pairs.insert(pos, (edit.key, edit.value.unwrap()));
            }
            EditKind::Upsert => {
                if let Some(pos) = leaf
                    .pairs
                    .iter()
                    .position(|(k, _)| self.fns.key_cmp(k.as_slice(), edit.key.as_slice()) == Ordering::Equal)
                {
                    leaf.pairs[pos].1 = edit.value.unwrap();
                } else {
                    let pos = self.stable_insert_position(&leaf.pairs, edit.key.as_slice());
                    leaf.pairs.insert(pos, (edit.key, edit.value.unwrap()));
                }
            }
            EditKind::RemoveKey => {
                if let Some(pos) = leaf
                    .pairs
                    .iter()
                    .position(|(k, _)| self.fns.key_cmp(k.as_slice(), edit.key.as_slice()) == Ordering::Equal)
                {
                    leaf.pairs.remove(pos);
                }
            }
            EditKind::RemoveKV => {
                let value = edit.value.unwrap();
                if let Some(pos) = leaf.pairs.iter().position(|(k, v)| {
                    self.fns.key_cmp(k.as_slice(), edit.key.as_slice()) == Ordering::Equal
                        && self.fns.value_cmp(v.as_slice(), value.as_slice()) == Ordering::Equal
                }) {
                    leaf.pairs.remove(pos);
                } else if let Some(new_tail) = self.remove_value_from_chain(&leaf.overflow, &value)? {
                    leaf.overflow = new_tail;
                }
            }
        }
        self.finish_leaf(leaf)
    }

    fn stable_insert_position(&self, pairs: &[(Bytes, Bytes)], key: &[u8]) -> usize {
        for (i, (k, _)) in pairs.iter().enumerate() {
            if self.fns.key_cmp(k.as_slice(), key) == Ordering::Greater {
                return i;
            }
        }
        pairs.len()
    }

    /// Loads the overflow node a tail points to, regardless of whether it
    /// is still on disk or already dirtied in this mutation. Returns the
    /// source id alongside it so callers can mark it obsolete once they
    /// actually replace it.
    fn load_overflow_node(&self, tail: &OverflowTail) -> Result<(Option<NodeId>, OverflowNode)> {
        match &tail.link {
            OverflowLink::None => Ok((None, OverflowNode::new())),
            OverflowLink::Owned(n) => Ok((None, (**n).clone())),
            OverflowLink::Id(id) => {
                let bytes = self.store.get(*id)?;
                match codec::parse_node(&bytes, &self.fns)? {
                    Node::Overflow(o) => Ok((Some(*id), o)),
                    _ => Err(TreeError::corruption(*id, "expected overflow node")),
                }
            }
        }
    }

    /// Searches an overflow chain for `value`, returning a new tail with
    /// that entry spliced out if found, or `None` if it isn't present
    /// anywhere in the chain.
    fn remove_value_from_chain(&mut self, tail: &OverflowTail, value: &Bytes) -> Result<Option<OverflowTail>> {
        if tail.is_empty() {
            return Ok(None);
        }
        let (loaded_id, node) = self.load_overflow_node(tail)?;

        if let Some(pos) = node
            .values
            .iter()
            .position(|v| self.fns.value_cmp(v.as_slice(), value.as_slice()) == Ordering::Equal)
        {
            if let Some(id) = loaded_id {
                self.loaded_ids.push(id);
            }
            let mut values = node.values;
            values.remove(pos);
            if values.is_empty() {
                return Ok(Some(node.next));
            }
            let new_node = OverflowNode { values, next: node.next };
            let count = new_node.item_count();
            return Ok(Some(OverflowTail::from_owned(count, new_node)));
        }

        match self.remove_value_from_chain(&node.next, value)? {
            Some(new_next) => {
                if let Some(id) = loaded_id {
                    self.loaded_ids.push(id);
                }
                let new_node = OverflowNode {
                    values: node.values,
                    next: new_next,
                };
                let count = new_node.item_count();
                Ok(Some(OverflowTail::from_owned(count, new_node)))
            }
            None => Ok(None),
        }
    }

    fn finish_leaf(&mut self, leaf: LeafNode) -> Result<EditOutcome> {
        let max = self.limits.max_block_size as usize;
        match size::decide_leaf_split(&leaf, max, self.fns.key_compare.as_ref()) {
            LeafSplitDecision::Fits => {
                let count = leaf.item_count();
                Ok(EditOutcome::Single(Node::Leaf(leaf), count))
            }
            LeafSplitDecision::AttachOverflow { spill_from } => {
                let LeafNode { mut pairs, overflow } = leaf;
                let spilled: Vec<Bytes> = pairs.split_off(spill_from).into_iter().map(|(_, v)| v).collect();
                let tail = self.seed_overflow(spilled, overflow)?;
                let new_leaf = LeafNode { pairs, overflow: tail };
                let count = new_leaf.item_count();
                Ok(EditOutcome::Single(Node::Leaf(new_leaf), count))
            }
            LeafSplitDecision::Split {
                boundary,
                right_overflow_from,
            } => {
                let LeafNode { mut pairs, overflow } = leaf;
                let mut right_pairs = pairs.split_off(boundary);
                let left_leaf = LeafNode {
                    pairs,
                    overflow: OverflowTail::none(),
                };

                let right_overflow = if let Some(split_from) = right_overflow_from {
                    let local = split_from - boundary;
                    let spilled: Vec<Bytes> = right_pairs.split_off(local).into_iter().map(|(_, v)| v).collect();
                    self.seed_overflow(spilled, overflow)?
                } else {
                    overflow
                };
                let right_leaf = LeafNode {
                    pairs: right_pairs,
                    overflow: right_overflow,
                };

                let separator = right_leaf.pairs[0].0.clone();
                let left_count = left_leaf.item_count();
                let right_count = right_leaf.item_count();
                Ok(EditOutcome::Split {
                    left: Node::Leaf(left_leaf),
                    left_count,
                    separator,
                    right: Node::Leaf(right_leaf),
                    right_count,
                })
            }
        }
    }

    /// Appends `values` onto the end of an existing overflow chain (or
    /// starts a fresh one if `existing` is empty), splitting as needed to
    /// keep every node within the block budget. Per spec §4.6, insertion
    /// into an already-overflowing key appends to the chain's tail, so the
    /// chain walks in insertion order end to end — `values` must land
    /// after everything already in `existing`, not before it.
    fn seed_overflow(&mut self, values: Vec<Bytes>, existing: OverflowTail) -> Result<OverflowTail> {
        if values.is_empty() {
            return Ok(existing);
        }
        if existing.is_empty() {
            let node = OverflowNode {
                values,
                next: OverflowTail::none(),
            };
            return self.ensure_overflow_fits(node);
        }
        let (loaded_id, node) = self.load_overflow_node(&existing)?;
        if let Some(id) = loaded_id {
            self.loaded_ids.push(id);
        }
        let OverflowNode { values: head_values, next } = node;
        let new_next = self.seed_overflow(values, next)?;
        let merged = OverflowNode {
            values: head_values,
            next: new_next,
        };
        self.ensure_overflow_fits(merged)
    }

    fn ensure_overflow_fits(&mut self, node: OverflowNode) -> Result<OverflowTail> {
        let max = self.limits.max_block_size as usize;
        match size::decide_overflow_split(&node, max) {
            None => {
                let count = node.item_count();
                Ok(OverflowTail::from_owned(count, node))
            }
            Some(split_at) => {
                let OverflowNode { mut values, next } = node;
                let right_values = values.split_off(split_at);
                let right_node = OverflowNode { values: right_values, next };
                let right_tail = self.ensure_overflow_fits(right_node)?;
                let left_node = OverflowNode {
                    values,
                    next: right_tail,
                };
                let count = left_node.item_count();
                Ok(OverflowTail::from_owned(count, left_node))
            }
        }
    }

    /// Runs the three-phase copy-on-write flush (spec §4.8) and freezes
    /// the handle. Further mutating calls fail with `AlreadyFlushed`.
    pub fn flush(&mut self) -> Result<Mutation> {
        self.check_not_frozen()?;
        self.frozen = true;

        if !self.touched {
            return Ok(Mutation {
                new_root_id: self.original_root_id,
                created_ids: Vec::new(),
                obsolete_ids: Vec::new(),
                success: true,
                error_message: None,
            });
        }

        let (new_root_id, puts) = match self.root.take() {
            None => (None, Vec::new()),
            Some(node) => {
                let dirtied = count_dirtied(&node);
                let ids = self.store.allocate_ids(dirtied)?;
                let mut ctx = FlushCtx { ids, next: 0, puts: Vec::new() };
                let root_id = self.resolve_and_collect(node, &mut ctx)?;
                (Some(root_id), ctx.puts)
            }
        };

        let results = self.store.put_all(puts)?;
        let mut created_ids = Vec::new();
        let mut success = true;
        for entry in &results {
            if entry.success {
                created_ids.push(entry.id);
            } else {
                success = false;
            }
        }

        let mut obsolete_ids = std::mem::take(&mut self.loaded_ids);
        obsolete_ids.sort_unstable();
        obsolete_ids.dedup();

        Ok(Mutation {
            new_root_id,
            created_ids,
            obsolete_ids,
            success,
            error_message: if success {
                None
            } else {
                Some("put failed: one or more pages could not be written".to_string())
            },
        })
    }

    fn resolve_and_collect(&mut self, node: Node, ctx: &mut FlushCtx) -> Result<NodeId> {
        let id = ctx.take_id();
        let resolved = match node {
            Node::Leaf(mut leaf) => {
                if let OverflowLink::Owned(boxed) = std::mem::replace(&mut leaf.overflow.link, OverflowLink::None) {
                    let oid = self.resolve_and_collect_overflow(*boxed, ctx)?;
                    leaf.overflow.link = OverflowLink::Id(oid);
                }
                Node::Leaf(leaf)
            }
            Node::Internal(mut internal) => {
                for branch in internal.branches.iter_mut() {
                    if matches!(branch.child, ChildRef::Owned(_)) {
                        let taken = std::mem::replace(&mut branch.child, ChildRef::Id(0));
                        if let ChildRef::Owned(child) = taken {
                            let cid = self.resolve_and_collect(*child, ctx)?;
                            branch.child = ChildRef::Id(cid);
                        }
                    }
                }
                Node::Internal(internal)
            }
            Node::Overflow(o) => Node::Overflow(o),
        };

        let bytes = codec::serialize_node(&resolved);
        if bytes.len() > self.limits.max_block_size as usize {
            return Err(TreeError::invariant(format!(
                "{} node of {} bytes exceeds max block size {} after split",
                resolved.kind_name(),
                bytes.len(),
                self.limits.max_block_size
            )));
        }
        ctx.puts.push(PutEntry::new(id, Bytes::from_vec(bytes)));
        Ok(id)
    }

    fn resolve_and_collect_overflow(&mut self, mut node: OverflowNode, ctx: &mut FlushCtx) -> Result<NodeId> {
        let id = ctx.take_id();
        if let OverflowLink::Owned(boxed) = std::mem::replace(&mut node.next.link, OverflowLink::None) {
            let nid = self.resolve_and_collect_overflow(*boxed, ctx)?;
            node.next.link = OverflowLink::Id(nid);
        }
        let bytes = codec::serialize_node(&Node::Overflow(node));
        ctx.puts.push(PutEntry::new(id, Bytes::from_vec(bytes)));
        Ok(id)
    }
}

struct FlushCtx {
    ids: Vec<NodeId>,
    next: usize,
    puts: Vec<PutEntry>,
}

impl FlushCtx {
    fn take_id(&mut self) -> NodeId {
        let id = self.ids[self.next];
        self.next += 1;
        id
    }
}

fn count_dirtied(node: &Node) -> usize {
    1 + match node {
        Node::Leaf(l) => match &l.overflow.link {
            OverflowLink::Owned(o) => count_dirtied_overflow(o),
            _ => 0,
        },
        Node::Internal(i) => i
            .branches
            .iter()
            .map(|b| match &b.child {
                ChildRef::Owned(c) => count_dirtied(c),
                ChildRef::Id(_) => 0,
            })
            .sum(),
        Node::Overflow(o) => match &o.next.link {
            OverflowLink::Owned(n) => count_dirtied_overflow(n),
            _ => 0,
        },
    }
}

fn count_dirtied_overflow(node: &OverflowNode) -> usize {
    1 + match &node.next.link {
        OverflowLink::Owned(n) => count_dirtied_overflow(n),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixed_width_functions;
    use crate::query::QueryTree;
    use crate::store::MemStore;

    fn u32_key(n: u32) -> Bytes {
        Bytes::from_vec(n.to_le_bytes().to_vec())
    }

    fn new_tree(store: Arc<MemStore>) -> EditTree {
        EditTree::new(store, fixed_width_functions(4, 4), TreeLimits::new(1024), None)
    }

    #[test]
    fn single_leaf_persists_s1() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store.clone());
        tree.insert(u32_key(1), u32_key(1)).unwrap();
        tree.insert(u32_key(2), u32_key(2)).unwrap();
        let mutation = tree.flush().unwrap();
        assert!(mutation.success);
        assert_eq!(mutation.created_ids.len(), 1);

        let query = QueryTree::new(store, fixed_width_functions(4, 4), mutation.new_root_id);
        assert_eq!(query.get(&u32_key(1)).unwrap().unwrap().as_slice(), u32_key(1).as_slice());
        assert_eq!(query.get(&u32_key(2)).unwrap().unwrap().as_slice(), u32_key(2).as_slice());
    }

    #[test]
    fn split_on_growth_s2() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store.clone());
        for i in 0u32..140 {
            tree.insert(u32_key(i), u32_key(i)).unwrap();
        }
        let mutation = tree.flush().unwrap();
        assert!(mutation.success);
        assert_eq!(store.block_count(), 3);

        let query = QueryTree::new(store, fixed_width_functions(4, 4), mutation.new_root_id);
        assert_eq!(query.item_count().unwrap(), 140);
    }

    #[test]
    fn overflow_chain_s3() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store.clone());
        for i in 0u32..300 {
            tree.insert(u32_key(0), u32_key(i)).unwrap();
        }
        let mutation = tree.flush().unwrap();
        assert!(mutation.success);
        assert!(store.block_count() >= 3);

        let query = QueryTree::new(store, fixed_width_functions(4, 4), mutation.new_root_id);
        let mut cursor = query.find(&u32_key(0)).unwrap();
        let mut values = Vec::new();
        while cursor.valid() {
            values.push(u32::from_le_bytes(cursor.value().unwrap().as_slice().try_into().unwrap()));
            cursor.next().unwrap();
        }
        assert_eq!(values, (0u32..300).collect::<Vec<_>>());
    }

    #[test]
    fn idempotent_reflush_returns_original_root() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store.clone());
        tree.insert(u32_key(1), u32_key(1)).unwrap();
        let first = tree.flush().unwrap();

        let mut reopened = EditTree::new(
            store,
            fixed_width_functions(4, 4),
            TreeLimits::new(1024),
            first.new_root_id,
        );
        let second = reopened.flush().unwrap();
        assert_eq!(second.new_root_id, first.new_root_id);
        assert!(second.created_ids.is_empty());
        assert!(second.obsolete_ids.is_empty());
    }

    #[test]
    fn mutating_after_flush_fails() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store);
        tree.insert(u32_key(1), u32_key(1)).unwrap();
        tree.flush().unwrap();
        assert!(matches!(tree.insert(u32_key(2), u32_key(2)), Err(TreeError::AlreadyFlushed)));
    }

    #[test]
    fn value_too_large_is_rejected_up_front() {
        let store = Arc::new(MemStore::new(32));
        let mut tree = new_tree(store);
        let big = Bytes::from_vec(vec![0u8; 64]);
        assert!(matches!(
            tree.insert(u32_key(1), big),
            Err(TreeError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn empty_branch_is_dropped_without_sibling_merge_s4() {
        // A tight block size so two single-pair inserts split into two
        // one-pair leaves rather than staying in one leaf.
        let store = Arc::new(MemStore::new(24));
        let mut tree = EditTree::new(store.clone(), fixed_width_functions(4, 4), TreeLimits::new(24), None);
        tree.insert(u32_key(1), u32_key(1)).unwrap();
        tree.insert(u32_key(2), u32_key(2)).unwrap();
        let built = tree.flush().unwrap();
        assert_eq!(store.block_count(), 3);

        let mut tree = EditTree::new(
            store.clone(),
            fixed_width_functions(4, 4),
            TreeLimits::new(24),
            built.new_root_id,
        );
        tree.remove(u32_key(1)).unwrap();
        let mutation = tree.flush().unwrap();
        assert!(mutation.success);
        assert_eq!(mutation.obsolete_ids.len(), 2);
        assert!(!mutation.created_ids.is_empty());

        let query = QueryTree::new(store, fixed_width_functions(4, 4), mutation.new_root_id);
        assert_eq!(query.item_count().unwrap(), 1);
        assert!(query.get(&u32_key(1)).unwrap().is_none());
        assert_eq!(query.get(&u32_key(2)).unwrap().unwrap().as_slice(), u32_key(2).as_slice());
    }

    #[test]
    fn upsert_update_vs_insert_s5() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store.clone());
        tree.insert(u32_key(1), u32_key(1)).unwrap();
        tree.insert(u32_key(3), u32_key(3)).unwrap();
        let base = tree.flush().unwrap();

        let mut tree = EditTree::new(
            store.clone(),
            fixed_width_functions(4, 4),
            TreeLimits::new(1024),
            base.new_root_id,
        );
        tree.upsert(u32_key(1), u32_key(2)).unwrap();
        let m1 = tree.flush().unwrap();
        let q1 = QueryTree::new(store.clone(), fixed_width_functions(4, 4), m1.new_root_id);
        assert_eq!(q1.get(&u32_key(1)).unwrap().unwrap().as_slice(), u32_key(2).as_slice());

        let mut tree = EditTree::new(
            store.clone(),
            fixed_width_functions(4, 4),
            TreeLimits::new(1024),
            base.new_root_id,
        );
        tree.upsert(u32_key(2), u32_key(2)).unwrap();
        let m2 = tree.flush().unwrap();
        let q2 = QueryTree::new(store, fixed_width_functions(4, 4), m2.new_root_id);
        assert_eq!(q2.get(&u32_key(1)).unwrap().unwrap().as_slice(), u32_key(1).as_slice());
        assert_eq!(q2.get(&u32_key(2)).unwrap().unwrap().as_slice(), u32_key(2).as_slice());
        let c3 = q2.find(&u32_key(3)).unwrap();
        assert_eq!(c3.rank(), 2);
    }

    #[test]
    fn overflow_remove_nonexistent_s6() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store.clone());
        for i in 0u32..128 {
            tree.insert(u32_key(2), u32_key(i)).unwrap();
        }
        let base = tree.flush().unwrap();

        let mut tree = EditTree::new(
            store.clone(),
            fixed_width_functions(4, 4),
            TreeLimits::new(1024),
            base.new_root_id,
        );
        tree.remove_kv(u32_key(2), u32_key(130)).unwrap();
        let mutation = tree.flush().unwrap();

        let query = QueryTree::new(store, fixed_width_functions(4, 4), mutation.new_root_id);
        assert_eq!(query.item_count().unwrap(), 128);
    }

    #[test]
    fn size_bound_holds_after_split() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store.clone());
        for i in 0u32..500 {
            tree.insert(u32_key(i), u32_key(i)).unwrap();
        }
        tree.flush().unwrap();

        for id in 1..=store.block_count() as u64 {
            if let Ok(bytes) = store.get(id) {
                assert!(bytes.len() <= 1024);
            }
        }
    }

    #[test]
    fn copy_on_write_disjointness() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = new_tree(store.clone());
        for i in 0u32..140 {
            tree.insert(u32_key(i), u32_key(i)).unwrap();
        }
        let first = tree.flush().unwrap();

        let mut tree = EditTree::new(store, fixed_width_functions(4, 4), TreeLimits::new(1024), first.new_root_id);
        tree.insert(u32_key(1000), u32_key(1000)).unwrap();
        let second = tree.flush().unwrap();

        for id in &second.created_ids {
            assert!(!second.obsolete_ids.contains(id));
        }
    }
}
