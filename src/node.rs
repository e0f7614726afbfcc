//! In-memory node model: leaf, internal, and overflow nodes, plus the
//! pending-edit records queued on internal nodes.
//!
//! Grounded on `examples/original_source/src/libbruce/src/nodes.h` and
//! `internal_node.h`, translated into a tagged-variant shape per the
//! teacher's preference for exhaustive `match` over open polymorphism.

use crate::bytes::Bytes;

/// Opaque 64-bit block identifier. `0` is reserved to mean "no child".
pub type NodeId = u64;

/// Sentinel id meaning "absent" (no child, no overflow chain).
pub const NO_ID: NodeId = 0;

/// Number of keys/branches/values in a single node; bounded by block size.
pub type KeyCount = u16;

/// Count of leaf-level items reachable beneath a node.
pub type ItemCount = u32;

/// A pointer to an overflow chain's first node: either unloaded (known
/// only by id) or dirtied (an owned node produced by a mutation, not yet
/// assigned a fresh id). Mirrors [`ChildRef`]'s branch/child duality.
#[derive(Debug, Clone)]
pub enum OverflowLink {
    None,
    Id(NodeId),
    Owned(Box<OverflowNode>),
}

impl Default for OverflowLink {
    fn default() -> Self {
        Self::None
    }
}

/// How many values an overflow chain holds in total, and where its first
/// node lives. `count` is zero and `link` is `None` when there is no chain.
#[derive(Debug, Clone, Default)]
pub struct OverflowTail {
    pub count: ItemCount,
    pub link: OverflowLink,
}

impl OverflowTail {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.link, OverflowLink::None)
    }

    pub fn from_id(count: ItemCount, id: NodeId) -> Self {
        if id == NO_ID {
            Self::none()
        } else {
            Self {
                count,
                link: OverflowLink::Id(id),
            }
        }
    }

    pub fn from_owned(count: ItemCount, node: OverflowNode) -> Self {
        Self {
            count,
            link: OverflowLink::Owned(Box::new(node)),
        }
    }

    pub fn id(&self) -> Option<NodeId> {
        match &self.link {
            OverflowLink::Id(id) => Some(*id),
            _ => None,
        }
    }
}

/// A leaf node: ordered (key, value) pairs, plus an optional overflow tail
/// holding extra values for the leaf's terminal (highest) key.
#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    pub pairs: Vec<(Bytes, Bytes)>,
    pub overflow: OverflowTail,
}

impl LeafNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pair_count(&self) -> KeyCount {
        self.pairs.len() as KeyCount
    }

    /// The smallest key in this leaf, or empty if the leaf has no pairs yet.
    pub fn min_key(&self) -> Bytes {
        self.pairs
            .first()
            .map(|(k, _)| k.clone())
            .unwrap_or_else(Bytes::empty)
    }

    /// The leaf's terminal (highest) key, shared by any overflowed values.
    pub fn terminal_key(&self) -> Option<Bytes> {
        self.pairs.last().map(|(k, _)| k.clone())
    }

    pub fn item_count(&self) -> ItemCount {
        self.pairs.len() as ItemCount + self.overflow.count
    }
}

/// An overflow node: a run of values, all sharing the same key as the leaf
/// (or overflow predecessor) that chains to it. Stores no key of its own.
#[derive(Debug, Clone, Default)]
pub struct OverflowNode {
    pub values: Vec<Bytes>,
    pub next: OverflowTail,
}

impl OverflowNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value_count(&self) -> KeyCount {
        self.values.len() as KeyCount
    }

    pub fn item_count(&self) -> ItemCount {
        self.values.len() as ItemCount + self.next.count
    }
}

/// During mutation a branch's child is either unloaded (known only by id)
/// or dirtied (an owned in-memory node produced by a prior edit).
#[derive(Debug, Clone)]
pub enum ChildRef {
    Id(NodeId),
    Owned(Box<Node>),
}

impl ChildRef {
    pub fn is_owned(&self) -> bool {
        matches!(self, ChildRef::Owned(_))
    }

    pub fn id(&self) -> Option<NodeId> {
        match self {
            ChildRef::Id(id) => Some(*id),
            ChildRef::Owned(_) => None,
        }
    }
}

/// One outgoing edge of an internal node: (minKey, child, itemCount).
///
/// Branch 0's `min_key` is always empty by convention (-infinity) and is
/// never serialized.
#[derive(Debug, Clone)]
pub struct Branch {
    pub min_key: Bytes,
    pub child: ChildRef,
    pub item_count: ItemCount,
}

impl Branch {
    pub fn new_id(min_key: Bytes, id: NodeId, item_count: ItemCount) -> Self {
        Self {
            min_key,
            child: ChildRef::Id(id),
            item_count,
        }
    }

    pub fn new_owned(min_key: Bytes, node: Node, item_count: ItemCount) -> Self {
        Self {
            min_key,
            child: ChildRef::Owned(Box::new(node)),
            item_count,
        }
    }
}

/// The kind of a queued edit on an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Insert = 0,
    Upsert = 1,
    RemoveKey = 2,
    RemoveKV = 3,
}

impl EditKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Insert),
            1 => Some(Self::Upsert),
            2 => Some(Self::RemoveKey),
            3 => Some(Self::RemoveKV),
            _ => None,
        }
    }

    /// `RemoveKey` is the only edit kind with no associated value on the wire.
    pub fn carries_value(self) -> bool {
        !matches!(self, Self::RemoveKey)
    }
}

/// One deferred insert/remove/upsert queued on an internal node.
#[derive(Debug, Clone)]
pub struct PendingEdit {
    pub kind: EditKind,
    pub key: Bytes,
    /// `None` only for `RemoveKey`.
    pub value: Option<Bytes>,
}

impl PendingEdit {
    pub fn insert(key: Bytes, value: Bytes) -> Self {
        Self {
            kind: EditKind::Insert,
            key,
            value: Some(value),
        }
    }

    pub fn upsert(key: Bytes, value: Bytes) -> Self {
        Self {
            kind: EditKind::Upsert,
            key,
            value: Some(value),
        }
    }

    pub fn remove_key(key: Bytes) -> Self {
        Self {
            kind: EditKind::RemoveKey,
            key,
            value: None,
        }
    }

    pub fn remove_kv(key: Bytes, value: Bytes) -> Self {
        Self {
            kind: EditKind::RemoveKV,
            key,
            value: Some(value),
        }
    }

    /// Encoded byte size of this edit's key and (optional) value.
    pub fn payload_len(&self) -> usize {
        self.key.len() + self.value.as_ref().map_or(0, |v| v.len())
    }
}

/// An internal node: branches plus a lazily-applied queue of pending edits.
#[derive(Debug, Clone, Default)]
pub struct InternalNode {
    pub branches: Vec<Branch>,
    pub edits: Vec<PendingEdit>,
}

impl InternalNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch_count(&self) -> KeyCount {
        self.branches.len() as KeyCount
    }

    pub fn min_key(&self) -> Bytes {
        Bytes::empty()
    }

    pub fn item_count(&self) -> ItemCount {
        self.branches.iter().map(|b| b.item_count).sum()
    }

    pub fn edit_queue_payload_len(&self) -> usize {
        self.edits.iter().map(|e| 1 + e.payload_len()).sum()
    }
}

/// A node kind, tagged so the tree can exhaustively match on it rather than
/// relying on dynamic dispatch.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
    Overflow(OverflowNode),
}

/// Wire tag for each node kind (the page's leading `flags` byte).
pub const FLAG_LEAF: u8 = 0;
pub const FLAG_INTERNAL: u8 = 1;
pub const FLAG_OVERFLOW: u8 = 2;

impl Node {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Leaf(_) => "leaf",
            Node::Internal(_) => "internal",
            Node::Overflow(_) => "overflow",
        }
    }

    pub fn flag(&self) -> u8 {
        match self {
            Node::Leaf(_) => FLAG_LEAF,
            Node::Internal(_) => FLAG_INTERNAL,
            Node::Overflow(_) => FLAG_OVERFLOW,
        }
    }

    pub fn item_count(&self) -> ItemCount {
        match self {
            Node::Leaf(l) => l.item_count(),
            Node::Internal(i) => i.item_count(),
            Node::Overflow(o) => o.item_count(),
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode> {
        match self {
            Node::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode> {
        match self {
            Node::Internal(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_overflow(&self) -> Option<&OverflowNode> {
        match self {
            Node::Overflow(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_overflow_mut(&mut self) -> Option<&mut OverflowNode> {
        match self {
            Node::Overflow(o) => Some(o),
            _ => None,
        }
    }
}
