//! Bit-exact page parser and serializer.
//!
//! Field order and widths are grounded on
//! `examples/original_source/src/libbruce/src/serializing.cpp`
//! (`NodeParser`, `SerializeLeafNode`, `SerializeInternalNode`,
//! `SerializeOverflowNode`), which this module mirrors exactly since the
//! wire format must be bit-for-bit compatible with the design it was
//! distilled from.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::bytes::Bytes;
use crate::error::{Result, TreeError};
use crate::node::{
    Branch, EditKind, InternalNode, LeafNode, Node, OverflowNode, OverflowTail, PendingEdit,
    FLAG_INTERNAL, FLAG_LEAF, FLAG_OVERFLOW,
};

/// The caller-supplied comparison and sizing functions the codec and the
/// rest of the untyped core depend on. The tree never interprets key or
/// value bytes itself; every ordering and width decision routes through
/// here.
#[derive(Clone)]
pub struct TreeFunctions {
    pub key_compare: Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>,
    pub value_compare: Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>,
    /// Given the bytes starting at a key's position, returns its length.
    pub key_size: Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>,
    /// Given the bytes starting at a value's position, returns its length.
    pub value_size: Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>,
}

impl TreeFunctions {
    pub fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.key_compare)(a, b)
    }

    pub fn value_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.value_compare)(a, b)
    }
}

/// A convenience [`TreeFunctions`] for fixed-width byte keys/values,
/// compared lexicographically. Useful for tests and for callers whose
/// marshaled representation is already fixed-width.
pub fn fixed_width_functions(key_width: u32, value_width: u32) -> TreeFunctions {
    TreeFunctions {
        key_compare: Arc::new(|a, b| a.cmp(b)),
        value_compare: Arc::new(|a, b| a.cmp(b)),
        key_size: Arc::new(move |_| key_width),
        value_size: Arc::new(move |_| value_width),
    }
}

/// Tracks an offset into a page while reading fixed-width and
/// caller-sized fields, turning out-of-bounds reads into `TruncatedPage`.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
    node_kind: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], node_kind: &'static str) -> Self {
        Self {
            data,
            offset: 0,
            node_kind,
        }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or(TreeError::TruncatedPage(self.node_kind))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a key/value whose length is discovered via a caller-supplied
    /// `sizeOf` function applied to the remaining bytes.
    fn sized(&mut self, size_of: &dyn Fn(&[u8]) -> u32) -> Result<Bytes> {
        let len = size_of(self.remaining()) as usize;
        let slice = self.take(len)?;
        Ok(Bytes::copy_from(slice))
    }

    fn overflow_tail(&mut self) -> Result<OverflowTail> {
        let count = self.u32_le()?;
        let id = self.u64_le()?;
        Ok(OverflowTail::from_id(count, id))
    }

    fn finish(self) -> Result<()> {
        if self.offset != self.data.len() {
            return Err(TreeError::TrailingBytes(
                self.node_kind,
                self.data.len() - self.offset,
            ));
        }
        Ok(())
    }
}

/// A growable byte buffer used while serializing a node.
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64_le(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    fn overflow_tail(&mut self, tail: &OverflowTail) {
        self.u32_le(tail.count);
        let id = match &tail.link {
            crate::node::OverflowLink::None => 0,
            crate::node::OverflowLink::Id(id) => *id,
            crate::node::OverflowLink::Owned(_) => {
                panic!("serialize_node requires every overflow tail to carry a resolved id")
            }
        };
        self.u64_le(id);
    }

    fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Parses a page's leading `flags` byte and `keyCount` header, then
/// dispatches to the kind-specific parser.
pub fn parse_node(data: &[u8], fns: &TreeFunctions) -> Result<Node> {
    if data.is_empty() {
        return Err(TreeError::TruncatedPage("header"));
    }
    let flags = data[0];
    match flags {
        FLAG_LEAF => parse_leaf(data, fns).map(Node::Leaf),
        FLAG_INTERNAL => parse_internal(data, fns).map(Node::Internal),
        FLAG_OVERFLOW => parse_overflow(data, fns).map(Node::Overflow),
        other => Err(TreeError::UnknownNodeType(other)),
    }
}

fn parse_leaf(data: &[u8], fns: &TreeFunctions) -> Result<LeafNode> {
    let mut r = Reader::new(data, "leaf");
    let _flags = r.u8()?;
    let key_count = r.u16_le()?;

    let mut keys = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        keys.push(r.sized(fns.key_size.as_ref())?);
    }
    let mut values = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        values.push(r.sized(fns.value_size.as_ref())?);
    }
    let overflow = r.overflow_tail()?;
    r.finish()?;

    let pairs = keys.into_iter().zip(values).collect();
    Ok(LeafNode { pairs, overflow })
}

fn parse_overflow(data: &[u8], fns: &TreeFunctions) -> Result<OverflowNode> {
    let mut r = Reader::new(data, "overflow");
    let _flags = r.u8()?;
    let value_count = r.u16_le()?;

    let mut values = Vec::with_capacity(value_count as usize);
    for _ in 0..value_count {
        values.push(r.sized(fns.value_size.as_ref())?);
    }
    let next = r.overflow_tail()?;
    r.finish()?;

    Ok(OverflowNode { values, next })
}

fn parse_internal(data: &[u8], fns: &TreeFunctions) -> Result<InternalNode> {
    let mut r = Reader::new(data, "internal");
    let _flags = r.u8()?;
    let key_count = r.u16_le()?;
    let edit_count = r.u16_le()?;

    let mut min_keys = Vec::with_capacity(key_count as usize);
    min_keys.push(Bytes::empty());
    for _ in 1..key_count {
        min_keys.push(r.sized(fns.key_size.as_ref())?);
    }

    let mut ids = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        ids.push(r.u64_le()?);
    }
    let mut item_counts = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        item_counts.push(r.u32_le()?);
    }

    let branches = min_keys
        .into_iter()
        .zip(ids)
        .zip(item_counts)
        .map(|((min_key, id), item_count)| Branch::new_id(min_key, id, item_count))
        .collect();

    let mut edit_kinds = Vec::with_capacity(edit_count as usize);
    for _ in 0..edit_count {
        let byte = r.u8()?;
        let kind = EditKind::from_byte(byte).ok_or(TreeError::UnknownNodeType(byte))?;
        edit_kinds.push(kind);
    }
    let mut edit_keys = Vec::with_capacity(edit_count as usize);
    for _ in 0..edit_count {
        edit_keys.push(r.sized(fns.key_size.as_ref())?);
    }
    let mut edits = Vec::with_capacity(edit_count as usize);
    for (kind, key) in edit_kinds.into_iter().zip(edit_keys) {
        let value = if kind.carries_value() {
            Some(r.sized(fns.value_size.as_ref())?)
        } else {
            None
        };
        edits.push(PendingEdit { kind, key, value });
    }
    r.finish()?;

    Ok(InternalNode { branches, edits })
}

/// Serializes a node into a fresh page buffer. Callers are responsible for
/// checking the result against `maxBlockSize` before submitting it to a
/// block store.
pub fn serialize_node(node: &Node) -> Vec<u8> {
    match node {
        Node::Leaf(l) => serialize_leaf(l),
        Node::Internal(i) => serialize_internal(i),
        Node::Overflow(o) => serialize_overflow(o),
    }
}

fn serialize_leaf(leaf: &LeafNode) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(FLAG_LEAF);
    w.u16_le(leaf.pair_count());
    for (k, _) in &leaf.pairs {
        w.bytes(k.as_slice());
    }
    for (_, v) in &leaf.pairs {
        w.bytes(v.as_slice());
    }
    w.overflow_tail(&leaf.overflow);
    w.into_vec()
}

fn serialize_overflow(overflow: &OverflowNode) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(FLAG_OVERFLOW);
    w.u16_le(overflow.value_count());
    for v in &overflow.values {
        w.bytes(v.as_slice());
    }
    w.overflow_tail(&overflow.next);
    w.into_vec()
}

fn serialize_internal(internal: &InternalNode) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(FLAG_INTERNAL);
    w.u16_le(internal.branch_count());
    w.u16_le(internal.edits.len() as u16);

    for branch in internal.branches.iter().skip(1) {
        w.bytes(branch.min_key.as_slice());
    }
    for branch in &internal.branches {
        let id = branch
            .child
            .id()
            .expect("serialize_internal requires every branch to carry a resolved id");
        w.u64_le(id);
    }
    for branch in &internal.branches {
        w.u32_le(branch.item_count);
    }

    for edit in &internal.edits {
        w.u8(edit.kind as u8);
    }
    for edit in &internal.edits {
        w.bytes(edit.key.as_slice());
    }
    for edit in &internal.edits {
        if let Some(value) = &edit.value {
            w.bytes(value.as_slice());
        }
    }

    w.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fns() -> TreeFunctions {
        fixed_width_functions(4, 4)
    }

    fn key(n: u32) -> Bytes {
        Bytes::from_vec(n.to_le_bytes().to_vec())
    }

    #[test]
    fn leaf_round_trips() {
        let leaf = LeafNode {
            pairs: vec![(key(1), key(10)), (key(2), key(20))],
            overflow: OverflowTail::none(),
        };
        let page = serialize_leaf(&leaf);
        let parsed = parse_node(&page, &fns()).unwrap();
        let parsed = parsed.as_leaf().unwrap();
        assert_eq!(parsed.pairs.len(), 2);
        assert_eq!(parsed.pairs[0].0.as_slice(), key(1).as_slice());
        assert_eq!(parsed.pairs[1].1.as_slice(), key(20).as_slice());
    }

    #[test]
    fn leaf_with_overflow_tail_round_trips() {
        let leaf = LeafNode {
            pairs: vec![(key(5), key(50))],
            overflow: OverflowTail::from_id(7, 42),
        };
        let page = serialize_leaf(&leaf);
        let parsed = parse_node(&page, &fns()).unwrap().as_leaf().unwrap().clone();
        assert_eq!(parsed.overflow.count, 7);
        assert_eq!(parsed.overflow.id(), Some(42));
    }

    #[test]
    fn overflow_round_trips() {
        let overflow = OverflowNode {
            values: vec![key(1), key(2), key(3)],
            next: OverflowTail::from_id(2, 9),
        };
        let page = serialize_overflow(&overflow);
        let parsed = parse_node(&page, &fns()).unwrap();
        let parsed = parsed.as_overflow().unwrap();
        assert_eq!(parsed.values.len(), 3);
        assert_eq!(parsed.next.id(), Some(9));
    }

    #[test]
    fn internal_round_trips_with_edit_queue() {
        let internal = InternalNode {
            branches: vec![
                Branch::new_id(Bytes::empty(), 1, 10),
                Branch::new_id(key(100), 2, 20),
                Branch::new_id(key(200), 3, 5),
            ],
            edits: vec![
                PendingEdit::insert(key(150), key(1)),
                PendingEdit::remove_key(key(151)),
                PendingEdit::remove_kv(key(152), key(2)),
            ],
        };
        let page = serialize_internal(&internal);
        let parsed = parse_node(&page, &fns()).unwrap();
        let parsed = parsed.as_internal().unwrap();
        assert_eq!(parsed.branches.len(), 3);
        assert!(parsed.branches[0].min_key.is_empty());
        assert_eq!(parsed.branches[1].min_key.as_slice(), key(100).as_slice());
        assert_eq!(parsed.branches[2].child.id(), Some(3));
        assert_eq!(parsed.edits.len(), 3);
        assert_eq!(parsed.edits[1].kind, EditKind::RemoveKey);
        assert!(parsed.edits[1].value.is_none());
        assert_eq!(parsed.edits[2].kind, EditKind::RemoveKV);
        assert_eq!(parsed.edits[2].value.as_ref().unwrap().as_slice(), key(2).as_slice());
    }

    #[test]
    fn trailing_bytes_is_rejected() {
        let leaf = LeafNode {
            pairs: vec![(key(1), key(10))],
            overflow: OverflowTail::none(),
        };
        let mut page = serialize_leaf(&leaf);
        page.push(0xFF);
        let err = parse_node(&page, &fns()).unwrap_err();
        assert!(matches!(err, TreeError::TrailingBytes("leaf", 1)));
    }

    #[test]
    fn truncated_page_is_rejected() {
        let leaf = LeafNode {
            pairs: vec![(key(1), key(10))],
            overflow: OverflowTail::none(),
        };
        let page = serialize_leaf(&leaf);
        let truncated = &page[..page.len() - 3];
        let err = parse_node(truncated, &fns()).unwrap_err();
        assert!(matches!(err, TreeError::TruncatedPage("leaf")));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let page = vec![0xFF, 0x00, 0x00];
        let err = parse_node(&page, &fns()).unwrap_err();
        assert!(matches!(err, TreeError::UnknownNodeType(0xFF)));
    }
}
