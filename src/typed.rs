//! Typed façade over the byte-oriented core, generic over caller-chosen
//! key/value types via marshal/unmarshal functions.
//!
//! Grounded on `examples/original_source`'s `query_tree<K,V>`/`edit_tree<K,V>`
//! templates, translated from C++ template parameters into runtime
//! `Arc<dyn Fn>` closures per the teacher's own preference for trait-object
//! pluggability over generic monomorphization at its storage boundary.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::TreeFunctions;
use crate::config::TreeLimits;
use crate::cursor::Cursor;
use crate::edit::{EditTree, Mutation};
use crate::error::Result;
use crate::node::{ItemCount, NodeId};
use crate::query::QueryTree;
use crate::store::BlockStore;
use crate::bytes::Bytes;

/// Marshaling functions between a typed key/value pair and the untyped
/// byte representation the core tree stores. Ordering and sizing for those
/// bytes still route through a [`TreeFunctions`] built to match.
pub struct TypedCodec<K, V> {
    pub marshal_key: Arc<dyn Fn(&K) -> Bytes + Send + Sync>,
    pub unmarshal_key: Arc<dyn Fn(&[u8]) -> K + Send + Sync>,
    pub marshal_value: Arc<dyn Fn(&V) -> Bytes + Send + Sync>,
    pub unmarshal_value: Arc<dyn Fn(&[u8]) -> V + Send + Sync>,
}

impl<K, V> Clone for TypedCodec<K, V> {
    fn clone(&self) -> Self {
        Self {
            marshal_key: self.marshal_key.clone(),
            unmarshal_key: self.unmarshal_key.clone(),
            marshal_value: self.marshal_value.clone(),
            unmarshal_value: self.unmarshal_value.clone(),
        }
    }
}

/// A [`QueryTree`] that marshals/unmarshals `K`/`V` at its boundary.
pub struct TypedQueryTree<K, V> {
    inner: QueryTree,
    codec: TypedCodec<K, V>,
}

impl<K, V> TypedQueryTree<K, V> {
    pub fn new(
        store: Arc<dyn BlockStore>,
        fns: TreeFunctions,
        codec: TypedCodec<K, V>,
        root_id: Option<NodeId>,
    ) -> Self {
        Self {
            inner: QueryTree::new(store, fns, root_id),
            codec,
        }
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let key_bytes = (self.codec.marshal_key)(key);
        let found = self.inner.get(key_bytes.as_slice())?;
        Ok(found.map(|v| (self.codec.unmarshal_value)(v.as_slice())))
    }

    pub fn find(&self, key: &K) -> Result<TypedCursor<K, V>> {
        let key_bytes = (self.codec.marshal_key)(key);
        let cursor = self.inner.find(key_bytes.as_slice())?;
        Ok(TypedCursor {
            inner: cursor,
            codec: self.codec.clone(),
        })
    }

    pub fn seek(&self, rank: u64) -> Result<TypedCursor<K, V>> {
        let cursor = self.inner.seek(rank)?;
        Ok(TypedCursor {
            inner: cursor,
            codec: self.codec.clone(),
        })
    }

    pub fn cursor(&self) -> Result<TypedCursor<K, V>> {
        let cursor = self.inner.cursor()?;
        Ok(TypedCursor {
            inner: cursor,
            codec: self.codec.clone(),
        })
    }

    pub fn item_count(&self) -> Result<ItemCount> {
        self.inner.item_count()
    }
}

/// A [`Cursor`] that unmarshals its current item into `K`/`V` on demand.
pub struct TypedCursor<K, V> {
    inner: Cursor,
    codec: TypedCodec<K, V>,
}

impl<K, V> TypedCursor<K, V> {
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub fn rank(&self) -> u64 {
        self.inner.rank()
    }

    pub fn key(&self) -> Option<K> {
        self.inner.key().map(|b| (self.codec.unmarshal_key)(b.as_slice()))
    }

    pub fn value(&self) -> Option<V> {
        self.inner.value().map(|b| (self.codec.unmarshal_value)(b.as_slice()))
    }

    pub fn next(&mut self) -> Result<()> {
        self.inner.next()
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.inner.skip(n)
    }
}

/// An [`EditTree`] that marshals typed keys/values before handing them to
/// the byte-oriented mutator.
pub struct TypedEditTree<K, V> {
    inner: EditTree,
    codec: TypedCodec<K, V>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> TypedEditTree<K, V> {
    pub fn new(
        store: Arc<dyn BlockStore>,
        fns: TreeFunctions,
        limits: TreeLimits,
        codec: TypedCodec<K, V>,
        root_id: Option<NodeId>,
    ) -> Self {
        Self {
            inner: EditTree::new(store, fns, limits, root_id),
            codec,
            _marker: PhantomData,
        }
    }

    pub fn insert(&mut self, key: &K, value: &V) -> Result<()> {
        self.inner
            .insert((self.codec.marshal_key)(key), (self.codec.marshal_value)(value))
    }

    pub fn upsert(&mut self, key: &K, value: &V) -> Result<()> {
        self.inner
            .upsert((self.codec.marshal_key)(key), (self.codec.marshal_value)(value))
    }

    pub fn remove(&mut self, key: &K) -> Result<()> {
        self.inner.remove((self.codec.marshal_key)(key))
    }

    pub fn remove_kv(&mut self, key: &K, value: &V) -> Result<()> {
        self.inner
            .remove_kv((self.codec.marshal_key)(key), (self.codec.marshal_value)(value))
    }

    pub fn flush(&mut self) -> Result<Mutation> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixed_width_functions;
    use crate::store::MemStore;

    fn u32_codec() -> TypedCodec<u32, u32> {
        TypedCodec {
            marshal_key: Arc::new(|k: &u32| Bytes::from_vec(k.to_le_bytes().to_vec())),
            unmarshal_key: Arc::new(|b: &[u8]| u32::from_le_bytes(b.try_into().unwrap())),
            marshal_value: Arc::new(|v: &u32| Bytes::from_vec(v.to_le_bytes().to_vec())),
            unmarshal_value: Arc::new(|b: &[u8]| u32::from_le_bytes(b.try_into().unwrap())),
        }
    }

    #[test]
    fn typed_round_trip() {
        let store = Arc::new(MemStore::new(1024));
        let mut tree = TypedEditTree::new(
            store.clone(),
            fixed_width_functions(4, 4),
            TreeLimits::new(1024),
            u32_codec(),
            None,
        );
        for i in 0u32..50 {
            tree.insert(&i, &(i * 10)).unwrap();
        }
        let mutation = tree.flush().unwrap();

        let query = TypedQueryTree::new(store, fixed_width_functions(4, 4), u32_codec(), mutation.new_root_id);
        assert_eq!(query.get(&7).unwrap(), Some(70));
        assert_eq!(query.item_count().unwrap(), 50);

        let mut cursor = query.cursor().unwrap();
        let mut seen = 0;
        while cursor.valid() {
            assert_eq!(cursor.value().unwrap(), cursor.key().unwrap() * 10);
            seen += 1;
            cursor.next().unwrap();
        }
        assert_eq!(seen, 50);
    }
}
