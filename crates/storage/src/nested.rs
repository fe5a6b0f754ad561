//! Field access through nested trees
//!
//! Hash and set values hold the root of a second tree keyed by field (or
//! member). A field write is two nested scopes over one transaction:
//!
//! 1. [`OuterValueWrite::open`] looks the key up in the outer tree.
//! 2. [`NestedFieldWrite::open`] opens the value's nested tree at its current
//!    root and looks the field up.
//! 3. [`NestedFieldWrite::finish`] applies the field change, then writes the
//!    nested tree's (possibly new) root and size back into the outer value.
//! 4. [`OuterValueWrite::finish`] applies the outer value change.
//!
//! Each `finish` consumes its scope, so the inner change can only be applied
//! while the outer scope is still open and before the outer change.

use crate::blob;
use crate::btree::{self, KeyValueLocation, TreeRoot, VirtualSuperblock};
use crate::error::{StoreError, StoreResult};
use crate::txn::Transaction;
use crate::value::{NestedRoot, NestedValueSizer, PackedValue, RedisType, RedisValueSizer, ValuePayload};
use bytes::Bytes;

/// Pending write of one outer-tree key
pub struct OuterValueWrite<'a, R: TreeRoot> {
    txn: &'a mut Transaction,
    root: &'a mut R,
    location: KeyValueLocation,
    value: Option<PackedValue>,
}

impl<'a, R: TreeRoot> OuterValueWrite<'a, R> {
    /// Look `key` up for write; a value expired at `now` is freed and treated
    /// as absent
    pub fn open(txn: &'a mut Transaction, root: &'a mut R, key: &[u8], now: u32) -> StoreResult<Self> {
        let mut location = btree::find_for_write(txn, &*root, key)?;
        let mut value = location
            .value()
            .map(|data| PackedValue::from_bytes(data))
            .transpose()?;
        if let Some(expired) = value.take_if(|v| v.is_expired(now)) {
            free_value(txn, &expired)?;
            location.delete();
        }
        Ok(Self {
            txn,
            root,
            location,
            value,
        })
    }

    pub fn value(&self) -> Option<&PackedValue> {
        self.value.as_ref()
    }

    pub fn value_mut(&mut self) -> Option<&mut PackedValue> {
        self.value.as_mut()
    }

    pub fn txn(&mut self) -> &mut Transaction {
        &mut *self.txn
    }

    /// Nested root of an existing value of type `kind`
    pub fn nested_root(&self, kind: RedisType) -> StoreResult<Option<NestedRoot>> {
        self.value.as_ref().map(|v| v.nested_root(kind)).transpose()
    }

    /// Nested root of the value, installing an empty `kind` value if absent
    pub fn open_nested(&mut self, kind: RedisType) -> StoreResult<NestedRoot> {
        match &self.value {
            Some(value) => value.nested_root(kind),
            None => {
                self.value = Some(PackedValue::new_nested(kind));
                Ok(NestedRoot::EMPTY)
            }
        }
    }

    pub fn set_nested_root(&mut self, root: NestedRoot) -> StoreResult<()> {
        match self.value.as_mut() {
            Some(value) => value.set_nested_root(root),
            None => Err(StoreError::corrupt("nested root update without a value")),
        }
    }

    /// Replace the value, freeing whatever the old one owned
    pub fn replace(&mut self, value: PackedValue) -> StoreResult<()> {
        if let Some(old) = self.value.take() {
            free_value(self.txn, &old)?;
        }
        self.value = Some(value);
        Ok(())
    }

    /// Delete the value and everything it owns; returns whether it existed
    pub fn delete(&mut self) -> StoreResult<bool> {
        match self.value.take() {
            Some(old) => {
                free_value(self.txn, &old)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply the outer change
    pub fn finish(mut self) -> StoreResult<()> {
        match self.value {
            Some(value) => self.location.set_value(value.to_bytes()),
            None => self.location.delete(),
        }
        let sizer = RedisValueSizer::new(self.txn.block_size());
        btree::apply_change(self.txn, self.root, &sizer, self.location)
    }
}

/// Pending write of one field inside a hash or set
pub struct NestedFieldWrite<'o, 'a, R: TreeRoot> {
    outer: &'o mut OuterValueWrite<'a, R>,
    inner_root: VirtualSuperblock,
    sub_size: u32,
    location: KeyValueLocation,
}

impl<'o, 'a, R: TreeRoot> NestedFieldWrite<'o, 'a, R> {
    /// Open `field` in the nested tree of the outer value, creating an empty
    /// `kind` value if the key is absent
    pub fn open(outer: &'o mut OuterValueWrite<'a, R>, kind: RedisType, field: &[u8]) -> StoreResult<Self> {
        let root = outer.open_nested(kind)?;
        let inner_root = VirtualSuperblock::new(root.root_block_id);
        let location = btree::find_for_write(outer.txn, &inner_root, field)?;
        Ok(Self {
            outer,
            inner_root,
            sub_size: root.sub_size,
            location,
        })
    }

    pub fn exists(&self) -> bool {
        self.location.value().is_some()
    }

    /// Field content of a hash field
    pub fn read_blob(&self) -> StoreResult<Option<Bytes>> {
        match self.location.value() {
            Some(reference) => blob::read(&*self.outer.txn, reference).map(Some),
            None => Ok(None),
        }
    }

    /// Store `content` as the field's value
    pub fn set_blob(&mut self, content: &[u8]) -> StoreResult<()> {
        self.free_current()?;
        let reference = blob::write(self.outer.txn, content)?;
        self.location.set_value(Bytes::from(reference));
        Ok(())
    }

    /// Mark a set member as present
    pub fn set_marker(&mut self) -> StoreResult<()> {
        self.free_current()?;
        self.location.set_value(Bytes::new());
        Ok(())
    }

    pub fn delete(&mut self) -> StoreResult<()> {
        self.free_current()?;
        self.location.delete();
        Ok(())
    }

    fn free_current(&mut self) -> StoreResult<()> {
        match self.location.value() {
            Some(reference) if !reference.is_empty() => {
                let reference = reference.clone();
                blob::clear(self.outer.txn, &reference)
            }
            _ => Ok(()),
        }
    }

    /// Apply the field change and write the nested root back into the outer
    /// value; returns the nested tree's new root
    pub fn finish(mut self) -> StoreResult<NestedRoot> {
        let existed = self.location.existed();
        let exists = self.location.value().is_some();
        match (existed, exists) {
            (false, true) => self.sub_size += 1,
            (true, false) => self.sub_size = self.sub_size.saturating_sub(1),
            _ => {}
        }
        let sizer = NestedValueSizer::new(self.outer.txn.block_size());
        btree::apply_change(self.outer.txn, &mut self.inner_root, &sizer, self.location)?;

        let root = NestedRoot {
            root_block_id: self.inner_root.root_block_id(),
            sub_size: if self.inner_root.root_block_id().is_null() {
                0
            } else {
                self.sub_size
            },
        };
        self.outer.set_nested_root(root)?;
        Ok(root)
    }
}

/// Free every block a value owns (blob chunks or the whole nested tree)
pub fn free_value(txn: &mut Transaction, value: &PackedValue) -> StoreResult<()> {
    match value.decode()? {
        ValuePayload::String(reference) => blob::clear(txn, reference),
        ValuePayload::Hash(root) | ValuePayload::Set(root) => {
            let mut tree = VirtualSuperblock::new(root.root_block_id);
            btree::clear(txn, &mut tree, |txn, field_value| {
                if field_value.is_empty() {
                    Ok(())
                } else {
                    blob::clear(txn, field_value)
                }
            })
        }
    }
}

/// Current value of `key`, hiding values expired at `now`
pub fn read_value(txn: &Transaction, root: &impl TreeRoot, key: &[u8], now: u32) -> StoreResult<Option<PackedValue>> {
    let Some(data) = btree::find_for_read(txn, root, key)? else {
        return Ok(None);
    };
    let value = PackedValue::from_bytes(&data)?;
    if value.is_expired(now) {
        return Ok(None);
    }
    Ok(Some(value))
}

/// Nested root of `key`; `None` if the key is absent, `WrongType` if it holds
/// another type
pub fn read_nested_root(
    txn: &Transaction,
    root: &impl TreeRoot,
    key: &[u8],
    kind: RedisType,
    now: u32,
) -> StoreResult<Option<NestedRoot>> {
    read_value(txn, root, key, now)?
        .map(|value| value.nested_root(kind))
        .transpose()
}

/// Read-only field lookup
pub fn get_field(
    txn: &Transaction,
    root: &impl TreeRoot,
    key: &[u8],
    field: &[u8],
    kind: RedisType,
    now: u32,
) -> StoreResult<Option<Bytes>> {
    let Some(nested) = read_nested_root(txn, root, key, kind, now)? else {
        return Ok(None);
    };
    let inner = VirtualSuperblock::new(nested.root_block_id);
    btree::find_for_read(txn, &inner, field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::tests::test_proxy;
    use tempfile::TempDir;

    fn hset(txn: &mut Transaction, root: &mut VirtualSuperblock, key: &[u8], field: &[u8], value: &[u8]) -> NestedRoot {
        let mut outer = OuterValueWrite::open(txn, root, key, 0).unwrap();
        let mut op = NestedFieldWrite::open(&mut outer, RedisType::Hash, field).unwrap();
        op.set_blob(value).unwrap();
        let nested = op.finish().unwrap();
        outer.finish().unwrap();
        nested
    }

    fn hdel(txn: &mut Transaction, root: &mut VirtualSuperblock, key: &[u8], field: &[u8]) -> NestedRoot {
        let mut outer = OuterValueWrite::open(txn, root, key, 0).unwrap();
        let mut op = NestedFieldWrite::open(&mut outer, RedisType::Hash, field).unwrap();
        op.delete().unwrap();
        let nested = op.finish().unwrap();
        outer.finish().unwrap();
        nested
    }

    fn field(txn: &Transaction, root: &VirtualSuperblock, key: &[u8], f: &[u8]) -> Option<Bytes> {
        get_field(txn, root, key, f, RedisType::Hash, 0)
            .unwrap()
            .map(|reference| blob::read(txn, &reference).unwrap())
    }

    #[test]
    fn test_field_write_propagates_root() {
        let dir = TempDir::new().unwrap();
        let mut txn = Transaction::begin(test_proxy(&dir, 256), 1);
        let mut root = VirtualSuperblock::empty();

        let nested = hset(&mut txn, &mut root, b"user:1", b"name", b"Alice");
        assert!(!nested.is_empty());
        assert_eq!(nested.sub_size, 1);
        let stored = read_nested_root(&txn, &root, b"user:1", RedisType::Hash, 0)
            .unwrap()
            .unwrap();
        assert_eq!(stored, nested);
        assert_eq!(field(&txn, &root, b"user:1", b"name").unwrap(), "Alice");

        let nested = hdel(&mut txn, &mut root, b"user:1", b"name");
        assert!(nested.is_empty());
        let stored = read_nested_root(&txn, &root, b"user:1", RedisType::Hash, 0)
            .unwrap()
            .unwrap();
        assert_eq!(stored, NestedRoot::EMPTY);
    }

    #[test]
    fn test_wrong_type() {
        let dir = TempDir::new().unwrap();
        let mut txn = Transaction::begin(test_proxy(&dir, 256), 1);
        let mut root = VirtualSuperblock::empty();

        let mut outer = OuterValueWrite::open(&mut txn, &mut root, b"s", 0).unwrap();
        let reference = blob::write(outer.txn(), b"plain").unwrap();
        outer.replace(PackedValue::new_string(&reference)).unwrap();
        outer.finish().unwrap();

        let mut outer = OuterValueWrite::open(&mut txn, &mut root, b"s", 0).unwrap();
        assert!(matches!(
            NestedFieldWrite::open(&mut outer, RedisType::Hash, b"f"),
            Err(StoreError::WrongType)
        ));
        drop(outer);
        assert!(matches!(
            get_field(&txn, &root, b"s", b"f", RedisType::Hash, 0),
            Err(StoreError::WrongType)
        ));
        assert_eq!(get_field(&txn, &root, b"nope", b"f", RedisType::Hash, 0).unwrap(), None);
    }

    #[test]
    fn test_expired_value_is_replaced() {
        let dir = TempDir::new().unwrap();
        let mut txn = Transaction::begin(test_proxy(&dir, 256), 1);
        let mut root = VirtualSuperblock::empty();
        hset(&mut txn, &mut root, b"h", b"a", b"1");

        let mut outer = OuterValueWrite::open(&mut txn, &mut root, b"h", 0).unwrap();
        outer.value_mut().unwrap().set_expiration(10);
        outer.finish().unwrap();
        assert!(read_value(&txn, &root, b"h", 9).unwrap().is_some());
        assert!(read_value(&txn, &root, b"h", 10).unwrap().is_none());

        let mut outer = OuterValueWrite::open(&mut txn, &mut root, b"h", 11).unwrap();
        assert!(outer.value().is_none());
        let op = NestedFieldWrite::open(&mut outer, RedisType::Set, b"m").unwrap();
        assert!(!op.exists());
        drop(op);
        outer.finish().unwrap();
        assert!(read_nested_root(&txn, &root, b"h", RedisType::Set, 11)
            .unwrap()
            .unwrap()
            .is_empty());
    }
}
