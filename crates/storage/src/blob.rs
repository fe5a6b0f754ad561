//! Blob references
//!
//! A blob is byte content addressed by a small reference embedded in a value.
//! The first byte of a reference selects its layout:
//!
//! ```text
//! 0..=250  inline:   tag = length, content follows
//! 0xFE     direct:   total length (u64 LE), then one u64 block id per chunk
//! 0xFF     indirect: total length (u64 LE), then the id of an index block
//!                    holding the chunk ids
//! ```
//!
//! Content up to [`max_inline_len`] bytes is kept inline. Longer content is
//! cut into `block_size` chunks, referenced directly while the reference stays
//! within [`MAX_REF_LEN`] bytes and through one index block beyond that.

use crate::error::{StoreError, StoreResult};
use crate::serializer::BlockId;
use crate::txn::Transaction;
use bytes::{Bytes, BytesMut};

/// Largest reference any blob may use
pub const MAX_REF_LEN: usize = 251;

const MAX_INLINE_TAG: u8 = 250;
const DIRECT_TAG: u8 = 0xFE;
const INDIRECT_TAG: u8 = 0xFF;
const CHUNKED_HEADER_LEN: usize = 1 + 8;
const ID_LEN: usize = 8;

/// Longest content stored inline for a given block size
pub fn max_inline_len(block_size: usize) -> usize {
    (MAX_INLINE_TAG as usize).min(block_size / 16)
}

fn max_direct_chunks() -> usize {
    (MAX_REF_LEN - CHUNKED_HEADER_LEN) / ID_LEN
}

/// Longest content a blob can hold for a given block size
pub fn max_blob_len(block_size: usize) -> usize {
    (block_size / ID_LEN) * block_size
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefHeader {
    Inline { len: usize },
    Direct { len: usize },
    Indirect { len: usize },
}

fn parse_header(reference: &[u8]) -> StoreResult<RefHeader> {
    let tag = *reference
        .first()
        .ok_or_else(|| StoreError::corrupt("empty blob reference"))?;
    match tag {
        0..=MAX_INLINE_TAG => Ok(RefHeader::Inline { len: tag as usize }),
        DIRECT_TAG | INDIRECT_TAG => {
            let len = read_u64(reference, 1)? as usize;
            if tag == DIRECT_TAG {
                Ok(RefHeader::Direct { len })
            } else {
                Ok(RefHeader::Indirect { len })
            }
        }
        other => Err(StoreError::corrupt(format!("bad blob reference tag {}", other))),
    }
}

fn chunk_count(len: usize, block_size: usize) -> usize {
    len.div_ceil(block_size)
}

/// Exact byte size of the reference at the start of `reference`
pub fn ref_size(reference: &[u8], block_size: usize) -> StoreResult<usize> {
    let size = match parse_header(reference)? {
        RefHeader::Inline { len } => 1 + len,
        RefHeader::Direct { len } => CHUNKED_HEADER_LEN + ID_LEN * chunk_count(len, block_size),
        RefHeader::Indirect { .. } => CHUNKED_HEADER_LEN + ID_LEN,
    };
    if size > reference.len() {
        return Err(StoreError::corrupt("truncated blob reference"));
    }
    Ok(size)
}

/// Content length without touching any block
pub fn value_len(reference: &[u8]) -> StoreResult<usize> {
    Ok(match parse_header(reference)? {
        RefHeader::Inline { len } | RefHeader::Direct { len } | RefHeader::Indirect { len } => len,
    })
}

/// Reference to empty content
pub fn empty_ref() -> Vec<u8> {
    vec![0]
}

/// Store `content` and return its reference
pub fn write(txn: &mut Transaction, content: &[u8]) -> StoreResult<Vec<u8>> {
    let block_size = txn.block_size();
    if content.len() <= max_inline_len(block_size) {
        let mut reference = Vec::with_capacity(1 + content.len());
        reference.push(content.len() as u8);
        reference.extend_from_slice(content);
        return Ok(reference);
    }
    if content.len() > max_blob_len(block_size) {
        return Err(StoreError::ValueTooLarge(content.len()));
    }
    let chunks: Vec<BlockId> = content
        .chunks(block_size)
        .map(|piece| {
            let id = txn.alloc();
            txn.write(id, Bytes::copy_from_slice(piece));
            id
        })
        .collect();
    Ok(encode_chunked(txn, content.len(), &chunks))
}

fn encode_chunked(txn: &mut Transaction, len: usize, chunks: &[BlockId]) -> Vec<u8> {
    if chunks.len() <= max_direct_chunks() {
        let mut reference = Vec::with_capacity(CHUNKED_HEADER_LEN + ID_LEN * chunks.len());
        reference.push(DIRECT_TAG);
        reference.extend_from_slice(&(len as u64).to_le_bytes());
        for id in chunks {
            reference.extend_from_slice(&id.0.to_le_bytes());
        }
        reference
    } else {
        let mut index = Vec::with_capacity(ID_LEN * chunks.len());
        for id in chunks {
            index.extend_from_slice(&id.0.to_le_bytes());
        }
        let index_id = txn.alloc();
        txn.write(index_id, index);
        let mut reference = Vec::with_capacity(CHUNKED_HEADER_LEN + ID_LEN);
        reference.push(INDIRECT_TAG);
        reference.extend_from_slice(&(len as u64).to_le_bytes());
        reference.extend_from_slice(&index_id.0.to_le_bytes());
        reference
    }
}

/// Chunk ids of a chunked reference, plus its index block if indirect
fn chunk_ids(txn: &Transaction, reference: &[u8]) -> StoreResult<(Vec<BlockId>, Option<BlockId>)> {
    let block_size = txn.block_size();
    match parse_header(reference)? {
        RefHeader::Inline { .. } => Ok((Vec::new(), None)),
        RefHeader::Direct { len } => {
            let count = chunk_count(len, block_size);
            let ids = (0..count)
                .map(|i| read_u64(reference, CHUNKED_HEADER_LEN + i * ID_LEN).map(BlockId))
                .collect::<StoreResult<Vec<_>>>()?;
            Ok((ids, None))
        }
        RefHeader::Indirect { len } => {
            let index_id = BlockId(read_u64(reference, CHUNKED_HEADER_LEN)?);
            let index = txn.read_required(index_id)?;
            let count = chunk_count(len, block_size);
            let ids = (0..count)
                .map(|i| read_u64(&index, i * ID_LEN).map(BlockId))
                .collect::<StoreResult<Vec<_>>>()?;
            Ok((ids, Some(index_id)))
        }
    }
}

/// Materialize the content behind `reference`
pub fn read(txn: &Transaction, reference: &[u8]) -> StoreResult<Bytes> {
    let header = parse_header(reference)?;
    if let RefHeader::Inline { len } = header {
        return reference
            .get(1..1 + len)
            .map(Bytes::copy_from_slice)
            .ok_or_else(|| StoreError::corrupt("truncated inline blob"));
    }
    let len = value_len(reference)?;
    let (chunks, _) = chunk_ids(txn, reference)?;
    let mut out = BytesMut::with_capacity(len);
    for id in chunks {
        out.extend_from_slice(&txn.read_required(id)?);
    }
    if out.len() != len {
        return Err(StoreError::corrupt(format!(
            "blob length mismatch: expected {}, found {}",
            len,
            out.len()
        )));
    }
    Ok(out.freeze())
}

/// Free every block the reference owns
pub fn clear(txn: &mut Transaction, reference: &[u8]) -> StoreResult<()> {
    let (chunks, index) = chunk_ids(txn, reference)?;
    for id in chunks.into_iter().chain(index) {
        txn.free(id);
    }
    Ok(())
}

/// Append `extra` to the blob and return the new reference
///
/// Full chunks are kept in place; only the trailing partial chunk and the
/// index block are rewritten.
pub fn append(txn: &mut Transaction, reference: &[u8], extra: &[u8]) -> StoreResult<Vec<u8>> {
    let block_size = txn.block_size();
    let len = value_len(reference)?;
    let total = len + extra.len();
    if total > max_blob_len(block_size) {
        return Err(StoreError::ValueTooLarge(total));
    }
    if matches!(parse_header(reference)?, RefHeader::Inline { .. }) {
        let mut content = read(txn, reference)?.to_vec();
        content.extend_from_slice(extra);
        return write(txn, &content);
    }

    let (mut chunks, index) = chunk_ids(txn, reference)?;
    if let Some(index) = index {
        txn.free(index);
    }
    let mut tail = Vec::new();
    if len % block_size != 0 {
        if let Some(last) = chunks.pop() {
            tail.extend_from_slice(&txn.read_required(last)?);
            txn.free(last);
        }
    }
    tail.extend_from_slice(extra);
    for piece in tail.chunks(block_size) {
        let id = txn.alloc();
        txn.write(id, Bytes::copy_from_slice(piece));
        chunks.push(id);
    }
    Ok(encode_chunked(txn, total, &chunks))
}

fn read_u64(data: &[u8], offset: usize) -> StoreResult<u64> {
    let bytes = data
        .get(offset..offset + 8)
        .ok_or_else(|| StoreError::corrupt("truncated block id"))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::tests::test_proxy;
    use tempfile::TempDir;

    const BLOCK_SIZE: usize = 256;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_inline_threshold() {
        assert_eq!(max_inline_len(4096), 250);
        assert_eq!(max_inline_len(256), 16);

        let dir = TempDir::new().unwrap();
        let mut txn = Transaction::begin(test_proxy(&dir, BLOCK_SIZE), 1);
        let small = write(&mut txn, b"sixteen bytes!!!").unwrap();
        assert_eq!(ref_size(&small, BLOCK_SIZE).unwrap(), 17);
        assert!(!txn.is_dirty());

        let big = write(&mut txn, &content(17)).unwrap();
        assert_eq!(big[0], DIRECT_TAG);
        assert_eq!(ref_size(&big, BLOCK_SIZE).unwrap(), 17);
    }

    #[test]
    fn test_direct_and_indirect_layouts() {
        let dir = TempDir::new().unwrap();
        let mut txn = Transaction::begin(test_proxy(&dir, BLOCK_SIZE), 1);

        let direct = content(BLOCK_SIZE * 3 + 5);
        let reference = write(&mut txn, &direct).unwrap();
        assert_eq!(ref_size(&reference, BLOCK_SIZE).unwrap(), 9 + 8 * 4);
        assert_eq!(read(&txn, &reference).unwrap(), direct);

        let indirect = content(BLOCK_SIZE * 31);
        let reference = write(&mut txn, &indirect).unwrap();
        assert_eq!(reference[0], INDIRECT_TAG);
        assert_eq!(ref_size(&reference, BLOCK_SIZE).unwrap(), 17);
        assert!(reference.len() <= MAX_REF_LEN);
        assert_eq!(read(&txn, &reference).unwrap(), indirect);
    }

    #[test]
    fn test_append_crosses_layouts() {
        let dir = TempDir::new().unwrap();
        let mut txn = Transaction::begin(test_proxy(&dir, BLOCK_SIZE), 1);

        let mut expected = b"abc".to_vec();
        let mut reference = write(&mut txn, &expected).unwrap();
        for _ in 0..41 {
            let extra = content(190);
            reference = append(&mut txn, &reference, &extra).unwrap();
            expected.extend_from_slice(&extra);
            assert_eq!(value_len(&reference).unwrap(), expected.len());
        }
        assert_eq!(reference[0], INDIRECT_TAG);
        assert_eq!(read(&txn, &reference).unwrap(), expected);
    }

    #[test]
    fn test_clear_frees_chunks() {
        let dir = TempDir::new().unwrap();
        let proxy = test_proxy(&dir, BLOCK_SIZE);
        let mut txn = Transaction::begin(proxy.clone(), 1);
        let reference = write(&mut txn, &content(BLOCK_SIZE * 2)).unwrap();
        let next = txn.next_block_id();
        txn.commit().unwrap();
        assert!(proxy.read(BlockId(1)).is_some());

        let mut txn = Transaction::begin(proxy.clone(), next);
        clear(&mut txn, &reference).unwrap();
        txn.commit().unwrap();
        assert!(proxy.read(BlockId(1)).is_none());
        assert!(proxy.read(BlockId(2)).is_none());
    }

    #[test]
    fn test_too_large() {
        let dir = TempDir::new().unwrap();
        let mut txn = Transaction::begin(test_proxy(&dir, BLOCK_SIZE), 1);
        let len = max_blob_len(BLOCK_SIZE) + 1;
        assert!(matches!(
            write(&mut txn, &content(len)),
            Err(StoreError::ValueTooLarge(l)) if l == len
        ));
    }
}
