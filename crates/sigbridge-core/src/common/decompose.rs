//! Transaction decomposition.
//!
//! Splits a [`Transaction`] into a collection of size-bounded [`Chunk`]s so it
//! can cross a bridge with a single-message ceiling. Data chunks come first,
//! tag chunks second, and indices run contiguously across both from `0`.
//!
//! Decomposition is pure: given the same transaction, chunk size and
//! [`CollectionId`] it always produces the same chunks. Data chunks are
//! zero-copy slices of the transaction's buffer.

use crate::common::{
    error::DecompositionError,
    types::{Chunk, ChunkKind, CollectionId, EndMarker, StrippedTransaction, Transaction},
};
use bytes::BytesMut;

/// Output of [`decompose`]: the stripped transaction plus every chunk needed
/// to rebuild it.
#[derive(Clone, Debug, PartialEq)]
pub struct Decomposition {
    pub collection_id: CollectionId,
    pub transaction: StrippedTransaction,
    pub data_chunks: Vec<Chunk>,
    pub tag_chunks: Vec<Chunk>,
}

impl Decomposition {
    /// Total number of chunks, excluding the end marker.
    pub fn len(&self) -> usize {
        self.data_chunks.len() + self.tag_chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All chunks in send order: data first, then tags.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.data_chunks.iter().chain(self.tag_chunks.iter())
    }

    /// The marker that terminates this collection.
    pub fn end_marker(&self) -> EndMarker {
        EndMarker::new(self.collection_id.clone(), self.len() as u64)
    }
}

/// Decomposes `transaction` under a freshly generated collection id.
///
/// # Errors
///
/// See [`decompose_with_id`].
pub fn decompose(
    transaction: &Transaction,
    max_chunk_bytes: usize,
) -> Result<Decomposition, DecompositionError> {
    decompose_with_id(transaction, CollectionId::generate(), max_chunk_bytes)
}

/// Decomposes `transaction` under the given collection id.
///
/// Each data chunk carries at most `max_chunk_bytes` of data. Tags are packed
/// greedily, whole, into tag chunks of at most `max_chunk_bytes` encoded
/// bytes.
///
/// # Errors
///
/// - [`DecompositionError::InvalidChunkSize`] if `max_chunk_bytes` is `0`.
/// - [`DecompositionError::Empty`] if the transaction has nothing to sign.
/// - [`DecompositionError::TagTooLarge`] if a single tag cannot fit in a
///   chunk.
pub fn decompose_with_id(
    transaction: &Transaction,
    collection_id: CollectionId,
    max_chunk_bytes: usize,
) -> Result<Decomposition, DecompositionError> {
    if max_chunk_bytes == 0 {
        return Err(DecompositionError::InvalidChunkSize);
    }
    if transaction.is_empty() {
        return Err(DecompositionError::Empty);
    }

    let mut index = 0_u64;
    let mut next_chunk = |kind, payload| {
        let chunk = Chunk {
            collection_id: collection_id.clone(),
            kind,
            index,
            payload,
        };
        index += 1;
        chunk
    };

    let data = &transaction.data;
    let mut data_chunks = Vec::with_capacity(data.len().div_ceil(max_chunk_bytes));
    let mut offset = 0;
    while offset < data.len() {
        let end = data.len().min(offset + max_chunk_bytes);
        data_chunks.push(next_chunk(ChunkKind::Data, data.slice(offset..end)));
        offset = end;
    }

    let mut tag_chunks = Vec::new();
    let mut buf = BytesMut::new();
    for (i, tag) in transaction.tags.iter().enumerate() {
        let size = tag.encoded_len();
        let fits_u32 =
            u32::try_from(tag.name.len()).is_ok() && u32::try_from(tag.value.len()).is_ok();
        if size > max_chunk_bytes || !fits_u32 {
            return Err(DecompositionError::TagTooLarge {
                index: i,
                size,
                limit: max_chunk_bytes,
            });
        }
        if buf.len() + size > max_chunk_bytes {
            tag_chunks.push(next_chunk(ChunkKind::Tag, buf.split().freeze()));
        }
        tag.encode_into(&mut buf);
    }
    if !buf.is_empty() {
        tag_chunks.push(next_chunk(ChunkKind::Tag, buf.freeze()));
    }

    Ok(Decomposition {
        collection_id,
        transaction: transaction.stripped(),
        data_chunks,
        tag_chunks,
    })
}
