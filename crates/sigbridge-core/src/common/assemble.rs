//! Receiver-side reassembly of a chunk collection.
//!
//! [`ChunkAssembler`] is the counterpart of
//! [`decompose`](crate::decompose::decompose). It is fed every
//! [`ChunkMessage`] received on the chunk channel for one collection, checks
//! that the stream is gap-free and in order, and rebuilds the original
//! [`Transaction`] once the [`EndMarker`](crate::types::EndMarker) arrives.

use crate::common::{
    error::ReassemblyError,
    types::{
        Chunk, ChunkKind, ChunkMessage, CollectionId, DEFAULT_CHUNK_BYTES, StrippedTransaction,
        Tag, Transaction,
    },
};
use bytes::BytesMut;

/// Upper bound on the tags preallocated from an untrusted header.
const MAX_PREALLOCATED_TAGS: usize = 1024;

/// Accumulates one collection's chunks.
#[derive(Debug)]
pub struct ChunkAssembler {
    collection_id: CollectionId,
    header: StrippedTransaction,
    data: BytesMut,
    tags: Vec<Tag>,
    next_index: u64,
    seen_tags: bool,
    complete: bool,
}

impl ChunkAssembler {
    /// Starts reassembling `collection_id`, whose metadata arrived with the
    /// authentication request.
    ///
    /// The header is untrusted: buffers start at most one chunk large and
    /// grow as chunks are accepted.
    pub fn new(collection_id: CollectionId, header: StrippedTransaction) -> Self {
        let data_capacity = usize::try_from(header.data_size)
            .unwrap_or(usize::MAX)
            .min(DEFAULT_CHUNK_BYTES);
        Self {
            collection_id,
            data: BytesMut::with_capacity(data_capacity),
            tags: Vec::with_capacity(header.tag_count.min(MAX_PREALLOCATED_TAGS)),
            header,
            next_index: 0,
            seen_tags: false,
            complete: false,
        }
    }

    pub const fn collection_id(&self) -> &CollectionId {
        &self.collection_id
    }

    /// Number of chunks accepted so far.
    pub const fn received(&self) -> u64 {
        self.next_index
    }

    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Feeds the next message of the stream.
    ///
    /// Returns `Ok(None)` while chunks are still expected and the rebuilt
    /// transaction once a valid end marker is accepted. Any error leaves the
    /// assembler unchanged, so a caller may discard it or keep going.
    ///
    /// # Errors
    ///
    /// See [`ReassemblyError`].
    pub fn push(&mut self, message: ChunkMessage) -> Result<Option<Transaction>, ReassemblyError> {
        if self.complete {
            return Err(ReassemblyError::AlreadyComplete);
        }
        if *message.collection_id() != self.collection_id {
            return Err(ReassemblyError::ForeignCollection {
                expected: self.collection_id.to_string(),
                found: message.collection_id().to_string(),
            });
        }

        match message {
            ChunkMessage::Chunk(chunk) => {
                self.accept(chunk)?;
                Ok(None)
            }
            ChunkMessage::End(end) => {
                if end.index != self.next_index {
                    return Err(ReassemblyError::Incomplete {
                        expected: end.index,
                        received: self.next_index,
                    });
                }
                self.finish().map(Some)
            }
        }
    }

    fn accept(&mut self, chunk: Chunk) -> Result<(), ReassemblyError> {
        if chunk.index != self.next_index {
            return Err(ReassemblyError::UnexpectedIndex {
                expected: self.next_index,
                found: chunk.index,
            });
        }

        match chunk.kind {
            ChunkKind::Data if self.seen_tags => {
                return Err(ReassemblyError::DataAfterTags { index: chunk.index });
            }
            ChunkKind::Data => {
                let found = (self.data.len() as u64).saturating_add(chunk.payload.len() as u64);
                if found > self.header.data_size {
                    return Err(ReassemblyError::ExceedsHeader {
                        index: chunk.index,
                        what: "data size",
                        limit: self.header.data_size,
                        found,
                    });
                }
                self.data.extend_from_slice(&chunk.payload);
            }
            ChunkKind::Tag => {
                let tags = Tag::decode_all(chunk.payload).map_err(|reason| {
                    ReassemblyError::MalformedTags {
                        index: chunk.index,
                        reason,
                    }
                })?;
                let found = self.tags.len().saturating_add(tags.len());
                if found > self.header.tag_count {
                    return Err(ReassemblyError::ExceedsHeader {
                        index: chunk.index,
                        what: "tag count",
                        limit: self.header.tag_count as u64,
                        found: found as u64,
                    });
                }
                self.seen_tags = true;
                self.tags.extend(tags);
            }
        }

        self.next_index += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<Transaction, ReassemblyError> {
        let data_len = self.data.len() as u64;
        if data_len != self.header.data_size {
            return Err(ReassemblyError::SizeMismatch {
                what: "data size",
                expected: self.header.data_size,
                found: data_len,
            });
        }
        if self.tags.len() != self.header.tag_count {
            return Err(ReassemblyError::SizeMismatch {
                what: "tag count",
                expected: self.header.tag_count as u64,
                found: self.tags.len() as u64,
            });
        }

        self.complete = true;
        Ok(Transaction {
            fields: core::mem::take(&mut self.header.fields),
            data: self.data.split().freeze(),
            tags: core::mem::take(&mut self.tags),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        decompose::{Decomposition, decompose},
        types::EndMarker,
    };

    fn sample() -> (Transaction, Decomposition) {
        let tx = Transaction::new((0..=255_u8).cycle().take(1000).collect::<Vec<_>>())
            .with_tag("Content-Type", "application/octet-stream")
            .with_tag("App-Name", "sigbridge")
            .with_field("target", "someone");
        let d = decompose(&tx, 64).unwrap();
        (tx, d)
    }

    fn assembler_for(d: &Decomposition) -> ChunkAssembler {
        ChunkAssembler::new(d.collection_id.clone(), d.transaction.clone())
    }

    #[test]
    fn rebuilds_the_original_transaction() {
        let (tx, d) = sample();
        let mut assembler = assembler_for(&d);

        for chunk in d.chunks() {
            assert_eq!(assembler.push(chunk.clone().into()).unwrap(), None);
        }
        let rebuilt = assembler.push(d.end_marker().into()).unwrap();

        assert_eq!(rebuilt, Some(tx));
        assert!(assembler.is_complete());
        assert_eq!(
            assembler.push(d.end_marker().into()),
            Err(ReassemblyError::AlreadyComplete)
        );
    }

    #[test]
    fn detects_a_gap() {
        let (_, d) = sample();
        let mut assembler = assembler_for(&d);
        let mut chunks = d.chunks().cloned();

        assembler.push(chunks.next().unwrap().into()).unwrap();
        let skipped = chunks.nth(1).unwrap();
        assert_eq!(
            assembler.push(skipped.into()),
            Err(ReassemblyError::UnexpectedIndex {
                expected: 1,
                found: 2
            })
        );
        assert_eq!(assembler.received(), 1);
    }

    #[test]
    fn detects_a_duplicate() {
        let (_, d) = sample();
        let mut assembler = assembler_for(&d);
        let first = d.data_chunks[0].clone();

        assembler.push(first.clone().into()).unwrap();
        assert!(matches!(
            assembler.push(first.into()),
            Err(ReassemblyError::UnexpectedIndex { .. })
        ));
    }

    #[test]
    fn early_end_marker_is_incomplete() {
        let (_, d) = sample();
        let mut assembler = assembler_for(&d);
        assembler.push(d.data_chunks[0].clone().into()).unwrap();

        assert_eq!(
            assembler.push(d.end_marker().into()),
            Err(ReassemblyError::Incomplete {
                expected: d.len() as u64,
                received: 1
            })
        );
        assert!(!assembler.is_complete());
    }

    #[test]
    fn rejects_foreign_collection() {
        let (_, d) = sample();
        let mut assembler = assembler_for(&d);
        let stray = EndMarker::new("someone-else".into(), 0);

        assert!(matches!(
            assembler.push(stray.into()),
            Err(ReassemblyError::ForeignCollection { .. })
        ));
    }

    #[test]
    fn rejects_data_after_tags() {
        let id: CollectionId = "c".into();
        let mut assembler = ChunkAssembler::new(id.clone(), StrippedTransaction::default());
        let tag = Chunk {
            collection_id: id.clone(),
            kind: ChunkKind::Tag,
            index: 0,
            payload: bytes::Bytes::new(),
        };
        let data = Chunk {
            collection_id: id,
            kind: ChunkKind::Data,
            index: 1,
            payload: bytes::Bytes::from_static(b"x"),
        };

        assembler.push(tag.into()).unwrap();
        assert_eq!(
            assembler.push(data.into()),
            Err(ReassemblyError::DataAfterTags { index: 1 })
        );
    }

    #[test]
    fn untrusted_header_sizes_do_not_preallocate() {
        let header = StrippedTransaction {
            data_size: u64::MAX,
            tag_count: usize::MAX,
            ..StrippedTransaction::default()
        };
        let assembler = ChunkAssembler::new("c".into(), header);
        assert_eq!(assembler.received(), 0);
    }

    #[test]
    fn rejects_data_beyond_the_announced_size() {
        let (_, mut d) = sample();
        d.transaction.data_size = 100;
        let mut assembler = assembler_for(&d);
        // 64-byte chunks: the second one overshoots.
        assembler.push(d.data_chunks[0].clone().into()).unwrap();

        assert_eq!(
            assembler.push(d.data_chunks[1].clone().into()),
            Err(ReassemblyError::ExceedsHeader {
                index: 1,
                what: "data size",
                limit: 100,
                found: 128,
            })
        );
        assert_eq!(assembler.received(), 1);
    }

    #[test]
    fn rejects_tags_beyond_the_announced_count() {
        let (_, mut d) = sample();
        d.transaction.tag_count = 0;
        let mut assembler = assembler_for(&d);
        for chunk in &d.data_chunks {
            assembler.push(chunk.clone().into()).unwrap();
        }

        assert!(matches!(
            assembler.push(d.tag_chunks[0].clone().into()),
            Err(ReassemblyError::ExceedsHeader {
                what: "tag count",
                limit: 0,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn rejects_size_mismatch_against_header() {
        let (_, mut d) = sample();
        d.transaction.data_size += 1;
        let mut assembler = assembler_for(&d);
        for chunk in d.chunks() {
            assembler.push(chunk.clone().into()).unwrap();
        }

        assert!(matches!(
            assembler.push(d.end_marker().into()),
            Err(ReassemblyError::SizeMismatch {
                what: "data size",
                ..
            })
        ));
    }
}
