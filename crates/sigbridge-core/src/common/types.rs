//! # Wire Types and Constants
//!
//! This module defines the messages exchanged between the background context,
//! the web-accessible context that reassembles transactions, and the
//! authentication popup. Every type here serializes to the JSON shape the
//! other contexts expect, so field names follow the wire format rather than
//! Rust conventions.
//!
//! ## Overview
//!
//! - [`Transaction`] - A signable payload: opaque header fields, a data buffer
//!   and ordered tags.
//! - [`StrippedTransaction`] - The same transaction without its bulk payload,
//!   small enough to ride along with an [`AuthRequest`].
//! - [`Chunk`] / [`EndMarker`] - The units streamed on [`AUTH_CHUNK`],
//!   distinguished on the wire by shape (see [`ChunkMessage`]).
//! - [`AuthRequest`] / [`AuthResponse`] - The authentication popup exchange.
//! - [`ApiCall`] / [`ApiCallResult`] - Module calls into the background.
//!
//! ## Constants
//!
//! - [`DEFAULT_CHUNK_BYTES`] - Default upper bound for a chunk payload.
//! - [`DEFAULT_MAX_MESSAGE_BYTES`] - Default single-message ceiling of the
//!   bridge.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use core::fmt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Readiness signal sent by the web-accessible context once it can accept a
/// chunk stream.
pub const AUTH_LISTENING: &str = "auth_listening";

/// Carries [`Chunk`]s and the trailing [`EndMarker`] to the web-accessible
/// context.
pub const AUTH_CHUNK: &str = "auth_chunk";

/// Carries an [`AuthRequest`] to the authentication popup.
pub const AUTH_REQUEST: &str = "auth";

/// Carries the popup's [`AuthResponse`] back to the background.
pub const AUTH_RESULT: &str = "auth_result";

/// Carries an [`ApiCall`] into the background.
pub const API_CALL: &str = "api_call";

/// Carries the [`ApiCallResult`] back to the caller.
pub const API_CALL_RESULT: &str = "api_call_result";

/// Context name of the page-facing frame that reassembles chunk streams.
pub const WEB_ACCESSIBLE: &str = "web_accessible";

/// Context name of the background process.
pub const BACKGROUND: &str = "background";

/// Default maximum number of payload bytes per chunk.
pub const DEFAULT_CHUNK_BYTES: usize = 500_000;

/// Default single-message ceiling enforced by the bridge (64 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Worst-case JSON expansion of a single payload byte (`"255,"`).
pub const JSON_BYTE_EXPANSION: usize = 4;

/// Generous allowance for everything in an encoded chunk that isn't payload.
pub const CHUNK_ENVELOPE_OVERHEAD: usize = 512;

/// Size of each length prefix in an encoded tag entry.
pub const TAG_LEN_PREFIX: usize = core::mem::size_of::<u32>();

/// Returns the largest encoded size a chunk with `chunk_bytes` of payload can
/// reach on the wire, or `None` on overflow.
pub const fn encoded_chunk_ceiling(chunk_bytes: usize) -> Option<usize> {
    match chunk_bytes.checked_mul(JSON_BYTE_EXPANSION) {
        Some(n) => n.checked_add(CHUNK_ENVELOPE_OVERHEAD),
        None => None,
    }
}

/// A single transaction tag. Names and values are raw bytes; on the wire they
/// may be written either as byte arrays or as UTF-8 strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: Bytes,
    pub value: Bytes,
}

impl Tag {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Number of bytes this tag occupies inside a tag chunk payload.
    pub fn encoded_len(&self) -> usize {
        2 * TAG_LEN_PREFIX + self.name.len() + self.value.len()
    }

    /// Appends `u32-le name_len | name | u32-le value_len | value`.
    ///
    /// Callers must have checked that both parts fit in a `u32`.
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u32_le(self.name.len() as u32);
        buf.put_slice(&self.name);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);
    }

    /// Decodes every tag entry packed into a tag chunk payload.
    ///
    /// Returns a description of the first framing problem found.
    pub(crate) fn decode_all(mut payload: Bytes) -> Result<Vec<Self>, String> {
        let mut tags = Vec::new();
        while payload.has_remaining() {
            let name = take_prefixed(&mut payload, "name")?;
            let value = take_prefixed(&mut payload, "value")?;
            tags.push(Self { name, value });
        }
        Ok(tags)
    }
}

fn take_prefixed(payload: &mut Bytes, part: &str) -> Result<Bytes, String> {
    if payload.remaining() < TAG_LEN_PREFIX {
        return Err(format!("truncated {part} length prefix"));
    }
    let len = payload.get_u32_le() as usize;
    if payload.remaining() < len {
        return Err(format!(
            "{part} declares {len} bytes but only {} remain",
            payload.remaining()
        ));
    }
    Ok(payload.split_to(len))
}

/// A signable transaction as handed over by the UI.
///
/// `fields` is the opaque header (owner, target, quantity, reward, ...) and is
/// never interpreted here. `data` and `tags` are the bulk payload that gets
/// chunked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Transaction {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tag(mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// A transaction with no header, no data and no tags has nothing to sign.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.data.is_empty() && self.tags.is_empty()
    }

    /// The transaction without its bulk payload.
    pub fn stripped(&self) -> StrippedTransaction {
        StrippedTransaction {
            fields: self.fields.clone(),
            data_size: self.data.len() as u64,
            tag_count: self.tags.len(),
        }
    }
}

/// Transaction metadata sent with an [`AuthRequest`]: enough to render a
/// confirmation prompt without the chunk stream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrippedTransaction {
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub data_size: u64,
    pub tag_count: usize,
}

/// Correlates every chunk of one decomposed transaction.
///
/// Freshly generated identifiers carry 128 random bits rendered as 32
/// lowercase hex digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CollectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CollectionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for CollectionId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Data,
    Tag,
}

/// One bounded slice of a transaction's data or tags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub collection_id: CollectionId,
    pub kind: ChunkKind,
    pub index: u64,
    pub payload: Bytes,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndKind {
    #[default]
    End,
}

/// Terminates a collection. `index` is the number of chunks sent before it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndMarker {
    pub collection_id: CollectionId,
    #[serde(rename = "type")]
    pub kind: EndKind,
    pub index: u64,
}

impl EndMarker {
    pub const fn new(collection_id: CollectionId, index: u64) -> Self {
        Self {
            collection_id,
            kind: EndKind::End,
            index,
        }
    }
}

/// Anything that travels on [`AUTH_CHUNK`].
///
/// Chunks have no `type` field; the end marker has `type: "end"`. The end
/// marker variant is listed first so untagged decoding tries it first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkMessage {
    End(EndMarker),
    Chunk(Chunk),
}

impl ChunkMessage {
    pub const fn collection_id(&self) -> &CollectionId {
        match self {
            Self::End(end) => &end.collection_id,
            Self::Chunk(chunk) => &chunk.collection_id,
        }
    }

    pub const fn index(&self) -> u64 {
        match self {
            Self::End(end) => end.index,
            Self::Chunk(chunk) => chunk.index,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_payload(payload: Value) -> serde_json::Result<Self> {
        serde_json::from_value(payload)
    }
}

impl From<Chunk> for ChunkMessage {
    fn from(chunk: Chunk) -> Self {
        Self::Chunk(chunk)
    }
}

impl From<EndMarker> for ChunkMessage {
    fn from(end: EndMarker) -> Self {
        Self::End(end)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    Sign,
}

/// Opens an authentication flow for one collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    #[serde(rename = "type")]
    pub kind: AuthKind,
    pub url: String,
    pub address: String,
    pub transaction: StrippedTransaction,
    #[serde(rename = "collectionID")]
    pub collection_id: CollectionId,
}

impl AuthRequest {
    pub fn sign(
        url: impl Into<String>,
        address: impl Into<String>,
        transaction: StrippedTransaction,
        collection_id: CollectionId,
    ) -> Self {
        Self {
            kind: AuthKind::Sign,
            url: url.into(),
            address: address.into(),
            transaction,
            collection_id,
        }
    }
}

/// The signature produced by the authentication collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub id: String,
    pub signature: String,
}

/// The popup's answer to an [`AuthRequest`].
///
/// `error` set means the request was rejected; otherwise `data` is the
/// (possibly absent) signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(rename = "collectionID")]
    pub collection_id: CollectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SignedTransaction>,
}

/// A module invocation addressed to the background.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCall {
    pub call_id: String,
    pub action: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// The reply to an [`ApiCall`]; exactly one of `result` or `error` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallResult {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiCallResult {
    pub fn ok(call_id: impl Into<String>, result: Value) -> Self {
        Self {
            call_id: call_id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(call_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            call_id: call_id.into(),
            result: None,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chunk_and_end_marker_are_distinguished_by_shape() {
        let chunk = json!({
            "collectionId": "abc",
            "kind": "tag",
            "index": 3,
            "payload": [1, 2, 3]
        });
        let end = json!({ "collectionId": "abc", "type": "end", "index": 4 });

        match ChunkMessage::from_payload(chunk).unwrap() {
            ChunkMessage::Chunk(c) => {
                assert_eq!(c.kind, ChunkKind::Tag);
                assert_eq!(c.index, 3);
                assert_eq!(&c.payload[..], &[1, 2, 3]);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        match ChunkMessage::from_payload(end).unwrap() {
            ChunkMessage::End(e) => assert_eq!(e.index, 4),
            other => panic!("expected end marker, got {other:?}"),
        }
    }

    #[test]
    fn serialized_chunk_has_no_type_field() {
        let chunk = Chunk {
            collection_id: "abc".into(),
            kind: ChunkKind::Data,
            index: 0,
            payload: Bytes::from_static(&[7]),
        };
        let value = ChunkMessage::from(chunk).to_payload().unwrap();
        assert!(value.get("type").is_none());
        assert_eq!(value["kind"], "data");
        assert_eq!(value["payload"], json!([7]));

        let end = ChunkMessage::from(EndMarker::new("abc".into(), 1))
            .to_payload()
            .unwrap();
        assert_eq!(end["type"], "end");
    }

    #[test]
    fn auth_request_uses_wire_field_names() {
        let request = AuthRequest::sign(
            "https://app.example",
            "addr",
            Transaction::new(vec![1, 2]).stripped(),
            "c1".into(),
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "sign");
        assert_eq!(value["collectionID"], "c1");
        assert_eq!(value["transaction"]["dataSize"], 2);
        assert_eq!(value["transaction"]["tagCount"], 0);
    }

    #[test]
    fn tags_accept_strings_on_the_wire() {
        let tx: Transaction = serde_json::from_value(json!({
            "data": "hello",
            "tags": [{ "name": "Content-Type", "value": "text/plain" }]
        }))
        .unwrap();
        assert_eq!(&tx.data[..], b"hello");
        assert_eq!(&tx.tags[0].name[..], b"Content-Type");
    }

    #[test]
    fn tag_payload_decoding_rejects_truncation() {
        let mut buf = BytesMut::new();
        Tag::new("a", "bc").encode_into(&mut buf);
        let full = buf.freeze();
        assert_eq!(
            Tag::decode_all(full.clone()).unwrap(),
            vec![Tag::new("a", "bc")]
        );
        assert!(Tag::decode_all(full.slice(..full.len() - 1)).is_err());
        assert!(Tag::decode_all(full.slice(..2)).is_err());
    }

    #[test]
    fn generated_collection_ids_are_128_bit_hex() {
        let a = CollectionId::generate();
        let b = CollectionId::generate();
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
