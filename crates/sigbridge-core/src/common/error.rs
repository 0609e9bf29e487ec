//! Error types for the signing bridge.
//!
//! Each concern gets its own enum so callers can match on exactly what they
//! can observe. [`Error`] unifies them for code that only needs to report.
//!
//! ## Error Cases
//! - [`DecompositionError`]: The transaction cannot be split into chunks.
//! - [`DeliveryError`]: A bridge send failed (unreachable, torn down, or the
//!   payload was rejected).
//! - [`AuthError`]: The authentication collaborator rejected or timed out.
//! - [`ReassemblyError`]: A received chunk stream is inconsistent.
//! - [`SigningError`]: A signing operation settled as failed.
//! - [`DispatchError`] / [`ModuleError`]: Module dispatcher misuse and module
//!   handler failures.
//! - [`AddressError`]: A context address string could not be parsed.

use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// The transaction cannot be decomposed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecompositionError {
    /// No header, data or tags: there is nothing to sign.
    #[error("Transaction has no signable content")]
    Empty,

    /// A zero chunk size would never make progress.
    #[error("Chunk size must be greater than 0")]
    InvalidChunkSize,

    /// Tags are never split across chunks, so a single tag must fit in one.
    #[error("Tag {index} encodes to {size} bytes, exceeding the chunk limit of {limit} bytes")]
    TagTooLarge {
        index: usize,
        size: usize,
        limit: usize,
    },
}

/// A single best-effort bridge delivery failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// No context is attached under the destination address.
    #[error("Destination {destination} is unreachable")]
    Unreachable { destination: String },

    /// The destination detached while the message was being handed over.
    #[error("Destination {destination} was torn down")]
    Closed { destination: String },

    /// The destination's queue is full and the sender cannot wait.
    #[error("Destination {destination} is not keeping up")]
    Busy { destination: String },

    /// The encoded payload exceeds the bridge's single-message ceiling.
    #[error("Payload of {size} bytes exceeds the message limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The payload could not be encoded for transport.
    #[error("Failed to encode payload: {reason}")]
    Encode { reason: String },
}

/// The authentication collaborator did not produce a result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The user declined, or the authenticator reported an internal error.
    #[error("Authentication rejected: {reason}")]
    Rejected { reason: String },

    /// No answer arrived within the authenticator's own deadline.
    #[error("Authentication timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The authentication request could not be delivered.
    #[error("Authenticator unavailable: {0}")]
    Unavailable(#[from] DeliveryError),

    /// The authenticator answered with something that isn't a response.
    #[error("Malformed authentication response: {reason}")]
    Malformed { reason: String },
}

/// A received chunk stream cannot be turned back into a transaction.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("Chunk belongs to collection \"{found}\", expected \"{expected}\"")]
    ForeignCollection { expected: String, found: String },

    /// Gaps, duplicates and reordering all surface here.
    #[error("Expected chunk index {expected}, received {found}")]
    UnexpectedIndex { expected: u64, found: u64 },

    #[error("Data chunk {index} arrived after tag chunks")]
    DataAfterTags { index: u64 },

    #[error("Tag chunk {index} is malformed: {reason}")]
    MalformedTags { index: u64, reason: String },

    /// The end marker's count does not match what was received.
    #[error("End marker announces {expected} chunks but {received} were received")]
    Incomplete { expected: u64, received: u64 },

    /// A chunk would carry the collection past what its header announced.
    #[error("Chunk {index} brings {what} to {found}, beyond the announced {limit}")]
    ExceedsHeader {
        index: u64,
        what: &'static str,
        limit: u64,
        found: u64,
    },

    #[error("Reassembled {what} is {found}, expected {expected}")]
    SizeMismatch {
        what: &'static str,
        expected: u64,
        found: u64,
    },

    #[error("Collection is already complete")]
    AlreadyComplete,
}

/// A signing operation settled as failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error(transparent)]
    Decomposition(#[from] DecompositionError),

    /// Streaming stopped at `index`; later chunks and the end marker were
    /// never sent.
    #[error("Error while sending a data chunk of collection \"{collection_id}\": {source}")]
    ChunkDelivery {
        collection_id: String,
        index: u64,
        source: DeliveryError,
    },

    #[error(transparent)]
    Authentication(#[from] AuthError),

    /// Nothing settled the operation within the signing deadline.
    #[error("Signing collection \"{collection_id}\" timed out after {after:?}")]
    Timeout {
        collection_id: String,
        after: Duration,
    },

    /// Every settling path went away without a result (a task panicked).
    #[error("Signing collection \"{collection_id}\" was abandoned before settling")]
    Abandoned { collection_id: String },
}

/// A module handler failed. The dispatcher passes these through unchanged.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    #[error("Invalid params for {action}: {reason}")]
    InvalidParams { action: String, reason: String },

    #[error("Missing permission(s) for {action}: {missing}")]
    MissingPermissions { action: String, missing: String },

    #[error("No active wallet")]
    NoActiveWallet,

    #[error("Unknown wallet: {address}")]
    UnknownWallet { address: String },

    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Module dispatcher misuse, or a handler failure passed through.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    /// Raised while assembling the registry, never at dispatch time.
    #[error("Duplicate action: {action}")]
    DuplicateAction { action: String },

    /// The host is draining and refuses new calls.
    #[error("Service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// A context address string is malformed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Context name must not be empty")]
    EmptyContext,

    #[error("Invalid tab id \"{raw}\"")]
    InvalidTabId { raw: String },
}

/// Unified error type for the signing bridge.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decomposition(#[from] DecompositionError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Authentication(#[from] AuthError),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Address(#[from] AddressError),
}
