use sigbridge_core::{decompose::Decomposition, types::CollectionId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything one in-flight signing call owns.
///
/// Dropping it, on whichever path the call settled, stops the readiness
/// listener and the authentication task. A chunk stream that already started
/// is left to finish on its own.
#[derive(Debug)]
pub struct PendingSigningOperation {
    decomposition: Arc<Decomposition>,
    listener: CancellationToken,
    auth: JoinHandle<()>,
}

impl PendingSigningOperation {
    pub const fn new(
        decomposition: Arc<Decomposition>,
        listener: CancellationToken,
        auth: JoinHandle<()>,
    ) -> Self {
        Self {
            decomposition,
            listener,
            auth,
        }
    }

    pub fn collection_id(&self) -> &CollectionId {
        &self.decomposition.collection_id
    }
}

impl Drop for PendingSigningOperation {
    fn drop(&mut self) {
        self.listener.cancel();
        self.auth.abort();
    }
}
