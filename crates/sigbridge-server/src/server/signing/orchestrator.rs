//! End-to-end signing flow.
//!
//! [`AuthOrchestrator::sign_with_auth`] runs two paths side by side for one
//! decomposed transaction:
//!
//! - the authentication path, which asks the [`Authenticator`] and settles
//!   the call with whatever it answers, and
//! - the chunk path, which waits for a readiness signal from a
//!   `web_accessible` context and streams the chunk collection to it. It only
//!   settles the call if a send fails.
//!
//! Both feed one [`Settler`]; the first write wins. The whole call is bounded
//! by `sign_timeout`.

use super::{
    pending::PendingSigningOperation,
    settle::{Settler, settlement},
    stream::stream_chunks,
};
use crate::server::{
    auth::Authenticator,
    bridge::{Incoming, MessageBridge, Subscription},
    telemetry::{
        decrement_signing_inflight, increment_sign_failures, increment_sign_requests,
        increment_signing_inflight, record_sign_duration,
    },
};
use core::time::Duration;
use sigbridge_core::{
    address::{ContextAddress, SenderFilter},
    decompose::{Decomposition, decompose},
    error::SigningError,
    types::{AUTH_LISTENING, AuthRequest, SignedTransaction, Transaction, WEB_ACCESSIBLE},
};
use std::{sync::Arc, time::Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub type SigningResult = Result<Option<SignedTransaction>, SigningError>;

/// Drives signing calls. One instance serves any number of concurrent calls;
/// each call owns its own [`PendingSigningOperation`].
#[derive(Debug)]
pub struct AuthOrchestrator<B, A> {
    bridge: B,
    authenticator: Arc<A>,
    chunk_bytes: usize,
    sign_timeout: Duration,
}

impl<B, A> AuthOrchestrator<B, A>
where
    B: MessageBridge,
    A: Authenticator,
{
    pub fn new(bridge: B, authenticator: A, chunk_bytes: usize, sign_timeout: Duration) -> Self {
        Self {
            bridge,
            authenticator: Arc::new(authenticator),
            chunk_bytes,
            sign_timeout,
        }
    }

    /// Requests a signature for `transaction` on behalf of the page at
    /// `tab_url`, signing with the wallet at `address`.
    ///
    /// Settles exactly once: with the authenticator's answer, with the first
    /// chunk delivery failure, or with a timeout, whichever comes first. A
    /// signature that needs no chunks is returned without any chunk ever
    /// being sent.
    ///
    /// # Errors
    ///
    /// See [`SigningError`].
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(url = tab_url)))]
    pub async fn sign_with_auth(
        &self,
        tab_url: &str,
        transaction: &Transaction,
        address: &str,
    ) -> SigningResult {
        let start = Instant::now();
        increment_sign_requests();
        let _inflight = InflightGuard::new();

        let result = self.run(tab_url, transaction, address).await;
        match &result {
            Ok(_) => record_sign_duration(start.elapsed().as_secs_f64() * 1000.0),
            Err(_e) => {
                increment_sign_failures();
                #[cfg(feature = "tracing")]
                tracing::warn!("Signing failed: {}", _e);
            }
        }
        result
    }

    async fn run(&self, tab_url: &str, transaction: &Transaction, address: &str) -> SigningResult {
        let decomposition = Arc::new(decompose(transaction, self.chunk_bytes)?);
        let (settler, settled) = settlement();

        // Subscribe before the request goes out so an early signal is kept.
        let readiness = self
            .bridge
            .subscribe(AUTH_LISTENING, SenderFilter::context(WEB_ACCESSIBLE));
        let listener = CancellationToken::new();
        tokio::spawn(forward_on_ready(
            self.bridge.clone(),
            readiness,
            Arc::clone(&decomposition),
            settler.clone(),
            listener.clone(),
        ));

        let request = AuthRequest::sign(
            tab_url,
            address,
            decomposition.transaction.clone(),
            decomposition.collection_id.clone(),
        );
        let authenticator = Arc::clone(&self.authenticator);
        let auth = tokio::spawn(async move {
            let result = authenticator
                .authenticate(request)
                .await
                .map_err(SigningError::from);
            settler.settle(result);
        });

        #[cfg(feature = "tracing")]
        tracing::info!(
            collection_id = %decomposition.collection_id,
            chunks = decomposition.len(),
            "Authentication requested"
        );

        let pending = PendingSigningOperation::new(decomposition, listener, auth);
        match timeout(self.sign_timeout, settled).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SigningError::Abandoned {
                collection_id: pending.collection_id().to_string(),
            }),
            Err(_) => Err(SigningError::Timeout {
                collection_id: pending.collection_id().to_string(),
                after: self.sign_timeout,
            }),
        }
    }
}

/// Waits for the first readiness signal that names a tab, then streams the
/// collection to that tab's `web_accessible` context.
///
/// The subscription is released as soon as a signal is accepted or `cancel`
/// fires, whichever comes first. Only a delivery failure settles.
async fn forward_on_ready<B: MessageBridge>(
    bridge: B,
    mut readiness: Subscription,
    decomposition: Arc<Decomposition>,
    settler: Settler<SigningResult>,
    cancel: CancellationToken,
) {
    let destination = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            incoming = readiness.recv() => match incoming {
                Some(Incoming { sender, .. }) => match sender.tab_id {
                    Some(tab_id) => break ContextAddress::new(WEB_ACCESSIBLE, tab_id),
                    None => continue,
                },
                None => return,
            },
        }
    };
    drop(readiness);

    #[cfg(feature = "tracing")]
    tracing::debug!(
        collection_id = %decomposition.collection_id,
        %destination,
        "Receiver ready, streaming chunks"
    );

    if let Err(e) = stream_chunks(&bridge, &destination, &decomposition).await {
        if !settler.settle(Err(e)) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                collection_id = %decomposition.collection_id,
                "Chunk failure after settlement ignored"
            );
        }
    }
}

struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        increment_signing_inflight();
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        decrement_signing_inflight();
    }
}
