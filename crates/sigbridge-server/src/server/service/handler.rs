//! API call handler for the background context.
//!
//! Each `api_call` message is parsed, permission-checked against the caller's
//! origin and dispatched on its own task, so one slow module (a signing call
//! waiting on the user) never delays the others. The reply goes back to the
//! exact context that asked.
use crate::server::{
    bridge::{Incoming, ListenerHandle, MessageBridge, on_message},
    dispatch::{Connection, ModuleRegistry},
    telemetry::increment_api_calls,
    wallet::WalletState,
};
use core::time::Duration;
use portable_atomic::{AtomicUsize, Ordering};
use serde_json::Value;
use sigbridge_core::{
    address::{SenderFilter, SenderMeta},
    error::{DispatchError, ModuleError},
    types::{API_CALL, API_CALL_RESULT, ApiCall, ApiCallResult},
};
use std::sync::Arc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Serves module calls from every context over a [`MessageBridge`].
#[derive(Clone)]
pub struct BackgroundService<B> {
    bridge: B,
    registry: Arc<ModuleRegistry>,
    wallet: Arc<WalletState>,
    shutdown_token: CancellationToken,
    inflight: Arc<AtomicUsize>,
}

impl<B: MessageBridge> BackgroundService<B> {
    pub fn new(bridge: B, registry: Arc<ModuleRegistry>, wallet: Arc<WalletState>) -> Self {
        Self {
            bridge,
            registry,
            wallet,
            shutdown_token: CancellationToken::new(),
            inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Starts answering `api_call` messages. Calls stop being accepted when
    /// the returned handle is dropped.
    pub fn start(&self) -> ListenerHandle {
        let service = self.clone();
        on_message(&self.bridge, API_CALL, SenderFilter::Any, move |incoming| {
            let service = service.clone();
            async move { service.accept(incoming) }
        })
    }

    /// Number of calls currently being handled.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    fn accept(&self, Incoming { payload, sender }: Incoming) {
        let call: ApiCall = match serde_json::from_value(payload) {
            Ok(call) => call,
            Err(_e) => {
                // Without a call id there is nobody to answer.
                #[cfg(feature = "tracing")]
                tracing::warn!(sender = %sender.address(), "Dropping malformed API call: {}", _e);
                return;
            }
        };
        increment_api_calls();

        let service = self.clone();
        if self.shutdown_token.is_cancelled() {
            tokio::spawn(async move {
                service
                    .reply(&sender, call.call_id, Err(DispatchError::ShuttingDown))
                    .await;
            });
            return;
        }

        let guard = InflightGuard::new(Arc::clone(&self.inflight));
        let fut = async move {
            let ApiCall {
                call_id,
                action,
                params,
            } = call;
            let result = service.handle_call(sender.clone(), &action, params).await;
            service.reply(&sender, call_id, result).await;
            drop(guard);
        };
        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            fut.instrument(tracing::info_span!("api_call"))
        };
        tokio::spawn(fut);
    }

    /// Checks that the caller's origin holds every permission `action`
    /// requires, then dispatches it.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownAction`] for unregistered actions,
    /// [`ModuleError::MissingPermissions`] if a permission is missing, or the
    /// module's own error.
    pub async fn handle_call(
        &self,
        sender: SenderMeta,
        action: &str,
        params: Vec<Value>,
    ) -> Result<Value, DispatchError> {
        let module = self
            .registry
            .get(action)
            .ok_or_else(|| DispatchError::UnknownAction {
                action: action.to_string(),
            })?;

        let connection = Connection::new(sender);
        if !module.permissions.is_empty() {
            let origin = connection.origin().unwrap_or_default();
            let missing = self.wallet.missing_permissions(&origin, &module.permissions);
            if !missing.is_empty() {
                let missing = missing
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ModuleError::MissingPermissions {
                    action: action.to_string(),
                    missing,
                }
                .into());
            }
        }

        self.registry.dispatch(connection, action, params).await
    }

    async fn reply(&self, sender: &SenderMeta, call_id: String, result: Result<Value, DispatchError>) {
        let reply = match result {
            Ok(value) => ApiCallResult::ok(call_id, value),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%call_id, "API call failed: {}", e);
                ApiCallResult::err(call_id, e)
            }
        };
        let payload = match serde_json::to_value(&reply) {
            Ok(payload) => payload,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(call_id = %reply.call_id, "Failed to encode API result: {}", _e);
                return;
            }
        };
        if let Err(_e) = self
            .bridge
            .send(API_CALL_RESULT, payload, &sender.address())
            .await
        {
            #[cfg(feature = "tracing")]
            tracing::debug!(call_id = %reply.call_id, "Caller went away: {}", _e);
        }
    }

    /// Stops accepting calls and waits up to `drain_timeout` for in-flight
    /// calls to finish. Calls arriving meanwhile are answered with
    /// [`DispatchError::ShuttingDown`].
    ///
    /// Returns the number of calls still running when the wait ended.
    pub async fn shutdown(&self, drain_timeout: Duration) -> usize {
        #[cfg(feature = "tracing")]
        tracing::info!(inflight = self.inflight(), "Initiating API service shutdown");

        self.shutdown_token.cancel();
        let deadline = Instant::now() + drain_timeout;
        while self.inflight() > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.inflight();
        #[cfg(feature = "tracing")]
        {
            if remaining == 0 {
                tracing::info!("API service drained");
            } else {
                tracing::warn!(remaining, "API service shutdown timeout");
            }
        }
        remaining
    }
}

struct InflightGuard(Arc<AtomicUsize>);

impl InflightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
