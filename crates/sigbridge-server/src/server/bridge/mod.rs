//! Point-to-point messaging between isolated contexts.
//!
//! A [`MessageBridge`] offers two things: a best-effort `send` to one
//! destination context, and filtered subscriptions to a channel. Every
//! subscription on a channel receives every matching message (fan-out), so a
//! listener must never assume it is the only consumer.
//!
//! The bridge gives no ordering guarantee between sends that are not awaited
//! one after the other, and it never retries.

pub mod hub;

pub use hub::{Endpoint, Envelope, Hub};

use serde_json::Value;
use sigbridge_core::{
    address::{ContextAddress, SenderFilter, SenderMeta},
    error::DeliveryError,
};
use tokio::{sync::mpsc, task::JoinHandle};

/// A message observed by a subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct Incoming {
    pub payload: Value,
    pub sender: SenderMeta,
}

pub trait MessageBridge: Clone + Send + Sync + 'static {
    /// Attempts one delivery of `payload` on `channel` to `destination`.
    ///
    /// Resolves once the transport has accepted the message.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] if the destination is gone or unreachable,
    /// or if the payload is rejected.
    fn send(
        &self,
        channel: &str,
        payload: Value,
        destination: &ContextAddress,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Registers a listener on `channel` for senders accepted by `filter`.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped.
    fn subscribe(&self, channel: &str, filter: SenderFilter) -> Subscription;
}

/// A registered, filtered listener. Dropping it deregisters the listener.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Incoming>,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Incoming>,
        unsubscribe: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Waits for the next matching message. Returns `None` once the bridge
    /// has gone away.
    pub async fn recv(&mut self) -> Option<Incoming> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Keeps an [`on_message`] handler alive. Dropping it stops the handler and
/// deregisters its subscription.
#[derive(Debug)]
pub struct ListenerHandle(JoinHandle<()>);

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Invokes `handler` once per message received on `channel` from a sender
/// accepted by `filter`.
///
/// Messages are handled one at a time in arrival order; a handler that needs
/// concurrency should spawn.
pub fn on_message<B, F, Fut>(
    bridge: &B,
    channel: &str,
    filter: SenderFilter,
    handler: F,
) -> ListenerHandle
where
    B: MessageBridge,
    F: Fn(Incoming) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut subscription = bridge.subscribe(channel, filter);
    ListenerHandle(tokio::spawn(async move {
        while let Some(incoming) = subscription.recv().await {
            handler(incoming).await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use serde_json::json;
    use sigbridge_core::types::BACKGROUND;

    #[tokio::test]
    async fn on_message_fires_for_every_registration() {
        let hub = Hub::new(1024, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = (0..2)
            .map(|n| {
                let tx = tx.clone();
                on_message(&hub, "ping", SenderFilter::Any, move |incoming| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send((n, incoming.payload));
                    }
                })
            })
            .collect();

        hub.route(
            SenderMeta::new("popup", None),
            "ping",
            json!(1),
            &ContextAddress::unbound(BACKGROUND),
        )
        .await
        .unwrap();

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort_by_key(|(n, _)| *n);
        assert_eq!(seen, vec![(0, json!(1)), (1, json!(1))]);

        drop(handles);
        tokio::time::timeout(Duration::from_secs(1), async {
            while hub.listener_count("ping") > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
