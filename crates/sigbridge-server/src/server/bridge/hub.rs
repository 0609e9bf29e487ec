//! In-process message hub.
//!
//! The [`Hub`] is the background context's side of the bridge. Remote
//! contexts (tabs, the popup) [`attach`](Hub::attach) under their address and
//! drain an [`Endpoint`]; messages addressed to the background are fanned out
//! to local subscriptions.
//!
//! Payloads are checked against the single-message ceiling before they are
//! queued, so an oversized message fails at the sender instead of being
//! silently dropped by a transport further down.

use super::{Incoming, MessageBridge, Subscription};
use parking_lot::RwLock;
use portable_atomic::{AtomicU64, Ordering};
use serde_json::Value;
use sigbridge_core::{
    address::{ContextAddress, SenderFilter, SenderMeta},
    error::DeliveryError,
};
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use tokio::sync::mpsc;

/// A message queued for an attached endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub channel: String,
    pub sender: SenderMeta,
    pub payload: Value,
}

struct Listener {
    id: u64,
    filter: SenderFilter,
    tx: mpsc::UnboundedSender<Incoming>,
}

struct Attached {
    id: u64,
    tx: mpsc::Sender<Envelope>,
}

#[derive(Default)]
struct Registry {
    endpoints: HashMap<ContextAddress, Attached>,
    listeners: HashMap<String, Vec<Listener>>,
}

struct Inner {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    max_message_bytes: usize,
    endpoint_buffer_size: usize,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Shared handle to the hub. Cloning is cheap.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

impl Hub {
    /// Creates a hub that rejects payloads larger than `max_message_bytes`
    /// once encoded and buffers up to `endpoint_buffer_size` envelopes per
    /// attached endpoint.
    pub fn new(max_message_bytes: usize, endpoint_buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                next_id: AtomicU64::new(0),
                max_message_bytes,
                endpoint_buffer_size: endpoint_buffer_size.max(1),
            }),
        }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.inner.max_message_bytes
    }

    /// Makes `address` reachable. A later attach under the same address
    /// replaces this one, closing its endpoint.
    pub fn attach(&self, address: ContextAddress) -> Endpoint {
        let (tx, rx) = mpsc::channel(self.inner.endpoint_buffer_size);
        let id = self.inner.next_id();

        let replaced = self
            .inner
            .registry
            .write()
            .endpoints
            .insert(address.clone(), Attached { id, tx });

        if replaced.is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!(%address, "Endpoint replaced by a newer attachment");
        }

        Endpoint {
            address,
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Whether a context is currently attached under `address`.
    pub fn is_attached(&self, address: &ContextAddress) -> bool {
        self.inner.registry.read().endpoints.contains_key(address)
    }

    /// Number of live subscriptions on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner
            .registry
            .read()
            .listeners
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Routes one message from `sender` to `destination`.
    ///
    /// Messages for the background are fanned out to local subscriptions;
    /// everything else is queued on the destination's endpoint, waiting for
    /// room if its buffer is full.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::PayloadTooLarge`] if the encoded payload exceeds the
    ///   message ceiling.
    /// - [`DeliveryError::Unreachable`] if nothing is attached under
    ///   `destination`.
    /// - [`DeliveryError::Closed`] if the destination detached while the
    ///   message was being queued.
    pub async fn route(
        &self,
        sender: SenderMeta,
        channel: &str,
        payload: Value,
        destination: &ContextAddress,
    ) -> Result<(), DeliveryError> {
        self.check_size(&payload)?;

        if destination.is_background() {
            self.deliver_background(channel, &sender, &payload);
            return Ok(());
        }

        let tx = self.endpoint_tx(destination)?;
        let envelope = Envelope {
            channel: channel.to_string(),
            sender,
            payload,
        };
        tx.send(envelope).await.map_err(|_| DeliveryError::Closed {
            destination: destination.to_string(),
        })
    }

    /// Like [`route`](Self::route), but fails with [`DeliveryError::Busy`]
    /// instead of waiting when the destination's buffer is full.
    ///
    /// Relayed connections forward with this: a connection blocked on a peer
    /// stops draining its own endpoint, and two such peers would wait on each
    /// other forever.
    ///
    /// # Errors
    ///
    /// As [`route`](Self::route), plus [`DeliveryError::Busy`].
    pub fn try_route(
        &self,
        sender: SenderMeta,
        channel: &str,
        payload: Value,
        destination: &ContextAddress,
    ) -> Result<(), DeliveryError> {
        self.check_size(&payload)?;

        if destination.is_background() {
            self.deliver_background(channel, &sender, &payload);
            return Ok(());
        }

        let envelope = Envelope {
            channel: channel.to_string(),
            sender,
            payload,
        };
        self.endpoint_tx(destination)?
            .try_send(envelope)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Busy {
                    destination: destination.to_string(),
                },
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed {
                    destination: destination.to_string(),
                },
            })
    }

    fn deliver_background(&self, channel: &str, sender: &SenderMeta, payload: &Value) {
        let _delivered = self.deliver_local(channel, sender, payload);
        #[cfg(feature = "tracing")]
        tracing::trace!(channel, delivered = _delivered, "Delivered to background");
    }

    fn endpoint_tx(
        &self,
        destination: &ContextAddress,
    ) -> Result<mpsc::Sender<Envelope>, DeliveryError> {
        self.inner
            .registry
            .read()
            .endpoints
            .get(destination)
            .map(|attached| attached.tx.clone())
            .ok_or_else(|| DeliveryError::Unreachable {
                destination: destination.to_string(),
            })
    }

    fn check_size(&self, payload: &Value) -> Result<(), DeliveryError> {
        let size = serde_json::to_vec(payload)
            .map_err(|e| DeliveryError::Encode {
                reason: e.to_string(),
            })?
            .len();
        if size > self.inner.max_message_bytes {
            return Err(DeliveryError::PayloadTooLarge {
                size,
                limit: self.inner.max_message_bytes,
            });
        }
        Ok(())
    }

    /// Hands a copy of the message to every matching subscription and returns
    /// how many accepted it.
    fn deliver_local(&self, channel: &str, sender: &SenderMeta, payload: &Value) -> usize {
        let registry = self.inner.registry.read();
        let Some(listeners) = registry.listeners.get(channel) else {
            return 0;
        };

        listeners
            .iter()
            .filter(|listener| listener.filter.matches(sender))
            .filter(|listener| {
                listener
                    .tx
                    .send(Incoming {
                        payload: payload.clone(),
                        sender: sender.clone(),
                    })
                    .is_ok()
            })
            .count()
    }
}

impl MessageBridge for Hub {
    async fn send(
        &self,
        channel: &str,
        payload: Value,
        destination: &ContextAddress,
    ) -> Result<(), DeliveryError> {
        self.route(SenderMeta::background(), channel, payload, destination)
            .await
    }

    fn subscribe(&self, channel: &str, filter: SenderFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id();

        self.inner
            .registry
            .write()
            .listeners
            .entry(channel.to_string())
            .or_default()
            .push(Listener { id, filter, tx });

        let hub = Arc::downgrade(&self.inner);
        let channel = channel.to_string();
        Subscription::new(rx, move || {
            let Some(inner) = hub.upgrade() else {
                return;
            };
            let mut registry = inner.registry.write();
            if let Some(listeners) = registry.listeners.get_mut(&channel) {
                listeners.retain(|listener| listener.id != id);
                if listeners.is_empty() {
                    registry.listeners.remove(&channel);
                }
            }
        })
    }
}

impl core::fmt::Debug for Hub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let registry = self.inner.registry.read();
        f.debug_struct("Hub")
            .field("endpoints", &registry.endpoints.len())
            .field("channels", &registry.listeners.len())
            .field("max_message_bytes", &self.inner.max_message_bytes)
            .finish()
    }
}

/// An attached context's inbox. Dropping it detaches the context.
#[derive(Debug)]
pub struct Endpoint {
    address: ContextAddress,
    id: u64,
    rx: mpsc::Receiver<Envelope>,
    hub: Weak<Inner>,
}

impl Endpoint {
    pub const fn address(&self) -> &ContextAddress {
        &self.address
    }

    /// Waits for the next envelope. Returns `None` once this attachment has
    /// been replaced or the hub is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let Some(inner) = self.hub.upgrade() else {
            return;
        };
        let mut registry = inner.registry.write();
        if registry
            .endpoints
            .get(&self.address)
            .is_some_and(|attached| attached.id == self.id)
        {
            registry.endpoints.remove(&self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sigbridge_core::types::WEB_ACCESSIBLE;

    fn tab(id: u64) -> ContextAddress {
        ContextAddress::new(WEB_ACCESSIBLE, id)
    }

    #[tokio::test]
    async fn delivers_to_attached_endpoint() {
        let hub = Hub::new(1024, 4);
        let mut endpoint = hub.attach(tab(1));

        hub.send("auth_chunk", json!({"a": 1}), &tab(1)).await.unwrap();

        let envelope = endpoint.recv().await.unwrap();
        assert_eq!(envelope.channel, "auth_chunk");
        assert_eq!(envelope.sender, SenderMeta::background());
        assert_eq!(envelope.payload, json!({"a": 1}));
    }

    #[tokio::test]
    async fn unattached_destination_is_unreachable() {
        let hub = Hub::new(1024, 4);
        assert_eq!(
            hub.send("x", Value::Null, &tab(9)).await,
            Err(DeliveryError::Unreachable {
                destination: "web_accessible@9".to_string()
            })
        );

        let endpoint = hub.attach(tab(9));
        assert!(hub.is_attached(&tab(9)));
        drop(endpoint);
        assert!(!hub.is_attached(&tab(9)));
        assert!(matches!(
            hub.send("x", Value::Null, &tab(9)).await,
            Err(DeliveryError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_payloads() {
        let hub = Hub::new(16, 4);
        let _endpoint = hub.attach(tab(1));

        let err = hub
            .send("x", json!("this string is far too long"), &tab(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::PayloadTooLarge { limit: 16, .. }
        ));
    }

    #[tokio::test]
    async fn try_route_fails_fast_on_a_full_queue() {
        let hub = Hub::new(1024, 1);
        let mut endpoint = hub.attach(tab(1));
        let from = SenderMeta::new("popup", None);

        hub.try_route(from.clone(), "x", json!(1), &tab(1)).unwrap();
        assert_eq!(
            hub.try_route(from.clone(), "x", json!(2), &tab(1)),
            Err(DeliveryError::Busy {
                destination: "web_accessible@1".to_string()
            })
        );

        assert_eq!(endpoint.recv().await.unwrap().payload, json!(1));
        hub.try_route(from, "x", json!(3), &tab(1)).unwrap();
        assert_eq!(endpoint.recv().await.unwrap().payload, json!(3));
    }

    #[tokio::test]
    async fn newer_attachment_replaces_older() {
        let hub = Hub::new(1024, 4);
        let mut old = hub.attach(tab(1));
        let mut new = hub.attach(tab(1));

        assert_eq!(old.recv().await, None);
        drop(old);
        assert!(hub.is_attached(&tab(1)));

        hub.send("x", json!(1), &tab(1)).await.unwrap();
        assert_eq!(new.recv().await.unwrap().payload, json!(1));
    }

    #[tokio::test]
    async fn background_messages_fan_out_through_filters() {
        let hub = Hub::new(1024, 4);
        let mut any = hub.subscribe("auth_listening", SenderFilter::Any);
        let mut web = hub.subscribe("auth_listening", SenderFilter::context(WEB_ACCESSIBLE));
        assert_eq!(hub.listener_count("auth_listening"), 2);

        let content = SenderMeta::new("content_script", Some(3));
        hub.route(
            content.clone(),
            "auth_listening",
            Value::Null,
            &ContextAddress::background(),
        )
        .await
        .unwrap();
        let web_sender = SenderMeta::new(WEB_ACCESSIBLE, Some(3));
        hub.route(
            web_sender.clone(),
            "auth_listening",
            Value::Null,
            &ContextAddress::background(),
        )
        .await
        .unwrap();

        assert_eq!(any.recv().await.unwrap().sender, content);
        assert_eq!(any.recv().await.unwrap().sender, web_sender);
        assert_eq!(web.recv().await.unwrap().sender, web_sender);

        drop(any);
        assert_eq!(hub.listener_count("auth_listening"), 1);
        drop(web);
        assert_eq!(hub.listener_count("auth_listening"), 0);
    }
}
