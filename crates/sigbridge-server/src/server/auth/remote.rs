use super::{AuthResult, Authenticator};
use crate::server::bridge::MessageBridge;
use core::time::Duration;
use serde_json::Value;
use sigbridge_core::{
    address::{ContextAddress, SenderFilter},
    error::{AuthError, DeliveryError},
    types::{AUTH_REQUEST, AUTH_RESULT, AuthRequest, AuthResponse, SignedTransaction},
};
use tokio::time::timeout;

/// Authenticates by asking the popup context over the bridge.
///
/// The request goes out on [`AUTH_REQUEST`]; the answer is the first
/// [`AUTH_RESULT`] message from the popup's context that carries the same
/// `collectionID`. Results for other collections are ignored, so several
/// requests can be outstanding at once.
#[derive(Clone, Debug)]
pub struct BridgeAuthenticator<B> {
    bridge: B,
    destination: ContextAddress,
    timeout: Duration,
}

impl<B: MessageBridge> BridgeAuthenticator<B> {
    pub const fn new(bridge: B, destination: ContextAddress, timeout: Duration) -> Self {
        Self {
            bridge,
            destination,
            timeout,
        }
    }

    async fn await_response(
        &self,
        request: &AuthRequest,
        results: &mut crate::server::bridge::Subscription,
    ) -> AuthResult<Option<SignedTransaction>> {
        while let Some(incoming) = results.recv().await {
            let matches = incoming
                .payload
                .get("collectionID")
                .and_then(Value::as_str)
                .is_some_and(|id| request.collection_id == id);
            if !matches {
                continue;
            }

            let response: AuthResponse =
                serde_json::from_value(incoming.payload).map_err(|e| AuthError::Malformed {
                    reason: e.to_string(),
                })?;
            return match response.error {
                Some(reason) => Err(AuthError::Rejected { reason }),
                None => Ok(response.data),
            };
        }

        Err(AuthError::Unavailable(DeliveryError::Closed {
            destination: self.destination.to_string(),
        }))
    }
}

impl<B: MessageBridge> Authenticator for BridgeAuthenticator<B> {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(collection_id = %request.collection_id))
    )]
    async fn authenticate(&self, request: AuthRequest) -> AuthResult<Option<SignedTransaction>> {
        // Listen before asking so a fast answer cannot slip past.
        let mut results = self.bridge.subscribe(
            AUTH_RESULT,
            SenderFilter::context(self.destination.context()),
        );

        let payload = serde_json::to_value(&request).map_err(|e| DeliveryError::Encode {
            reason: e.to_string(),
        })?;
        self.bridge
            .send(AUTH_REQUEST, payload, &self.destination)
            .await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(destination = %self.destination, "Authentication requested");

        timeout(self.timeout, self.await_response(&request, &mut results))
            .await
            .map_err(|_| AuthError::TimedOut {
                after: self.timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::bridge::Hub;
    use serde_json::json;
    use sigbridge_core::{
        address::SenderMeta,
        types::{CollectionId, Transaction},
    };

    fn request(id: &str) -> AuthRequest {
        AuthRequest::sign(
            "https://app.example",
            "addr-1",
            Transaction::new(vec![1, 2, 3]).stripped(),
            CollectionId::from(id),
        )
    }

    async fn answer(hub: &Hub, context: &str, payload: Value) {
        hub.route(
            SenderMeta::new(context, None),
            AUTH_RESULT,
            payload,
            &ContextAddress::background(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn resolves_with_matching_signature() {
        let hub = Hub::new(4096, 8);
        let mut popup = hub.attach(ContextAddress::unbound("popup"));
        let auth = BridgeAuthenticator::new(
            hub.clone(),
            ContextAddress::unbound("popup"),
            Duration::from_secs(5),
        );

        let task = tokio::spawn(async move { auth.authenticate(request("c1")).await });

        let envelope = popup.recv().await.unwrap();
        assert_eq!(envelope.channel, AUTH_REQUEST);
        assert_eq!(envelope.payload["collectionID"], "c1");
        assert_eq!(envelope.payload["type"], "sign");

        // Spoofed and unrelated answers are ignored.
        answer(&hub, "content_script", json!({"collectionID": "c1", "error": "no"})).await;
        answer(&hub, "popup", json!({"collectionID": "other", "error": "no"})).await;
        answer(
            &hub,
            "popup",
            json!({"collectionID": "c1", "data": {"id": "tx", "signature": "sig"}}),
        )
        .await;

        assert_eq!(
            task.await.unwrap(),
            Ok(Some(SignedTransaction {
                id: "tx".to_string(),
                signature: "sig".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn maps_error_to_rejection() {
        let hub = Hub::new(4096, 8);
        let mut popup = hub.attach(ContextAddress::unbound("popup"));
        let auth = BridgeAuthenticator::new(
            hub.clone(),
            ContextAddress::unbound("popup"),
            Duration::from_secs(5),
        );

        let task = tokio::spawn(async move { auth.authenticate(request("c2")).await });
        popup.recv().await.unwrap();
        answer(&hub, "popup", json!({"collectionID": "c2", "error": "User cancelled"})).await;

        assert_eq!(
            task.await.unwrap(),
            Err(AuthError::Rejected {
                reason: "User cancelled".to_string()
            })
        );
    }

    #[tokio::test]
    async fn unreachable_popup_is_unavailable() {
        let hub = Hub::new(4096, 8);
        let auth = BridgeAuthenticator::new(
            hub.clone(),
            ContextAddress::unbound("popup"),
            Duration::from_secs(5),
        );

        assert!(matches!(
            auth.authenticate(request("c3")).await,
            Err(AuthError::Unavailable(DeliveryError::Unreachable { .. }))
        ));
        assert_eq!(hub.listener_count(AUTH_RESULT), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_an_answer() {
        let hub = Hub::new(4096, 8);
        let _popup = hub.attach(ContextAddress::unbound("popup"));
        let auth = BridgeAuthenticator::new(
            hub.clone(),
            ContextAddress::unbound("popup"),
            Duration::from_secs(30),
        );

        assert_eq!(
            auth.authenticate(request("c4")).await,
            Err(AuthError::TimedOut {
                after: Duration::from_secs(30)
            })
        );
    }
}
