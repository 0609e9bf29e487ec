use crate::server::{bridge::MessageBridge, telemetry::increment_chunks_sent};
use sigbridge_core::{
    address::ContextAddress,
    decompose::Decomposition,
    error::{DeliveryError, SigningError},
    types::{AUTH_CHUNK, ChunkMessage},
};

/// Streams every chunk of `decomposition` to `destination`, then the end
/// marker.
///
/// Each send is awaited before the next is issued, so the receiver observes
/// indices `0..N` in order followed by an end marker with index `N`. The first
/// failed send stops the stream: no later chunk and no end marker is sent.
///
/// Returns the number of chunks sent, excluding the end marker.
///
/// # Errors
///
/// Returns [`SigningError::ChunkDelivery`] naming the collection and the index
/// that failed.
pub async fn stream_chunks<B: MessageBridge>(
    bridge: &B,
    destination: &ContextAddress,
    decomposition: &Decomposition,
) -> Result<u64, SigningError> {
    let messages = decomposition
        .chunks()
        .cloned()
        .map(ChunkMessage::from)
        .chain(core::iter::once(ChunkMessage::from(
            decomposition.end_marker(),
        )));

    let mut sent = 0;
    for message in messages {
        let index = message.index();
        send_one(bridge, destination, &message)
            .await
            .map_err(|source| SigningError::ChunkDelivery {
                collection_id: decomposition.collection_id.to_string(),
                index,
                source,
            })?;
        if matches!(message, ChunkMessage::Chunk(_)) {
            sent += 1;
            increment_chunks_sent();
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        collection_id = %decomposition.collection_id,
        %destination,
        chunks = sent,
        "Chunk stream complete"
    );
    Ok(sent)
}

async fn send_one<B: MessageBridge>(
    bridge: &B,
    destination: &ContextAddress,
    message: &ChunkMessage,
) -> Result<(), DeliveryError> {
    let payload = message.to_payload().map_err(|e| DeliveryError::Encode {
        reason: e.to_string(),
    })?;
    bridge.send(AUTH_CHUNK, payload, destination).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::bridge::{Hub, Subscription};
    use serde_json::Value;
    use sigbridge_core::{
        address::SenderFilter,
        assemble::ChunkAssembler,
        decompose::decompose,
        types::{Transaction, WEB_ACCESSIBLE},
    };

    #[tokio::test]
    async fn receiver_rebuilds_the_streamed_transaction() {
        let hub = Hub::new(64 * 1024, 64);
        let destination = ContextAddress::new(WEB_ACCESSIBLE, 1);
        let mut endpoint = hub.attach(destination.clone());

        let tx = Transaction::new(vec![42_u8; 300])
            .with_tag("App-Name", "test")
            .with_field("target", "t");
        let d = decompose(&tx, 64).unwrap();

        let sent = stream_chunks(&hub, &destination, &d).await.unwrap();
        assert_eq!(sent, d.len() as u64);

        let mut assembler = ChunkAssembler::new(d.collection_id.clone(), d.transaction.clone());
        let mut rebuilt = None;
        while rebuilt.is_none() {
            let envelope = endpoint.recv().await.unwrap();
            assert_eq!(envelope.channel, AUTH_CHUNK);
            let message = ChunkMessage::from_payload(envelope.payload).unwrap();
            rebuilt = assembler.push(message).unwrap();
        }
        assert_eq!(rebuilt, Some(tx));
    }

    #[tokio::test]
    async fn unreachable_destination_fails_on_first_chunk() {
        let hub = Hub::new(64 * 1024, 64);
        let d = decompose(&Transaction::new(vec![1_u8; 10]), 4).unwrap();

        let err = stream_chunks(&hub, &ContextAddress::new(WEB_ACCESSIBLE, 2), &d)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SigningError::ChunkDelivery { index: 0, ref collection_id, .. }
                if *collection_id == d.collection_id.to_string()
        ));
    }

    /// Rejects the chunk sent with index `fail_at`.
    #[derive(Clone)]
    struct RejectAt {
        hub: Hub,
        fail_at: u64,
    }

    impl MessageBridge for RejectAt {
        async fn send(
            &self,
            channel: &str,
            payload: Value,
            destination: &ContextAddress,
        ) -> Result<(), DeliveryError> {
            if payload.get("index").and_then(Value::as_u64) == Some(self.fail_at) {
                return Err(DeliveryError::Busy {
                    destination: destination.to_string(),
                });
            }
            self.hub.send(channel, payload, destination).await
        }

        fn subscribe(&self, channel: &str, filter: SenderFilter) -> Subscription {
            self.hub.subscribe(channel, filter)
        }
    }

    #[tokio::test]
    async fn chunks_before_a_failure_are_delivered_and_nothing_after() {
        let hub = Hub::new(64 * 1024, 64);
        let destination = ContextAddress::new(WEB_ACCESSIBLE, 1);
        let mut endpoint = hub.attach(destination.clone());
        let d = decompose(&Transaction::new(vec![7_u8; 40]), 4).unwrap();
        let bridge = RejectAt { hub, fail_at: 3 };

        let err = stream_chunks(&bridge, &destination, &d).await.unwrap_err();
        assert!(matches!(err, SigningError::ChunkDelivery { index: 3, .. }));
        drop(bridge);

        let mut delivered = Vec::new();
        while let Some(envelope) = endpoint.recv().await {
            delivered.push(ChunkMessage::from_payload(envelope.payload).unwrap().index());
        }
        assert_eq!(delivered, vec![0, 1, 2]);
    }
}
