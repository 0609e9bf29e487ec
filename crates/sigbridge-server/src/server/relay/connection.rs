use super::{
    RelayError,
    frame::{ClientFrame, FRAME_OVERHEAD, ServerFrame},
};
use crate::server::bridge::{Envelope, Hub};
use futures::{SinkExt, StreamExt};
use sigbridge_core::{address::SenderMeta, types::BACKGROUND};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};

type Transport<IO> = Framed<IO, LengthDelimitedCodec>;

/// Serves one connected context until it disconnects, its attachment is
/// replaced, or `shutdown` fires.
///
/// # Errors
///
/// Returns a [`RelayError`] if the handshake fails or the socket errors. Bad
/// frames after the handshake are answered with an `error` frame instead.
pub async fn handle_connection<IO>(
    io: IO,
    hub: Hub,
    shutdown: CancellationToken,
) -> Result<(), RelayError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(hub.max_message_bytes().saturating_add(FRAME_OVERHEAD))
        .new_codec();
    let mut framed = Framed::new(io, codec);

    let sender = match handshake(&mut framed).await {
        Ok(sender) => sender,
        Err(e) => {
            let _ = send_frame(&mut framed, &ServerFrame::error(&e)).await;
            return Err(e);
        }
    };

    let mut endpoint = hub.attach(sender.address());
    send_frame(
        &mut framed,
        &ServerFrame::Welcome {
            address: endpoint.address().clone(),
        },
    )
    .await?;

    #[cfg(feature = "tracing")]
    tracing::info!(address = %endpoint.address(), url = ?sender.url, "Context attached");

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            envelope = endpoint.recv() => {
                let Some(Envelope { channel, sender: from, payload }) = envelope else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(address = %endpoint.address(), "Attachment replaced");
                    break;
                };
                send_frame(&mut framed, &ServerFrame::Message { channel, sender: from, payload }).await?;
            }
            frame = framed.next() => {
                let Some(raw) = frame else { break };
                if let Some(reply) = handle_frame(&hub, &sender, &raw?) {
                    send_frame(&mut framed, &reply).await?;
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::info!(address = %endpoint.address(), "Context detached");
    Ok(())
}

async fn handshake<IO>(framed: &mut Transport<IO>) -> Result<SenderMeta, RelayError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let Some(raw) = framed.next().await else {
        return Err(RelayError::Handshake {
            reason: "connection closed before hello".to_string(),
        });
    };

    match ClientFrame::decode(&raw?) {
        Ok(ClientFrame::Hello { context, .. }) if context.is_empty() || context == BACKGROUND => {
            Err(RelayError::Handshake {
                reason: format!("context name \"{context}\" is reserved"),
            })
        }
        Ok(ClientFrame::Hello {
            context,
            tab_id,
            url,
        }) => Ok(SenderMeta {
            context,
            tab_id,
            url,
        }),
        Ok(_) => Err(RelayError::Handshake {
            reason: "expected a hello frame".to_string(),
        }),
        Err(e) => Err(RelayError::Handshake {
            reason: e.to_string(),
        }),
    }
}

/// Forwards without waiting on the destination: this loop also drains the
/// connection's own endpoint, so blocking here could deadlock two peers.
fn handle_frame(hub: &Hub, sender: &SenderMeta, raw: &[u8]) -> Option<ServerFrame> {
    match ClientFrame::decode(raw) {
        Ok(ClientFrame::Message {
            channel,
            destination,
            payload,
        }) => hub
            .try_route(sender.clone(), &channel, payload, &destination)
            .err()
            .map(ServerFrame::error),
        Ok(ClientFrame::Hello { .. }) => Some(ServerFrame::error("Already greeted")),
        Err(e) => Some(ServerFrame::error(format!("Malformed frame: {e}"))),
    }
}

async fn send_frame<IO>(framed: &mut Transport<IO>, frame: &ServerFrame) -> Result<(), RelayError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(frame.encode()?).await?;
    Ok(())
}
