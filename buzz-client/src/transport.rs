//! WebSocket push channel, one connection per conversation.

use std::fmt;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future, stream::BoxStream};
use http::{HeaderValue, header::AUTHORIZATION};
use shared::{config::ClientConfig, models::ConversationId};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Message as WsMessage, client::IntoClientRequest},
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    api::with_trailing_slash,
    error::{ClientError, ClientResult},
    session::Credential,
};

/// An established push channel for one conversation.
///
/// `frames` yields raw text payloads and ends when the server closes the
/// channel. Dropping `outbound` releases the write half.
pub struct PushChannel {
    pub frames: BoxStream<'static, ClientResult<String>>,
    pub outbound: mpsc::Sender<String>,
}

impl fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushChannel")
            .field("outbound_closed", &self.outbound.is_closed())
            .finish_non_exhaustive()
    }
}

/// Opens per-conversation push channels.
#[async_trait]
pub trait PushTransport: Send + Sync + fmt::Debug {
    async fn connect(
        &self,
        conversation_id: ConversationId,
        credential: &Credential,
    ) -> ClientResult<PushChannel>;
}

/// WebSocket push transport.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base: Url,
    outbound_capacity: usize,
}

impl WsTransport {
    /// # Errors
    /// Returns [`ClientError::Config`] when no push channel URL can be derived.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self::with_base(config.ws_url()?, config.channel_capacity))
    }

    #[must_use]
    pub fn with_base(base: Url, outbound_capacity: usize) -> Self {
        Self {
            base: with_trailing_slash(base),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// `<base>/ws/conversations/{id}`.
    ///
    /// # Errors
    /// Returns [`ClientError::Url`] if the path cannot be joined.
    pub fn channel_url(&self, conversation_id: ConversationId) -> ClientResult<Url> {
        Ok(self
            .base
            .join(&format!("ws/conversations/{conversation_id}"))?)
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn connect(
        &self,
        conversation_id: ConversationId,
        credential: &Credential,
    ) -> ClientResult<PushChannel> {
        let url = self.channel_url(conversation_id)?;
        let mut request = url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&credential.bearer()).map_err(|_| {
            ClientError::InvalidCredential("token is not a valid header value".to_string())
        })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _) = connect_async(request).await?;
        debug!(%conversation_id, "push channel handshake complete");
        let (mut sink, stream) = socket.split();

        let (outbound, mut queue) = mpsc::channel::<String>(self.outbound_capacity);
        tokio::spawn(async move {
            while let Some(payload) = queue.recv().await {
                if let Err(err) = sink.send(WsMessage::text(payload)).await {
                    warn!(error = %err, "failed to write to push channel");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let frames = stream
            .take_while(|frame| future::ready(!matches!(frame, Ok(WsMessage::Close(_)))))
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(WsMessage::Text(text)) => Some(Ok(text.to_string())),
                    Ok(WsMessage::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(_) => None,
                    Err(err) => Some(Err(ClientError::from(err))),
                })
            })
            .boxed();

        Ok(PushChannel { frames, outbound })
    }
}
