//! Outbound messages: confirmed text and optimistic images.

use std::sync::Arc;

use metrics::counter;
use shared::models::{ImageData, Message, MessageId, Timestamp};
use tracing::{debug, instrument, warn};

use crate::{
    api::{ChatApi, SendRequest},
    error::{ClientError, ClientResult},
    session::Session,
    store::{Insertion, Scope, StoreHandle},
    stream::LiveStream,
};

/// Sends composed messages: text is confirmed by the server before it is
/// stored, images are stored immediately.
#[derive(Debug, Clone)]
pub struct OutboundSubmitter {
    api: Arc<dyn ChatApi>,
    store: StoreHandle,
    max_image_bytes: usize,
}

impl OutboundSubmitter {
    pub fn new(api: Arc<dyn ChatApi>, store: StoreHandle, max_image_bytes: usize) -> Self {
        Self {
            api,
            store,
            max_image_bytes,
        }
    }

    #[must_use]
    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    /// Posts a text message and stores the server's copy.
    ///
    /// # Errors
    /// [`ClientError::Validation`] for blank text (nothing is sent), otherwise
    /// the API error; nothing is stored on failure.
    #[instrument(
        name = "submit.text",
        skip_all,
        fields(conversation_id = %scope.conversation_id()),
        err
    )]
    pub async fn send_text(
        &self,
        scope: &Scope,
        live: Option<&LiveStream>,
        text: &str,
        session: &Session,
    ) -> ClientResult<Message> {
        if text.trim().is_empty() {
            return Err(ClientError::Validation(
                "Message text cannot be empty".to_string(),
            ));
        }

        let request = SendRequest::text(scope.conversation_id(), text);
        let confirmed = self.api.send(&request, session).await?;
        counter!("buzz_messages_sent_total", "kind" => "text").increment(1);

        if self.store.insert(scope, confirmed.clone()).await == Insertion::Stale {
            debug!(message_id = %confirmed.message_id, "conversation changed before confirmation");
        }
        self.republish(live, &confirmed).await;
        Ok(confirmed)
    }

    /// Stores an image message optimistically, then publishes it on the live
    /// channel.
    ///
    /// The send endpoint only takes text, so images reach the other
    /// participant through the push channel alone. A publish failure is
    /// logged and counted; the stored entry stays.
    ///
    /// # Errors
    /// [`ClientError::Validation`] for an empty or oversized image, checked
    /// before anything is stored or sent.
    #[instrument(
        name = "submit.image",
        skip_all,
        fields(conversation_id = %scope.conversation_id(), bytes = image.len()),
        err
    )]
    pub async fn send_image(
        &self,
        scope: &Scope,
        live: Option<&LiveStream>,
        image: &[u8],
        session: &Session,
    ) -> ClientResult<Message> {
        if image.is_empty() {
            return Err(ClientError::Validation("Image is empty".to_string()));
        }
        if image.len() > self.max_image_bytes {
            return Err(ClientError::Validation(format!(
                "Image is {} bytes; the limit is {} bytes",
                image.len(),
                self.max_image_bytes
            )));
        }

        let message = Message::image(
            MessageId::generate(),
            scope.conversation_id(),
            session.user_id,
            ImageData::from_bytes(image),
        )
        .with_timestamp(Timestamp::now());
        self.store.insert(scope, message.clone()).await;

        let published = match live {
            Some(live) => live.publish(&message).await,
            None => Err(ClientError::StreamNotOpen),
        };
        match published {
            Ok(()) => counter!("buzz_messages_sent_total", "kind" => "image").increment(1),
            Err(err) => {
                counter!("buzz_optimistic_failures_total", "stage" => "publish").increment(1);
                warn!(message_id = %message.message_id, error = %err, "failed to publish image");
            }
        }
        Ok(message)
    }

    async fn republish(&self, live: Option<&LiveStream>, message: &Message) {
        let Some(live) = live else {
            return;
        };
        match live.publish(message).await {
            Ok(()) => {}
            Err(ClientError::StreamNotOpen) => {
                debug!(message_id = %message.message_id, "live stream not open; skipping publish");
            }
            Err(err) => {
                warn!(message_id = %message.message_id, error = %err, "failed to publish message");
            }
        }
    }
}
