//! Conversation switching.
//!
//! [`ChatSync`] ties the store, history loader, live stream and submitter to
//! the one active conversation. A switch always closes the previous stream
//! (and waits for it) before the store is reset.

use std::sync::Arc;

use shared::{
    config::ClientConfig,
    models::{ConversationId, Message, UserId},
};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, instrument, warn};

use crate::{
    api::{ChatApi, HttpChatApi},
    error::{ClientError, ClientResult},
    history::HistoryLoader,
    session::SessionContext,
    store::{Scope, StoreEvent, StoreHandle},
    stream::{LiveStream, StreamState},
    submit::OutboundSubmitter,
    transport::{PushTransport, WsTransport},
};

#[derive(Debug, Clone)]
struct ActiveConversation {
    scope: Scope,
    stream: Arc<LiveStream>,
}

/// Outcome of [`ChatSync::activate`].
#[derive(Debug)]
pub struct SwitchReport {
    pub conversation_id: ConversationId,
    /// Messages seeded from history.
    pub loaded: usize,
    /// Set when the history could not be loaded; the live stream is opened anyway.
    pub history_error: Option<ClientError>,
}

#[derive(Debug)]
pub struct ChatSync {
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn PushTransport>,
    session: Arc<SessionContext>,
    store: StoreHandle,
    loader: HistoryLoader,
    submitter: OutboundSubmitter,
    active: Mutex<Option<ActiveConversation>>,
}

impl ChatSync {
    pub fn new(
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn PushTransport>,
        session: Arc<SessionContext>,
        config: &ClientConfig,
    ) -> Self {
        let store = StoreHandle::new(config.channel_capacity);
        Self {
            loader: HistoryLoader::new(Arc::clone(&api)),
            submitter: OutboundSubmitter::new(
                Arc::clone(&api),
                store.clone(),
                config.max_image_bytes,
            ),
            api,
            transport,
            session,
            store,
            active: Mutex::new(None),
        }
    }

    /// Wires the HTTP API and WebSocket transport from configuration.
    ///
    /// # Errors
    /// Returns an error when either client cannot be built from `config`.
    pub fn connect(config: &ClientConfig, session: Arc<SessionContext>) -> ClientResult<Self> {
        let api = Arc::new(HttpChatApi::new(config)?);
        let transport = Arc::new(WsTransport::new(config)?);
        Ok(Self::new(api, transport, session, config))
    }

    #[must_use]
    pub fn api(&self) -> &Arc<dyn ChatApi> {
        &self.api
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Makes `conversation_id` the active conversation.
    ///
    /// # Errors
    /// Returns an authorization error without opening a stream; the store is
    /// left with no active conversation. Other history failures are reported
    /// in [`SwitchReport::history_error`].
    #[instrument(name = "sync.activate", skip(self), err)]
    pub async fn activate(&self, conversation_id: ConversationId) -> ClientResult<SwitchReport> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.stream.close().await;
        }

        let session = match self.session.current() {
            Ok(session) => session,
            Err(err) => {
                self.store.reset_to(None).await;
                return Err(err);
            }
        };

        let Some(scope) = self.store.reset_to(Some(conversation_id)).await else {
            return Err(ClientError::NoActiveConversation);
        };

        let (loaded, history_error) =
            match self.loader.load_into(&scope, &session, &self.store).await {
                Ok(loaded) => (loaded, None),
                Err(err) if err.is_auth_failure() => {
                    self.store.reset_to(None).await;
                    return Err(err);
                }
                Err(err) => {
                    warn!(%conversation_id, error = %err, "history unavailable");
                    (0, Some(err))
                }
            };

        let stream = Arc::new(LiveStream::open(
            Arc::clone(&self.transport),
            scope,
            &session,
            self.store.clone(),
        ));
        *active = Some(ActiveConversation { scope, stream });
        info!(%conversation_id, loaded, "conversation active");

        Ok(SwitchReport {
            conversation_id,
            loaded,
            history_error,
        })
    }

    /// Resolves the conversation shared with `username` and activates it.
    ///
    /// # Errors
    /// Returns the resolution error (e.g. [`ClientError::NotFound`]) without
    /// touching the current conversation.
    pub async fn open_with(&self, username: &str) -> ClientResult<SwitchReport> {
        let session = self.session.current()?;
        let conversation_id = self.api.resolve_conversation(username, &session).await?;
        self.activate(conversation_id).await
    }

    /// Closes the live stream and empties the store.
    pub async fn deactivate(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.stream.close().await;
        }
        self.store.reset_to(None).await;
    }

    /// # Errors
    /// [`ClientError::NoActiveConversation`], validation, authorization or API errors.
    pub async fn send_text(&self, text: &str) -> ClientResult<Message> {
        let target = self.target().await?;
        let session = self.session.current()?;
        self.submitter
            .send_text(&target.scope, Some(&target.stream), text, &session)
            .await
    }

    /// # Errors
    /// [`ClientError::NoActiveConversation`], validation or authorization errors.
    pub async fn send_image(&self, image: &[u8]) -> ClientResult<Message> {
        let target = self.target().await?;
        let session = self.session.current()?;
        self.submitter
            .send_image(&target.scope, Some(&target.stream), image, &session)
            .await
    }

    async fn target(&self) -> ClientResult<ActiveConversation> {
        self.active
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NoActiveConversation)
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.store.snapshot().await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.scope.conversation_id())
    }

    pub async fn stream_state(&self) -> StreamState {
        self.active
            .lock()
            .await
            .as_ref()
            .map_or(StreamState::Closed, |active| active.stream.state())
    }

    /// Waits for the active stream's handshake to finish.
    pub async fn wait_for_stream(&self) -> StreamState {
        let stream = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| Arc::clone(&active.stream));
        match stream {
            Some(stream) => stream.wait_until_settled().await,
            None => StreamState::Closed,
        }
    }

    /// The session user, for telling sent from received messages.
    ///
    /// # Errors
    /// [`ClientError::Unauthorized`] when nobody is logged in.
    pub fn me(&self) -> ClientResult<UserId> {
        Ok(self.session.current()?.user_id)
    }
}
