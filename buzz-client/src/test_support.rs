//! In-memory doubles for the HTTP API and the push transport.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use shared::models::{
    ChatPartner, Conversation, ConversationId, Message, MessageId, Profile, TokenResponse, UserId,
};
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    api::{ChatApi, SendRequest},
    error::{ClientError, ClientResult},
    session::{Credential, Session, test_token},
    transport::{PushChannel, PushTransport},
};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Confirm(&'static str),
    Fail(StatusCode, &'static str),
}

#[derive(Debug)]
pub(crate) struct FakeApi {
    histories: Mutex<HashMap<ConversationId, Result<Vec<Message>, (StatusCode, &'static str)>>>,
    conversations: Mutex<HashMap<String, ConversationId>>,
    send_reply: Mutex<Reply>,
    sent: Mutex<Vec<SendRequest>>,
    history_calls: AtomicUsize,
    history_gate: Option<Arc<Notify>>,
}

impl FakeApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// History requests block until [`FakeApi::release_history`] is called.
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Arc::new(Notify::new()))))
    }

    fn build(history_gate: Option<Arc<Notify>>) -> Self {
        Self {
            histories: Mutex::new(HashMap::new()),
            conversations: Mutex::new(HashMap::new()),
            send_reply: Mutex::new(Reply::Confirm("server-1")),
            sent: Mutex::new(Vec::new()),
            history_calls: AtomicUsize::new(0),
            history_gate,
        }
    }

    pub(crate) fn with_history(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        self.histories
            .lock()
            .unwrap()
            .insert(conversation_id, Ok(messages));
    }

    pub(crate) fn with_history_error(
        &self,
        conversation_id: ConversationId,
        status: StatusCode,
        body: &'static str,
    ) {
        self.histories
            .lock()
            .unwrap()
            .insert(conversation_id, Err((status, body)));
    }

    pub(crate) fn with_conversation(&self, username: &str, conversation_id: ConversationId) {
        self.conversations
            .lock()
            .unwrap()
            .insert(username.to_string(), conversation_id);
    }

    pub(crate) fn reply_with(&self, reply: Reply) {
        *self.send_reply.lock().unwrap() = reply;
    }

    pub(crate) fn release_history(&self) {
        if let Some(gate) = &self.history_gate {
            gate.notify_one();
        }
    }

    pub(crate) fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn login(&self, username: &str, _password: &str) -> ClientResult<TokenResponse> {
        Ok(TokenResponse {
            access_token: test_token(1, username, None),
            token_type: "bearer".to_string(),
        })
    }

    async fn profile(&self, session: &Session) -> ClientResult<Profile> {
        Ok(Profile {
            username: session.username.clone().unwrap_or_default(),
            email: None,
        })
    }

    async fn list_partners(&self, _session: &Session) -> ClientResult<Vec<ChatPartner>> {
        Ok(Vec::new())
    }

    async fn resolve_conversation(
        &self,
        username: &str,
        _session: &Session,
    ) -> ClientResult<ConversationId> {
        self.conversations
            .lock()
            .unwrap()
            .get(username)
            .copied()
            .ok_or_else(|| ClientError::NotFound("Conversation not found".to_string()))
    }

    async fn start_conversation(
        &self,
        username: &str,
        session: &Session,
    ) -> ClientResult<Conversation> {
        let conversation_id = self.resolve_conversation(username, session).await?;
        Ok(Conversation {
            conversation_id,
            user1_id: session.user_id,
            user2_id: UserId(99),
        })
    }

    async fn history(
        &self,
        conversation_id: ConversationId,
        _session: &Session,
    ) -> ClientResult<Vec<Message>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.history_gate {
            gate.notified().await;
        }
        let reply = self.histories.lock().unwrap().get(&conversation_id).cloned();
        match reply {
            Some(Ok(messages)) => Ok(messages),
            Some(Err((status, body))) => Err(ClientError::from_status(status, body)),
            None => Ok(Vec::new()),
        }
    }

    async fn send(&self, request: &SendRequest, session: &Session) -> ClientResult<Message> {
        self.sent.lock().unwrap().push(request.clone());
        let reply = self.send_reply.lock().unwrap().clone();
        match reply {
            Reply::Fail(status, body) => Err(ClientError::from_status(status, body)),
            Reply::Confirm(id) => Ok(Message::text(
                MessageId::from(id),
                request.conversation_id,
                session.user_id,
                request.text.clone(),
            )),
        }
    }
}

/// Server side of one fake push connection.
#[derive(Debug)]
pub(crate) struct RemoteEnd {
    frames: mpsc::UnboundedSender<ClientResult<String>>,
    published: mpsc::Receiver<String>,
}

impl RemoteEnd {
    pub(crate) fn push(&self, payload: String) {
        let _ = self.frames.send(Ok(payload));
    }

    pub(crate) fn fail(&self) {
        let _ = self.frames.send(Err(ClientError::StreamNotOpen));
    }

    pub(crate) fn hang_up(self) {
        drop(self);
    }

    pub(crate) async fn next_published(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.published.recv())
            .await
            .ok()
            .flatten()
    }
}

#[derive(Debug)]
pub(crate) struct FakeTransport {
    remotes: Mutex<HashMap<ConversationId, RemoteEnd>>,
    connected: Notify,
    connects: AtomicUsize,
    credentials: Mutex<Vec<Credential>>,
    gate: Option<Notify>,
    refuse: bool,
}

impl FakeTransport {
    fn build(gate: Option<Notify>, refuse: bool) -> Arc<Self> {
        Arc::new(Self {
            remotes: Mutex::new(HashMap::new()),
            connected: Notify::new(),
            connects: AtomicUsize::new(0),
            credentials: Mutex::new(Vec::new()),
            gate,
            refuse,
        })
    }

    pub(crate) fn new() -> Arc<Self> {
        Self::build(None, false)
    }

    /// Handshakes block until [`FakeTransport::release`] is called.
    pub(crate) fn gated() -> Arc<Self> {
        Self::build(Some(Notify::new()), false)
    }

    pub(crate) fn refusing() -> Arc<Self> {
        Self::build(None, true)
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn credentials(&self) -> Vec<Credential> {
        self.credentials.lock().unwrap().clone()
    }

    /// Takes the server end of the latest connection for `conversation_id`.
    pub(crate) async fn remote(&self, conversation_id: ConversationId) -> RemoteEnd {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notified = self.connected.notified();
                if let Some(end) = self.remotes.lock().unwrap().remove(&conversation_id) {
                    return end;
                }
                notified.await;
            }
        })
        .await
        .expect("no push connection was opened")
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(
        &self,
        conversation_id: ConversationId,
        credential: &Credential,
    ) -> ClientResult<PushChannel> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().unwrap().push(credential.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.refuse {
            return Err(ClientError::Unauthorized);
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (outbound, published) = mpsc::channel(16);
        self.remotes.lock().unwrap().insert(
            conversation_id,
            RemoteEnd {
                frames: frames_tx,
                published,
            },
        );
        self.connected.notify_waiters();

        Ok(PushChannel {
            frames: UnboundedReceiverStream::new(frames_rx).boxed(),
            outbound,
        })
    }
}
