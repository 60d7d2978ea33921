//! Live push stream for the active conversation.
//!
//! `Closed -> Connecting -> Open -> Closed`. Transitions are compare-and-swap
//! on an atomic; `close()` cancels the receive task and waits for it, so no
//! frame is delivered after it returns.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU8, Ordering},
};

use futures_util::StreamExt;
use metrics::counter;
use shared::models::{ConversationId, Message};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, ClientResult},
    session::{Credential, Session},
    store::{Insertion, Scope, StoreHandle},
    transport::{PushChannel, PushTransport},
};

const STATE_CLOSED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Connecting,
    Open,
}

impl StreamState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Closed => STATE_CLOSED,
            Self::Connecting => STATE_CONNECTING,
            Self::Open => STATE_OPEN,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            STATE_CONNECTING => Self::Connecting,
            STATE_OPEN => Self::Open,
            _ => Self::Closed,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

#[derive(Debug)]
struct StreamShared {
    state: AtomicU8,
    changes: watch::Sender<StreamState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
}

impl StreamShared {
    fn new() -> Self {
        let (changes, _) = watch::channel(StreamState::Connecting);
        Self {
            state: AtomicU8::new(STATE_CONNECTING),
            changes,
            outbound: Mutex::new(None),
        }
    }

    fn load(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves `from -> to` only if the stream is still in `from`.
    fn transition(&self, from: StreamState, to: StreamState) -> bool {
        self.changes.send_if_modified(|current| {
            let swapped = self
                .state
                .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if swapped {
                *current = to;
            }
            swapped
        })
    }

    fn mark_closed(&self) -> bool {
        self.changes.send_if_modified(|current| {
            let previous = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
            *current = StreamState::Closed;
            previous != STATE_CLOSED
        })
    }

    fn set_outbound(&self, sender: Option<mpsc::Sender<String>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }

    fn outbound(&self) -> Option<mpsc::Sender<String>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Push stream bound to one conversation scope.
#[derive(Debug)]
pub struct LiveStream {
    conversation_id: ConversationId,
    shared: Arc<StreamShared>,
    token: CancellationToken,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl LiveStream {
    /// Starts connecting in the background; the stream begins in `Connecting`.
    #[must_use]
    pub fn open(
        transport: Arc<dyn PushTransport>,
        scope: Scope,
        session: &Session,
        store: StoreHandle,
    ) -> Self {
        let shared = Arc::new(StreamShared::new());
        let token = CancellationToken::new();
        let conversation_id = scope.conversation_id();
        debug!(%conversation_id, "live stream connecting");

        let task = tokio::spawn(run(
            transport,
            scope,
            session.credential().clone(),
            store,
            Arc::clone(&shared),
            token.clone(),
        ));

        Self {
            conversation_id,
            shared,
            token,
            task: AsyncMutex::new(Some(task)),
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.shared.load()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.shared.changes.subscribe()
    }

    /// Waits until the handshake either succeeded or failed.
    pub async fn wait_until_settled(&self) -> StreamState {
        let mut changes = self.watch_state();
        changes
            .wait_for(|state| *state != StreamState::Connecting)
            .await
            .map_or(StreamState::Closed, |state| *state)
    }

    /// Sends a message to the other subscribers of the conversation.
    ///
    /// # Errors
    /// Returns [`ClientError::StreamNotOpen`] unless the stream is open.
    pub async fn publish(&self, message: &Message) -> ClientResult<()> {
        if self.state() != StreamState::Open {
            return Err(ClientError::StreamNotOpen);
        }
        let sender = self.shared.outbound().ok_or(ClientError::StreamNotOpen)?;
        let payload = serde_json::to_string(message)?;
        sender
            .send(payload)
            .await
            .map_err(|_| ClientError::StreamNotOpen)
    }

    /// Closes the stream and waits for the receive task to finish.
    ///
    /// Safe to call repeatedly; concurrent callers all return after the task
    /// has stopped.
    pub async fn close(&self) {
        if self.shared.mark_closed() {
            info!(conversation_id = %self.conversation_id, "live stream closed");
        }
        self.token.cancel();

        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    warn!(conversation_id = %self.conversation_id, "live stream task panicked");
                }
            }
        }
        self.shared.set_outbound(None);
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    transport: Arc<dyn PushTransport>,
    scope: Scope,
    credential: Credential,
    store: StoreHandle,
    shared: Arc<StreamShared>,
    token: CancellationToken,
) {
    let conversation_id = scope.conversation_id();
    let connected = tokio::select! {
        () = token.cancelled() => return,
        result = transport.connect(conversation_id, &credential) => result,
    };

    let PushChannel { mut frames, outbound } = match connected {
        Ok(channel) => channel,
        Err(err) => {
            warn!(%conversation_id, error = %err, "live stream failed to connect");
            shared.transition(StreamState::Connecting, StreamState::Closed);
            return;
        }
    };

    shared.set_outbound(Some(outbound));
    if !shared.transition(StreamState::Connecting, StreamState::Open) {
        debug!(%conversation_id, "live stream closed during handshake");
        shared.set_outbound(None);
        return;
    }
    info!(%conversation_id, "live stream open");

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(payload)) => deliver(&store, &scope, &payload).await,
                Some(Err(err)) => {
                    warn!(%conversation_id, error = %err, "live stream transport failed");
                    break;
                }
                None => {
                    info!(%conversation_id, "live stream closed by server");
                    break;
                }
            },
        }
    }

    shared.set_outbound(None);
    shared.mark_closed();
}

async fn deliver(store: &StoreHandle, scope: &Scope, payload: &str) {
    counter!("buzz_stream_frames_total").increment(1);
    match serde_json::from_str::<Message>(payload) {
        Ok(message) => {
            if store.insert(scope, message).await == Insertion::Stale {
                debug!(conversation_id = %scope.conversation_id(), "push frame for inactive scope ignored");
            }
        }
        Err(err) => {
            counter!("buzz_stream_frames_dropped_total").increment(1);
            warn!(
                conversation_id = %scope.conversation_id(),
                error = %err,
                "dropping malformed push frame"
            );
        }
    }
}
