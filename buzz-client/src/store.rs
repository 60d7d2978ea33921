//! Ordered, deduplicated message storage for the active conversation.

use std::{collections::HashSet, fmt, sync::Arc};

use shared::models::{ConversationId, Message, MessageId};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

/// Messages in client-observed append order, unique by `message_id`.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` unless an entry with the same id exists.
    pub fn insert_if_absent(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.message_id) {
            return false;
        }
        self.ids.insert(message.message_id.clone());
        self.messages.push(message);
        true
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }

    #[must_use]
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.ids.contains(message_id)
    }
}

/// Ticket naming the conversation and reset generation a writer belongs to.
///
/// Writes carrying a ticket from an earlier generation are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    conversation_id: ConversationId,
    generation: u64,
}

impl Scope {
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Outcome of a scoped insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    Duplicate,
    /// The scope was superseded or the message belongs to another conversation.
    Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub foreign: usize,
    pub stale: bool,
}

/// Change notifications for readers of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Reset(Option<ConversationId>),
    Seeded {
        conversation_id: ConversationId,
        count: usize,
    },
    Appended(Message),
}

#[derive(Debug, Default)]
struct ScopedStore {
    active: Option<ConversationId>,
    generation: u64,
    messages: MessageStore,
}

impl ScopedStore {
    fn accepts(&self, scope: &Scope) -> bool {
        self.generation == scope.generation && self.active == Some(scope.conversation_id)
    }
}

/// Shared handle to the single active store.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<RwLock<ScopedStore>>,
    events: broadcast::Sender<StoreEvent>,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StoreHandle {
    #[must_use]
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(RwLock::new(ScopedStore::default())),
            events,
        }
    }

    /// Clears the store and points it at `conversation_id`, invalidating every
    /// outstanding [`Scope`].
    pub(crate) async fn reset_to(&self, conversation_id: Option<ConversationId>) -> Option<Scope> {
        let mut guard = self.inner.write().await;
        guard.generation = guard.generation.wrapping_add(1);
        guard.active = conversation_id;
        guard.messages.reset();
        let _ = self.events.send(StoreEvent::Reset(conversation_id));
        debug!(
            conversation_id = ?conversation_id,
            generation = guard.generation,
            "message store reset"
        );

        conversation_id.map(|conversation_id| Scope {
            conversation_id,
            generation: guard.generation,
        })
    }

    /// Replaces the content of a current scope with a history sequence.
    pub(crate) async fn seed(&self, scope: &Scope, history: Vec<Message>) -> SeedSummary {
        let mut guard = self.inner.write().await;
        let mut summary = SeedSummary::default();
        if !guard.accepts(scope) {
            summary.stale = true;
            return summary;
        }

        guard.messages.reset();
        for message in history {
            if message.conversation_id != scope.conversation_id {
                summary.foreign += 1;
            } else if guard.messages.insert_if_absent(message) {
                summary.inserted += 1;
            } else {
                summary.duplicates += 1;
            }
        }

        let _ = self.events.send(StoreEvent::Seeded {
            conversation_id: scope.conversation_id,
            count: guard.messages.len(),
        });
        summary
    }

    /// Appends a message on behalf of a scoped writer.
    pub(crate) async fn insert(&self, scope: &Scope, message: Message) -> Insertion {
        let mut guard = self.inner.write().await;
        if !guard.accepts(scope) || message.conversation_id != scope.conversation_id {
            debug!(
                message_id = %message.message_id,
                conversation_id = %message.conversation_id,
                "discarding message for inactive scope"
            );
            return Insertion::Stale;
        }

        if guard.messages.insert_if_absent(message.clone()) {
            let _ = self.events.send(StoreEvent::Appended(message));
            Insertion::Inserted
        } else {
            debug!(message_id = %message.message_id, "duplicate message ignored");
            Insertion::Duplicate
        }
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.read().await.messages.snapshot().to_vec()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.messages.is_empty()
    }

    pub async fn active(&self) -> Option<ConversationId> {
        self.inner.read().await.active
    }

    pub async fn is_current(&self, scope: &Scope) -> bool {
        self.inner.read().await.accepts(scope)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
