//! History fetch that seeds the store when a conversation becomes active.

use std::sync::Arc;

use shared::models::{ConversationId, Message};
use tracing::{debug, instrument, warn};

use crate::{
    api::ChatApi,
    error::ClientResult,
    session::Session,
    store::{Scope, StoreHandle},
};

/// One-shot history fetch that seeds the store.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    api: Arc<dyn ChatApi>,
}

impl HistoryLoader {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self { api }
    }

    /// Fetches the ordered history of a conversation.
    ///
    /// # Errors
    /// Propagates the API error for a non-success status or transport failure.
    #[instrument(name = "history.load", skip(self, session), err)]
    pub async fn load(
        &self,
        conversation_id: ConversationId,
        session: &Session,
    ) -> ClientResult<Vec<Message>> {
        self.api.history(conversation_id, session).await
    }

    /// Loads and reset-seeds the store for `scope`; returns the number of
    /// messages stored.
    ///
    /// A result arriving after the scope was superseded is discarded.
    ///
    /// # Errors
    /// Propagates the fetch error; the scope's store is left empty.
    pub async fn load_into(
        &self,
        scope: &Scope,
        session: &Session,
        store: &StoreHandle,
    ) -> ClientResult<usize> {
        let conversation_id = scope.conversation_id();
        let history = match self.load(conversation_id, session).await {
            Ok(history) => history,
            Err(err) => {
                store.seed(scope, Vec::new()).await;
                return Err(err);
            }
        };

        let summary = store.seed(scope, history).await;
        if summary.stale {
            debug!(%conversation_id, "history arrived for an inactive scope");
            return Ok(0);
        }
        if summary.foreign > 0 {
            warn!(
                %conversation_id,
                dropped = summary.foreign,
                "history contained messages from other conversations"
            );
        }
        debug!(
            %conversation_id,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "history seeded"
        );
        Ok(summary.inserted)
    }
}
