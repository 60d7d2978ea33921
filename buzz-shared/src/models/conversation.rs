use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, UserId};

/// A two-party conversation as created by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub user1_id: UserId,
    pub user2_id: UserId,
}

impl Conversation {
    /// The other participant, or `None` when `me` is not part of the conversation.
    #[must_use]
    pub fn peer_of(&self, me: UserId) -> Option<UserId> {
        if self.user1_id == me {
            Some(self.user2_id)
        } else if self.user2_id == me {
            Some(self.user1_id)
        } else {
            None
        }
    }
}

/// Entry of the "people I talk to" listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPartner {
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}
