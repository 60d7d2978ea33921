pub mod auth;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;
pub mod timestamp;

pub use auth::{LoginForm, Profile, TokenResponse};
pub use conversation::{ChatPartner, Conversation};
pub use errors::ErrorResponse;
pub use ids::{ConversationId, MessageId, UserId};
pub use message::{Direction, ImageData, Message, MessageBody, MessageFormatError, MessageKind};
pub use timestamp::Timestamp;
