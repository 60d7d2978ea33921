#![cfg_attr(not(test), forbid(unsafe_code))]

//! Real-time message synchronization for Buzz conversations.
//!
//! History fetched over HTTP and messages pushed over a WebSocket are merged
//! into one ordered, deduplicated store per active conversation. The entry
//! point is [`ChatSync`]; the pieces it coordinates are public for callers
//! that need finer control.

pub mod api;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod session;
pub mod store;
pub mod stream;
pub mod submit;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ChatApi, HttpChatApi, SendRequest};
pub use coordinator::{ChatSync, SwitchReport};
pub use error::{ClientError, ClientResult};
pub use session::{Credential, Session, SessionContext, SessionFile};
pub use store::{Insertion, MessageStore, Scope, StoreEvent, StoreHandle};
pub use stream::{LiveStream, StreamState};
pub use submit::OutboundSubmitter;
pub use transport::{PushChannel, PushTransport, WsTransport};
