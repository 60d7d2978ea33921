//! HTTP client for the chat service endpoints.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, header::AUTHORIZATION};
use serde::de::DeserializeOwned;
use shared::{
    config::ClientConfig,
    models::{
        ChatPartner, Conversation, ConversationId, LoginForm, Message, Profile, TokenResponse,
    },
};
use tracing::{debug, instrument};
use url::Url;

use crate::{
    error::{ClientError, ClientResult},
    session::Session,
};

/// Payload of a send-message call; the server assigns the message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub conversation_id: ConversationId,
    pub text: String,
}

impl SendRequest {
    #[must_use]
    pub fn text(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            text: text.into(),
        }
    }
}

/// The HTTP endpoints the client consumes.
#[async_trait]
pub trait ChatApi: Send + Sync + fmt::Debug {
    async fn login(&self, username: &str, password: &str) -> ClientResult<TokenResponse>;

    async fn profile(&self, session: &Session) -> ClientResult<Profile>;

    async fn list_partners(&self, session: &Session) -> ClientResult<Vec<ChatPartner>>;

    async fn resolve_conversation(
        &self,
        username: &str,
        session: &Session,
    ) -> ClientResult<ConversationId>;

    async fn start_conversation(
        &self,
        username: &str,
        session: &Session,
    ) -> ClientResult<Conversation>;

    async fn history(
        &self,
        conversation_id: ConversationId,
        session: &Session,
    ) -> ClientResult<Vec<Message>>;

    async fn send(&self, request: &SendRequest, session: &Session) -> ClientResult<Message>;
}

/// [`ChatApi`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base: Url,
}

impl HttpChatApi {
    /// Builds a client with the configured timeout.
    ///
    /// # Errors
    /// Returns [`ClientError::Http`] when the TLS backend cannot be initialized.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("buzz/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, config.api_base_url.clone()))
    }

    #[must_use]
    pub fn with_client(client: Client, base: Url) -> Self {
        Self {
            client,
            base: with_trailing_slash(base),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base.join(path)?)
    }

    fn authorized(builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder.header(AUTHORIZATION, session.credential().bearer())
    }
}

pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!(%status, "request rejected");
        return Err(ClientError::from_status(status, &body));
    }

    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ChatApi for HttpChatApi {
    #[instrument(name = "api.login", skip(self, password), err)]
    async fn login(&self, username: &str, password: &str) -> ClientResult<TokenResponse> {
        let response = self
            .client
            .post(self.endpoint("token")?)
            .form(&LoginForm { username, password })
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(name = "api.profile", skip_all, err)]
    async fn profile(&self, session: &Session) -> ClientResult<Profile> {
        let request = self.client.get(self.endpoint("users/me")?);
        let response = Self::authorized(request, session).send().await?;
        decode(response).await
    }

    #[instrument(name = "api.list_partners", skip_all, err)]
    async fn list_partners(&self, session: &Session) -> ClientResult<Vec<ChatPartner>> {
        let request = self.client.get(self.endpoint("conversations/users")?);
        let response = Self::authorized(request, session).send().await?;
        decode(response).await
    }

    #[instrument(name = "api.resolve_conversation", skip(self, session), err)]
    async fn resolve_conversation(
        &self,
        username: &str,
        session: &Session,
    ) -> ClientResult<ConversationId> {
        let request = self
            .client
            .get(self.endpoint("conversations/get-conversation-id")?)
            .query(&[("recipient_username", username)]);
        let response = Self::authorized(request, session).send().await?;
        decode(response).await
    }

    #[instrument(name = "api.start_conversation", skip(self, session), err)]
    async fn start_conversation(
        &self,
        username: &str,
        session: &Session,
    ) -> ClientResult<Conversation> {
        let request = self
            .client
            .post(self.endpoint("new-conversation")?)
            .query(&[("recipient_username", username)]);
        let response = Self::authorized(request, session).send().await?;
        decode(response).await
    }

    #[instrument(name = "api.history", skip(self, session), err)]
    async fn history(
        &self,
        conversation_id: ConversationId,
        session: &Session,
    ) -> ClientResult<Vec<Message>> {
        let path = format!("conversations/{conversation_id}/messages");
        let request = self.client.get(self.endpoint(&path)?);
        let response = Self::authorized(request, session).send().await?;
        decode(response).await
    }

    #[instrument(
        name = "api.send",
        skip_all,
        fields(conversation_id = %request.conversation_id),
        err
    )]
    async fn send(&self, request: &SendRequest, session: &Session) -> ClientResult<Message> {
        let builder = self.client.post(self.endpoint("send-message")?).query(&[
            ("conversation_id", request.conversation_id.to_string()),
            ("message_text", request.text.clone()),
        ]);
        let response = Self::authorized(builder, session).send().await?;
        decode(response).await
    }
}
