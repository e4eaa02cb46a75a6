//! REST API client for the social to-do backend.
//!
//! Wraps the list, item, user-search, invite and auth endpoints using
//! [`reqwest`]. Every request carries the current bearer credential from
//! the shared [`SessionController`]; a 401 on anything other than the
//! login/registration endpoints ends that session exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use socialtodo_core::error::CoreError;
use socialtodo_core::forms::{self, Credentials, ItemUpdate, NewItem, NewList, Registration};
use socialtodo_core::models::{TodoItem, TodoList, User, UserRef};
use socialtodo_core::normalize;
use socialtodo_core::session::{Session, SessionController, SessionEndReason};
use socialtodo_core::types::DbId;

use crate::config::ClientConfig;

/// Search terms shorter than this (after trimming) never hit the server.
pub const MIN_SEARCH_LEN: usize = 2;

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server rejected the credential. The session has been ended.
    #[error("Unauthorized")]
    Unauthorized,

    /// A 4xx response carrying a server-supplied message.
    #[error("{message}")]
    Validation { status: u16, message: String },

    /// Any other non-2xx response.
    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    /// Login succeeded but no token came back.
    #[error("No authentication token received")]
    MissingToken,

    /// A 2xx response without a field the caller needs.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Client-side validation or session bookkeeping failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The owning view was closed while the request was in flight.
    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Text to show the user. Server and validation messages are passed
    /// through verbatim; everything else collapses to `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::Core(CoreError::Validation(message)) => message.clone(),
            ApiError::MissingToken => self.to_string(),
            ApiError::Unauthorized => "Your session has expired. Please log in again.".into(),
            _ => fallback.to_string(),
        }
    }
}

/// Item endpoints the list view depends on.
#[async_trait]
pub trait ItemsApi: Send + Sync {
    async fn list_items(&self, list_id: DbId) -> Result<Vec<TodoItem>, ApiError>;
    async fn create_item(&self, list_id: DbId, form: &NewItem)
        -> Result<Option<TodoItem>, ApiError>;
    async fn update_item(
        &self,
        item_id: DbId,
        form: &ItemUpdate,
    ) -> Result<Option<TodoItem>, ApiError>;
    async fn toggle_item(&self, item_id: DbId) -> Result<Option<TodoItem>, ApiError>;
    async fn delete_item(&self, item_id: DbId) -> Result<(), ApiError>;
}

/// Signs private-channel subscriptions for a connection's socket id.
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String, ApiError>;
}

/// Whether a 401 from an endpoint should end the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    /// Normal endpoints: 401 ends the session.
    Session,
    /// Login/registration: 401 means bad credentials, not an expired session.
    Anonymous,
}

/// HTTP client for the backend.
pub struct TodoApi {
    client: reqwest::Client,
    base_url: String,
    session: Arc<SessionController>,
}

impl TodoApi {
    /// * `base_url` - REST base, e.g. `http://social-todo-list.test/api`.
    pub fn new(base_url: String, session: Arc<SessionController>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, session)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        session: Arc<SessionController>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    /// Build a client with the configured base URL and request timeout.
    pub fn from_config(
        config: &ClientConfig,
        session: Arc<SessionController>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config.api_url.clone(), session))
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    // ---- auth ----

    /// `POST /auth/login`. Starts a session on success.
    pub async fn login(&self, credentials: &Credentials) -> Result<User, ApiError> {
        forms::check(credentials)?;
        let body = self
            .send(self.client.post(self.url("auth/login")).json(credentials), Guard::Anonymous)
            .await?;

        let data = if body.get("data").is_some_and(Value::is_object) {
            body["data"].clone()
        } else {
            body
        };
        let token = data
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::MissingToken)?
            .to_string();
        let user: User = serde_json::from_value(data)
            .map_err(|e| ApiError::UnexpectedResponse(format!("login user: {e}")))?;

        self.session.start(Session {
            token,
            user: Some(user.clone()),
        })?;
        tracing::info!(user_id = user.id, "Logged in");
        Ok(user)
    }

    /// `POST /auth/register`. Does not sign the new account in.
    pub async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        forms::check(registration)?;
        self.send(
            self.client.post(self.url("auth/register")).json(registration),
            Guard::Anonymous,
        )
        .await?;
        tracing::info!(username = %registration.username, "Registered account");
        Ok(())
    }

    /// `GET /auth/user`. Refreshes the cached user on success.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        let body = self
            .send(self.client.get(self.url("auth/user")), Guard::Session)
            .await?;
        let user: User = normalize::extract_entity(&body)
            .ok_or_else(|| ApiError::UnexpectedResponse("auth/user returned no user".into()))?;
        self.session.set_user(user.clone())?;
        Ok(user)
    }

    /// Local sign-out. Returns `false` if there was no session.
    pub fn logout(&self) -> bool {
        self.session.end_session(SessionEndReason::Logout)
    }

    // ---- lists ----

    /// `GET /todos/list`.
    pub async fn lists(&self) -> Result<Vec<TodoList>, ApiError> {
        let body = self
            .send(self.client.get(self.url("todos/list")), Guard::Session)
            .await?;
        Ok(normalize::extract_lists(&body))
    }

    /// `POST /todos/create`.
    pub async fn create_list(&self, form: &NewList) -> Result<Option<TodoList>, ApiError> {
        forms::check(form)?;
        let body = self
            .send(self.client.post(self.url("todos/create")).json(form), Guard::Session)
            .await?;
        Ok(normalize::extract_entity(&body))
    }

    /// `DELETE /todos/destroy/{id}`.
    pub async fn delete_list(&self, list_id: DbId) -> Result<(), ApiError> {
        self.send(
            self.client.delete(self.url(&format!("todos/destroy/{list_id}"))),
            Guard::Session,
        )
        .await?;
        Ok(())
    }

    // ---- items ----

    /// `GET /todos/show/{id}`, normalized to a flat item sequence.
    pub async fn list_items(&self, list_id: DbId) -> Result<Vec<TodoItem>, ApiError> {
        let body = self
            .send(self.client.get(self.url(&format!("todos/show/{list_id}"))), Guard::Session)
            .await?;
        Ok(normalize::extract_items(&body))
    }

    /// `POST /todo-items/create/{listId}`.
    pub async fn create_item(
        &self,
        list_id: DbId,
        form: &NewItem,
    ) -> Result<Option<TodoItem>, ApiError> {
        forms::check(form)?;
        let body = self
            .send(
                self.client
                    .post(self.url(&format!("todo-items/create/{list_id}")))
                    .json(form),
                Guard::Session,
            )
            .await?;
        Ok(normalize::extract_entity(&body))
    }

    /// `PUT /todo-items/update/{id}`.
    pub async fn update_item(
        &self,
        item_id: DbId,
        form: &ItemUpdate,
    ) -> Result<Option<TodoItem>, ApiError> {
        form.check()?;
        let body = self
            .send(
                self.client
                    .put(self.url(&format!("todo-items/update/{item_id}")))
                    .json(form),
                Guard::Session,
            )
            .await?;
        Ok(normalize::extract_entity(&body))
    }

    /// `POST /todo-items/{id}/complete`. Returns the toggled item.
    pub async fn toggle_item(&self, item_id: DbId) -> Result<Option<TodoItem>, ApiError> {
        let body = self
            .send(
                self.client.post(self.url(&format!("todo-items/{item_id}/complete"))),
                Guard::Session,
            )
            .await?;
        Ok(normalize::extract_entity(&body))
    }

    /// `DELETE /todo-items/destroy/{id}`.
    pub async fn delete_item(&self, item_id: DbId) -> Result<(), ApiError> {
        self.send(
            self.client.delete(self.url(&format!("todo-items/destroy/{item_id}"))),
            Guard::Session,
        )
        .await?;
        Ok(())
    }

    // ---- collaborators ----

    /// `GET /search-user?username=`. Terms shorter than
    /// [`MIN_SEARCH_LEN`] return no results without a request.
    pub async fn search_users(&self, term: &str) -> Result<Vec<UserRef>, ApiError> {
        let term = term.trim();
        if term.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }
        let body = self
            .send(
                self.client
                    .get(self.url("search-user"))
                    .query(&[("username", term)]),
                Guard::Session,
            )
            .await?;
        Ok(normalize::extract_users(&body))
    }

    /// `POST /todos/invite-user/{listId}/{userId}`.
    pub async fn invite_user(&self, list_id: DbId, user_id: DbId) -> Result<(), ApiError> {
        self.send(
            self.client
                .post(self.url(&format!("todos/invite-user/{list_id}/{user_id}"))),
            Guard::Session,
        )
        .await?;
        tracing::info!(list_id, user_id, "Invited user to list");
        Ok(())
    }

    // ---- channel auth ----

    /// `POST /broadcasting/auth` with the socket id and channel name.
    pub async fn channel_auth(&self, socket_id: &str, channel: &str) -> Result<String, ApiError> {
        let body = self
            .send(
                self.client
                    .post(self.url("broadcasting/auth"))
                    .form(&[("socket_id", socket_id), ("channel_name", channel)]),
                Guard::Session,
            )
            .await?;
        body.get("auth")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::UnexpectedResponse("channel auth without signature".into()))
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Attach credentials, send, and classify the response.
    ///
    /// Success bodies that are empty or not JSON come back as
    /// [`Value::Null`]; the normalizers turn that into empty results.
    async fn send(&self, builder: RequestBuilder, guard: Guard) -> Result<Value, ApiError> {
        let token = self.session.token();
        let builder = match &token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let response = builder
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED && guard == Guard::Session {
            if let Some(token) = &token {
                if self.session.expire_token(token) {
                    tracing::warn!("Credential rejected, session ended");
                }
            }
            return Err(ApiError::Unauthorized);
        }

        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text).ok().and_then(|v| {
                v.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            tracing::debug!(status = status.as_u16(), "API request failed");
            return Err(match message {
                Some(message) if status.is_client_error() => ApiError::Validation {
                    status: status.as_u16(),
                    message,
                },
                _ => ApiError::Status {
                    status: status.as_u16(),
                    body: text,
                },
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Response body was not JSON");
            Value::Null
        }))
    }
}

#[async_trait]
impl ItemsApi for TodoApi {
    async fn list_items(&self, list_id: DbId) -> Result<Vec<TodoItem>, ApiError> {
        TodoApi::list_items(self, list_id).await
    }

    async fn create_item(
        &self,
        list_id: DbId,
        form: &NewItem,
    ) -> Result<Option<TodoItem>, ApiError> {
        TodoApi::create_item(self, list_id, form).await
    }

    async fn update_item(
        &self,
        item_id: DbId,
        form: &ItemUpdate,
    ) -> Result<Option<TodoItem>, ApiError> {
        TodoApi::update_item(self, item_id, form).await
    }

    async fn toggle_item(&self, item_id: DbId) -> Result<Option<TodoItem>, ApiError> {
        TodoApi::toggle_item(self, item_id).await
    }

    async fn delete_item(&self, item_id: DbId) -> Result<(), ApiError> {
        TodoApi::delete_item(self, item_id).await
    }
}

#[async_trait]
impl ChannelAuthorizer for TodoApi {
    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String, ApiError> {
        self.channel_auth(socket_id, channel).await
    }
}
