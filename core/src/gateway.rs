use crate::config::ClientConfig;
use crate::credentials::{Credential, CredentialStore, User};
use crate::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outbound request as seen by the transport.
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

/// Raw reply: HTTP status plus the decoded JSON body (or `Null` for empty,
/// or a JSON string for non-JSON bodies).
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

/// Seam between the gateway logic and the HTTP client, so tests can script
/// replies without a live server.
#[async_trait]
pub trait HttpExchange: Send + Sync {
    async fn execute(&self, call: ApiCall) -> Result<ApiReply, ClientError>;
}

pub struct ReqwestExchange {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestExchange {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.base(),
        }
    }

    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn execute(&self, call: ApiCall) -> Result<ApiReply, ClientError> {
        let url = format!("{}{}", self.base_url, call.path);
        let mut request = match call.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if let Some(token) = &call.bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiReply { status, body })
    }
}

/// Out-of-band signals from the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Refresh failed and credentials were cleared; the UI redirects to login.
    Expired,
    /// An assistant turn finished streaming; side metadata may be refreshed.
    TurnCompleted { turn_id: Uuid },
}

/// Standard response envelope used by the backend: payload under `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: T,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthPayload {
    access_token: String,
    refresh_token: String,
    user: User,
}

/// Wraps outbound requests with bearer credentials and performs a single
/// refresh-and-retry cycle on authorization failure.
#[derive(Clone)]
pub struct AuthGateway {
    exchange: Arc<dyn HttpExchange>,
    credentials: CredentialStore,
    events: UnboundedSender<SessionEvent>,
    refresh_gate: Arc<Mutex<()>>,
}

impl AuthGateway {
    pub fn new(
        exchange: Arc<dyn HttpExchange>,
        credentials: CredentialStore,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = unbounded_channel();
        (
            Self {
                exchange,
                credentials,
                events,
                refresh_gate: Arc::new(Mutex::new(())),
            },
            events_rx,
        )
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn event_sender(&self) -> UnboundedSender<SessionEvent> {
        self.events.clone()
    }

    pub async fn get(&self, path: &str) -> Result<Value, ClientError> {
        self.request(Method::Get, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request(Method::Post, path, Some(body)).await
    }

    /// Dispatch with the current bearer token. A 401/403 triggers one refresh
    /// cycle and one resend; the retried flag lives in this call frame, so a
    /// request can never refresh twice.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let observed = self.credentials.get().map(|c| c.access_token);
        let call = ApiCall {
            method,
            path: path.to_owned(),
            bearer: observed.clone(),
            body,
        };
        let reply = self.exchange.execute(call.clone()).await?;
        if reply.is_success() {
            return Ok(reply.body);
        }
        if !reply.is_unauthorized() {
            return Err(api_error(reply));
        }

        debug!(path, "request rejected, attempting token refresh");
        let refreshed = self.refresh_access_token(observed.as_deref()).await?;
        let retry = ApiCall {
            bearer: Some(refreshed),
            ..call
        };
        let reply = self.exchange.execute(retry).await?;
        if reply.is_success() {
            Ok(reply.body)
        } else if reply.is_unauthorized() {
            Err(ClientError::Unauthorized)
        } else {
            Err(api_error(reply))
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Refresh cycles are serialized: a caller that waited on the gate while
    /// another one rotated the token reuses the fresh token instead of
    /// spending its own refresh.
    async fn refresh_access_token(&self, observed: Option<&str>) -> Result<String, ClientError> {
        let _gate = self.refresh_gate.lock().await;
        match (self.credentials.get(), observed) {
            (Some(current), Some(observed)) if current.access_token != observed => {
                return Ok(current.access_token);
            }
            (None, Some(_)) => {
                // A concurrent cycle already failed and ended the session.
                return Err(ClientError::SessionExpired);
            }
            _ => {}
        }

        let refresh_token = match self.credentials.get().and_then(|c| c.refresh_token) {
            Some(token) => token,
            None => return Err(self.expire_session()),
        };
        let call = ApiCall {
            method: Method::Post,
            path: "/auth/refresh".to_owned(),
            bearer: None,
            body: Some(json!({ "refreshToken": refresh_token })),
        };
        let reply = match self.exchange.execute(call).await {
            Ok(reply) if reply.is_success() => reply,
            _ => return Err(self.expire_session()),
        };
        let access_token = match extract_access_token(&reply.body) {
            Some(token) => token,
            None => return Err(self.expire_session()),
        };
        self.credentials
            .update_access_token(&access_token)
            .map_err(ClientError::storage)?;
        debug!("access token refreshed");
        Ok(access_token)
    }

    fn expire_session(&self) -> ClientError {
        if let Err(err) = self.credentials.clear() {
            warn!(%err, "failed to clear credentials");
        }
        let _ = self.events.send(SessionEvent::Expired);
        ClientError::SessionExpired
    }

    pub async fn login(&self, request: LoginRequest, remember: bool) -> Result<User, ClientError> {
        if request.username_or_email.trim().is_empty() || request.password.is_empty() {
            return Err(ClientError::Validation(
                "username and password are required".into(),
            ));
        }
        let body = serde_json::to_value(&request)?;
        let reply = self.post("/auth/login", body).await?;
        self.store_auth_payload(reply, remember)
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<User, ClientError> {
        if request.email.trim().is_empty() || request.password.is_empty() {
            return Err(ClientError::Validation(
                "email and password are required".into(),
            ));
        }
        let body = serde_json::to_value(&request)?;
        let reply = self.post("/auth/register", body).await?;
        self.store_auth_payload(reply, true)
    }

    fn store_auth_payload(&self, reply: Value, persistent: bool) -> Result<User, ClientError> {
        let envelope: ApiEnvelope<AuthPayload> = serde_json::from_value(reply)?;
        let AuthPayload {
            access_token,
            refresh_token,
            user,
        } = envelope.data;
        let credential = Credential {
            access_token,
            refresh_token: Some(refresh_token),
        };
        self.credentials
            .set(&credential, &user, persistent)
            .map_err(ClientError::storage)?;
        Ok(user)
    }

    pub async fn fetch_profile(&self) -> Result<User, ClientError> {
        let reply = self.get("/auth/me").await?;
        let envelope: ApiEnvelope<User> = serde_json::from_value(reply)?;
        self.credentials
            .replace_user(&envelope.data)
            .map_err(ClientError::storage)?;
        Ok(envelope.data)
    }

    /// Server-side logout is best-effort; local credentials are always
    /// cleared.
    pub async fn logout(&self) -> Result<(), ClientError> {
        if let Err(err) = self.post("/auth/logout", json!({})).await {
            debug!(%err, "logout request failed, clearing local session anyway");
        }
        self.credentials.clear().map_err(ClientError::storage)
    }
}

/// The refresh endpoint answers either enveloped or flat.
fn extract_access_token(body: &Value) -> Option<String> {
    body.pointer("/data/accessToken")
        .or_else(|| body.get("accessToken"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn api_error(reply: ApiReply) -> ClientError {
    let message = reply
        .body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| "request failed".to_owned());
    ClientError::Api {
        status: reply.status,
        message,
    }
}
