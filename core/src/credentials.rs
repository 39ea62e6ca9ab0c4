use crate::storage::KeyValueStore;
use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const USER_KEY: &str = "user";

/// Profile of the signed-in user as returned by the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Bearer credential pair. The refresh token is absent when the server only
/// rotated the access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Holds the active credential in exactly one of two backing stores: a durable
/// one chosen with "remember me" at login, or a session-scoped one otherwise.
///
/// All mutation goes through this single API; multi-key updates happen under
/// one write lock so readers never observe a half-written credential.
#[derive(Clone)]
pub struct CredentialStore {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    guard: Arc<RwLock<()>>,
}

impl CredentialStore {
    pub fn new(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self {
            durable,
            session,
            guard: Arc::new(RwLock::new(())),
        }
    }

    /// The backend currently holding a credential, durable side first.
    fn active_backend(&self) -> Option<&Arc<dyn KeyValueStore>> {
        if self.durable.read(ACCESS_TOKEN_KEY).is_some() {
            Some(&self.durable)
        } else if self.session.read(ACCESS_TOKEN_KEY).is_some() {
            Some(&self.session)
        } else {
            None
        }
    }

    pub fn get(&self) -> Option<Credential> {
        let _guard = self.guard.read();
        let backend = self.active_backend()?;
        Some(Credential {
            access_token: backend.read(ACCESS_TOKEN_KEY)?,
            refresh_token: backend.read(REFRESH_TOKEN_KEY),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.get().is_some()
    }

    pub fn user(&self) -> Option<User> {
        let _guard = self.guard.read();
        let raw = self.active_backend()?.read(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(err) => {
                warn!(%err, "stored user profile is malformed");
                None
            }
        }
    }

    /// Store a fresh credential. `persistent` selects the durable backend; the
    /// other backend is cleared first so only one ever holds the credential.
    pub fn set(&self, credential: &Credential, user: &User, persistent: bool) -> Result<()> {
        let _guard = self.guard.write();
        let (target, other) = if persistent {
            (&self.durable, &self.session)
        } else {
            (&self.session, &self.durable)
        };
        clear_backend(other)?;
        target.write(ACCESS_TOKEN_KEY, &credential.access_token)?;
        match &credential.refresh_token {
            Some(token) => target.write(REFRESH_TOKEN_KEY, token)?,
            None => target.remove(REFRESH_TOKEN_KEY)?,
        }
        target.write(USER_KEY, &serde_json::to_string(user)?)?;
        Ok(())
    }

    /// Rewrite only the access token after a refresh, keeping the durability
    /// chosen at login. A no-op when nobody is signed in.
    pub fn update_access_token(&self, access_token: &str) -> Result<()> {
        let _guard = self.guard.write();
        if let Some(backend) = self.active_backend() {
            backend.write(ACCESS_TOKEN_KEY, access_token)?;
        }
        Ok(())
    }

    /// Refresh the cached profile in the active backend.
    pub fn replace_user(&self, user: &User) -> Result<()> {
        let _guard = self.guard.write();
        if let Some(backend) = self.active_backend() {
            backend.write(USER_KEY, &serde_json::to_string(user)?)?;
        }
        Ok(())
    }

    /// Remove the credential and profile from both backends.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.guard.write();
        clear_backend(&self.durable)?;
        clear_backend(&self.session)?;
        Ok(())
    }
}

fn clear_backend(backend: &Arc<dyn KeyValueStore>) -> Result<()> {
    backend.remove(ACCESS_TOKEN_KEY)?;
    backend.remove(REFRESH_TOKEN_KEY)?;
    backend.remove(USER_KEY)?;
    Ok(())
}
