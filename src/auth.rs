use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use serde::Deserialize;

use crate::db;
use crate::identity::new_local_id;

/// Bound on anonymous identity acquisition; elapsed means the operation
/// fails instead of hanging.
pub const ANONYMOUS_SIGN_IN_TIMEOUT: Duration = Duration::from_secs(8);

const ACTOR_META_KEY: &str = "actor_id";

/// Resolves the acting user id. Every remote write requires one; reads do
/// not.
pub trait IdentityProvider: Send + Sync {
    /// The already-resolved actor id, if any. Never performs network work.
    fn current(&self) -> Result<Option<String>, AuthError>;

    /// Resolve an actor id, acquiring an anonymous identity within the
    /// given bound when none exists yet.
    fn ensure(&self, timeout: Duration) -> Result<String, AuthError>;
}

#[derive(Debug)]
pub enum AuthError {
    Unauthenticated,
    Timeout(Duration),
    Transport(String),
    Persistence(rusqlite::Error),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Unauthenticated => write!(f, "no actor identity is available"),
            AuthError::Timeout(bound) => {
                write!(
                    f,
                    "anonymous sign-in did not complete within {}s",
                    bound.as_secs()
                )
            }
            AuthError::Transport(message) => write!(f, "sign-in transport error: {}", message),
            AuthError::Persistence(err) => write!(f, "identity storage error: {}", err),
        }
    }
}

impl Error for AuthError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AuthError::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(value: rusqlite::Error) -> Self {
        AuthError::Persistence(value)
    }
}

/// Fixed identity, from configuration or tests. `None` models a caller with
/// no identity at all (every ensure fails `Unauthenticated`).
pub struct StaticIdentity {
    actor: Option<String>,
}

impl StaticIdentity {
    pub fn new(actor: Option<String>) -> Self {
        Self { actor }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Result<Option<String>, AuthError> {
        Ok(self.actor.clone())
    }

    fn ensure(&self, _timeout: Duration) -> Result<String, AuthError> {
        self.actor.clone().ok_or(AuthError::Unauthenticated)
    }
}

/// Device-local identity persisted in the meta table. Acquisition is
/// instant: a fresh anonymous id is minted on first use and stays stable
/// afterwards.
pub struct MetaIdentity {
    conn: Arc<Mutex<Connection>>,
}

impl MetaIdentity {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("connection lock should not be poisoned")
    }
}

impl IdentityProvider for MetaIdentity {
    fn current(&self) -> Result<Option<String>, AuthError> {
        Ok(db::get_meta(&self.lock(), ACTOR_META_KEY)?)
    }

    fn ensure(&self, _timeout: Duration) -> Result<String, AuthError> {
        let conn = self.lock();
        if let Some(actor) = db::get_meta(&conn, ACTOR_META_KEY)? {
            return Ok(actor);
        }
        let actor = format!("anon-{}", new_local_id());
        db::set_meta(&conn, ACTOR_META_KEY, &actor)?;
        Ok(actor)
    }
}

/// Identity backed by the shared backend's anonymous sign-in endpoint. The
/// resolved id is cached in the meta table so later runs skip the network.
pub struct HttpIdentity {
    conn: Arc<Mutex<Connection>>,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    #[serde(rename = "userId")]
    user_id: String,
}

impl HttpIdentity {
    pub fn new(conn: Arc<Mutex<Connection>>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            conn,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn sign_in_anonymously(&self, timeout: Duration) -> Result<String, AuthError> {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let url = format!("{}/v1/auth/anonymous", self.base_url);
        let request = match &self.api_key {
            Some(key) => agent.post(&url).set("authorization", &format!("Bearer {}", key)),
            None => agent.post(&url),
        };
        let response = request.call().map_err(|err| match err {
            ureq::Error::Transport(transport) => {
                let message = transport.to_string();
                if message.contains("timed out") || message.contains("timeout") {
                    AuthError::Timeout(timeout)
                } else {
                    AuthError::Transport(message)
                }
            }
            ureq::Error::Status(status, _) => {
                AuthError::Transport(format!("sign-in failed with status {}", status))
            }
        })?;
        let signed_in: SignInResponse = response
            .into_json()
            .map_err(|err| AuthError::Transport(err.to_string()))?;
        Ok(signed_in.user_id)
    }
}

impl IdentityProvider for HttpIdentity {
    fn current(&self) -> Result<Option<String>, AuthError> {
        let conn = self
            .conn
            .lock()
            .expect("connection lock should not be poisoned");
        Ok(db::get_meta(&conn, ACTOR_META_KEY)?)
    }

    fn ensure(&self, timeout: Duration) -> Result<String, AuthError> {
        if let Some(actor) = self.current()? {
            return Ok(actor);
        }
        let actor = self.sign_in_anonymously(timeout)?;
        let conn = self
            .conn
            .lock()
            .expect("connection lock should not be poisoned");
        db::set_meta(&conn, ACTOR_META_KEY, &actor)?;
        Ok(actor)
    }
}
