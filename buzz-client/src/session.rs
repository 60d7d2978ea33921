//! Session identity and credential lifecycle.
//!
//! A [`SessionContext`] is created once and passed by `Arc` to everything
//! that needs the bearer credential or the caller's identity. Logging in
//! installs a decoded [`Session`]; logging out clears it.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::Deserialize;
use shared::models::UserId;
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};

/// Opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Value of the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    user_id: i64,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Identity decoded from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub username: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    credential: Credential,
}

impl Session {
    /// Decodes the claims embedded in a JWT. The signature is not checked;
    /// the server remains the authority on validity.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidCredential`] when the token is not a
    /// three-part JWT or its payload lacks a numeric `user_id`.
    pub fn from_token(token: impl Into<String>) -> ClientResult<Self> {
        let token = token.into();
        let token = token.trim().to_string();

        let mut parts = token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => {
                return Err(ClientError::InvalidCredential(
                    "token is not a JWT".to_string(),
                ));
            }
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|err| ClientError::InvalidCredential(format!("bad payload encoding: {err}")))?;
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|err| ClientError::InvalidCredential(format!("bad claims: {err}")))?;

        Ok(Self {
            user_id: UserId(claims.user_id),
            username: claims.sub,
            expires_at: claims
                .exp
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)),
            credential: Credential(token),
        })
    }

    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Explicit holder of the logged-in session.
#[derive(Debug, Default)]
pub struct SessionContext {
    current: RwLock<Option<Session>>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and installs a token, replacing any previous session.
    ///
    /// # Errors
    /// Propagates [`Session::from_token`] failures; the previous session is kept.
    pub fn login(&self, token: impl Into<String>) -> ClientResult<Session> {
        let session = Session::from_token(token)?;
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(session.clone());
        info!(user_id = %session.user_id, "session started");
        Ok(session)
    }

    pub fn logout(&self) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            info!("session cleared");
        }
    }

    /// The active, unexpired session.
    ///
    /// # Errors
    /// Returns [`ClientError::Unauthorized`] when nobody is logged in or the
    /// token has expired.
    pub fn current(&self) -> ClientResult<Session> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(session) if session.is_expired(Utc::now()) => {
                debug!(user_id = %session.user_id, "session token expired");
                Err(ClientError::Unauthorized)
            }
            Some(session) => Ok(session.clone()),
            None => Err(ClientError::Unauthorized),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current().is_ok()
    }
}

/// Token persisted between CLI invocations.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/buzz/session.token`, or `./session.token` without a home directory.
    #[must_use]
    pub fn default_location() -> Self {
        let path = BaseDirs::new().map_or_else(
            || PathBuf::from("./session.token"),
            |dirs| dirs.config_dir().join("buzz").join("session.token"),
        );
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the token, readable by the owner only on Unix.
    ///
    /// # Errors
    /// Returns [`ClientError::Io`] when the directory or file cannot be written.
    pub fn save(&self, credential: &Credential) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, credential.expose())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Reads the stored token, `None` when no session was saved.
    ///
    /// # Errors
    /// Returns [`ClientError::Io`] for read failures other than a missing file.
    pub fn load(&self) -> ClientResult<Option<Credential>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| Credential::new(token)))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the stored token; returns whether a file was removed.
    ///
    /// # Errors
    /// Returns [`ClientError::Io`] when the file exists but cannot be removed.
    pub fn remove(&self) -> ClientResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_token(user_id: i64, username: &str, exp: Option<i64>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let mut claims = serde_json::json!({ "sub": username, "user_id": user_id });
    if let Some(exp) = exp {
        claims["exp"] = serde_json::json!(exp);
    }
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
