//! Auth collaborator seam: stable user identity and session verification.
//!
//! The authentication subsystem itself lives outside this crate; the sync
//! engine only needs a user id and a time-boundable "is the remote session
//! still valid" check, which this module abstracts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::util::utc_now;

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    /// Whether the session is expired (with clock-skew slack).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= utc_now().timestamp() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Source of the current user identity and session validity.
///
/// `verify_session` may hit the network; the push pipeline bounds it with a
/// timeout and treats a timeout as "cannot push".
#[allow(async_fn_in_trait)]
pub trait SessionProvider {
    /// The signed-in user's id, if any.
    fn user_id(&self) -> Option<String>;

    /// Check that an authenticated remote session exists right now.
    async fn verify_session(&self) -> Result<bool>;
}

/// A session provider with a fixed identity that is always valid.
///
/// Used by tests and by local-only mode, where there is no remote session
/// to verify.
#[derive(Debug, Clone)]
pub struct FixedSession {
    user_id: String,
}

impl FixedSession {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl SessionProvider for FixedSession {
    fn user_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    async fn verify_session(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_debug_redacts_token() {
        let session = AuthSession {
            access_token: "secret".to_string(),
            expires_at: 0,
            user: AuthUser {
                id: "u1".to_string(),
                email: None,
            },
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn expired_session_detected_with_skew() {
        let session = AuthSession {
            access_token: "t".to_string(),
            expires_at: utc_now().timestamp() + 10, // inside the skew window
            user: AuthUser {
                id: "u1".to_string(),
                email: None,
            },
        };
        assert!(session.is_expired());

        let live = AuthSession {
            expires_at: utc_now().timestamp() + 3600,
            ..session
        };
        assert!(!live.is_expired());
    }

    #[tokio::test]
    async fn fixed_session_is_always_valid() {
        let session = FixedSession::new("u1");
        assert_eq!(session.user_id(), Some("u1".to_string()));
        assert!(session.verify_session().await.unwrap());
    }
}
