use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, header};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::SignInRequest;
use crate::error::BokmerkeError;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub provider: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    SignedOut { user_id: String },
}

struct SessionEntry {
    session: Session,
    issued_at: Instant,
    revoked: CancellationToken,
}

/// The single session-change fan-out point for the whole service. Handlers
/// reach it through `AppState`; nothing subscribes ad hoc. Lifecycle logging
/// lives in the one subscriber the binary spawns, not here.
///
/// Every session carries a `CancellationToken` that is cancelled on sign-out
/// or expiry, so a live stream opened under a session can never outlive it.
pub struct SessionHub {
    allowed_providers: Vec<String>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    changes: broadcast::Sender<SessionEvent>,
}

impl SessionHub {
    pub fn new(allowed_providers: Vec<String>) -> Self {
        let (changes, _) = broadcast::channel(64);
        SessionHub {
            allowed_providers,
            sessions: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Opens a session from provider-verified claims. The user identifier is
    /// stamped here, never taken from a record payload.
    pub async fn sign_in(&self, claims: SignInRequest) -> Result<Session, BokmerkeError> {
        if !self.allowed_providers.iter().any(|p| p == &claims.provider) {
            return Err(BokmerkeError::ProviderNotAllowed(claims.provider));
        }

        let token = Uuid::new_v4().to_string();
        let session = Session {
            token: token.clone(),
            user_id: format!("{}:{}", claims.provider, claims.subject),
            provider: claims.provider,
            email: claims.email,
            display_name: claims.name,
            avatar_url: claims.avatar_url,
        };

        let entry = SessionEntry {
            session: session.clone(),
            issued_at: Instant::now(),
            revoked: CancellationToken::new(),
        };
        self.sessions.lock().await.insert(token, entry);

        let _ = self.changes.send(SessionEvent::SignedIn {
            user_id: session.user_id.clone(),
        });
        Ok(session)
    }

    pub async fn sign_out(&self, token: &str) -> bool {
        let removed = self.sessions.lock().await.remove(token);
        match removed {
            Some(entry) => {
                entry.revoked.cancel();
                let _ = self.changes.send(SessionEvent::SignedOut {
                    user_id: entry.session.user_id.clone(),
                });
                true
            }
            None => false,
        }
    }

    pub async fn current(&self, token: &str) -> Option<Session> {
        self.sessions
            .lock()
            .await
            .get(token)
            .map(|e| e.session.clone())
    }

    /// Resolves the caller's session from the `Authorization: Bearer` header.
    /// A revoked or unknown token authenticates as "not signed in".
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Session, BokmerkeError> {
        let token = bearer_token(headers).ok_or(BokmerkeError::Unauthenticated)?;
        self.current(token)
            .await
            .ok_or(BokmerkeError::Unauthenticated)
    }

    /// Cancellation token of a live session; cancelled on sign-out or expiry.
    pub async fn revocation(&self, token: &str) -> Option<CancellationToken> {
        self.sessions
            .lock()
            .await
            .get(token)
            .map(|e| e.revoked.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.changes.subscribe()
    }

    /// Removes sessions older than `ttl`, cancelling their streams. Returns
    /// how many were expired.
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.issued_at.elapsed() >= ttl)
            .map(|(token, _)| token.clone())
            .collect();

        for token in &expired {
            if let Some(entry) = sessions.remove(token) {
                entry.revoked.cancel();
                let _ = self.changes.send(SessionEvent::SignedOut {
                    user_id: entry.session.user_id.clone(),
                });
            }
        }

        expired.len()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
