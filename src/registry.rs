// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Registry
//!
//! In-memory bidirectional map between stable identities (DIDs) and
//! ephemeral transport sessions. The registry owns the only mutable session
//! state in the service; all access goes through the operations below and
//! the lock is never held across an await point.
//!
//! At most one session is reachable per identity: logging in again from a
//! new session silently supersedes the previous mapping. The superseded
//! session stays connected but can no longer be addressed by its DID.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::ServerFrame;

/// Opaque handle for one live transport connection, assigned at upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound frame sender for one session's socket writer task.
pub type SessionSender = mpsc::UnboundedSender<ServerFrame>;

struct SessionEntry {
    did: Option<String>,
    sender: SessionSender,
}

#[derive(Default)]
struct Inner {
    /// `did -> session` (forward view, at most one session per identity).
    by_did: HashMap<String, SessionId>,
    /// `session -> entry` (reverse view, used for cleanup and the guard).
    sessions: HashMap<SessionId, SessionEntry>,
}

/// Registry of connected sessions and their identity bindings.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly connected session and return its handle.
    pub fn connect(&self, sender: SessionSender) -> SessionId {
        let session = SessionId::new();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.sessions.insert(
            session,
            SessionEntry {
                did: None,
                sender,
            },
        );
        session
    }

    /// Bind an identity to a session.
    ///
    /// Returns `false` when `did` already maps to this session (idempotent
    /// re-login, used to suppress duplicate announcement side effects) or
    /// when the session is no longer connected. Otherwise both directions
    /// are inserted/overwritten and `true` is returned. Never errors.
    pub fn bind(&self, did: &str, session: SessionId) -> bool {
        let mut inner = self.inner.write().expect("registry lock poisoned");

        if inner.by_did.get(did) == Some(&session) {
            return false;
        }

        let Some(entry) = inner.sessions.get_mut(&session) else {
            return false;
        };

        // A session re-binding under a new identity drops its previous
        // forward entry so no orphan survives.
        let previous = entry.did.replace(did.to_string());
        if let Some(previous) = previous {
            if previous != did && inner.by_did.get(&previous) == Some(&session) {
                inner.by_did.remove(&previous);
            }
        }

        inner.by_did.insert(did.to_string(), session);
        true
    }

    /// Look up the session currently bound to an identity.
    pub fn resolve(&self, did: &str) -> Option<SessionId> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.by_did.get(did).copied()
    }

    /// The identity bound to a session, if it has logged in.
    pub fn identity_of(&self, session: SessionId) -> Option<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.sessions.get(&session).and_then(|e| e.did.clone())
    }

    /// Authorization Guard predicate: true iff the session has a bound
    /// identity. Re-checked per operation, never cached, since sessions
    /// can be released between calls.
    pub fn is_authorized(&self, session: SessionId) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .sessions
            .get(&session)
            .is_some_and(|e| e.did.is_some())
    }

    /// Outbound sender for the session currently bound to `did`.
    pub fn sender_for_identity(&self, did: &str) -> Option<(SessionId, SessionSender)> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let session = inner.by_did.get(did).copied()?;
        let entry = inner.sessions.get(&session)?;
        Some((session, entry.sender.clone()))
    }

    /// Remove a session and, if it was the identity's current session, the
    /// forward entry as well. Idempotent: releasing an unknown or already
    /// released session is a no-op.
    pub fn release(&self, session: SessionId) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let Some(entry) = inner.sessions.remove(&session) else {
            return;
        };
        if let Some(did) = entry.did {
            // A superseded session must not disturb the identity's newer
            // binding.
            if inner.by_did.get(&did) == Some(&session) {
                inner.by_did.remove(&did);
            }
        }
    }

    /// Number of currently connected sessions.
    pub fn session_count(&self) -> usize {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_sessions(n: usize) -> (SessionRegistry, Vec<SessionId>) {
        let registry = SessionRegistry::new();
        let sessions = (0..n)
            .map(|_| {
                let (tx, _rx) = mpsc::unbounded_channel();
                registry.connect(tx)
            })
            .collect();
        (registry, sessions)
    }

    #[test]
    fn bind_is_idempotent_for_same_pair() {
        let (registry, s) = registry_with_sessions(1);
        assert!(registry.bind("did:rel:t:alice", s[0]));
        assert!(!registry.bind("did:rel:t:alice", s[0]));
        assert_eq!(registry.resolve("did:rel:t:alice"), Some(s[0]));
    }

    #[test]
    fn later_bind_supersedes_and_old_release_is_noop() {
        let (registry, s) = registry_with_sessions(2);
        assert!(registry.bind("did:rel:t:alice", s[0]));
        assert!(registry.bind("did:rel:t:alice", s[1]));
        assert_eq!(registry.resolve("did:rel:t:alice"), Some(s[1]));

        // Releasing the superseded session must not remove the new binding.
        registry.release(s[0]);
        assert_eq!(registry.resolve("did:rel:t:alice"), Some(s[1]));
    }

    #[test]
    fn release_of_unbound_session_is_noop() {
        let (registry, _s) = registry_with_sessions(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        let ghost = registry.connect(tx);
        registry.release(ghost);
        registry.release(ghost);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn release_purges_both_directions() {
        let (registry, s) = registry_with_sessions(1);
        registry.bind("did:rel:t:alice", s[0]);
        registry.release(s[0]);
        assert_eq!(registry.resolve("did:rel:t:alice"), None);
        assert_eq!(registry.identity_of(s[0]), None);
        assert!(!registry.is_authorized(s[0]));
    }

    #[test]
    fn rebinding_session_to_new_did_leaves_no_orphan() {
        let (registry, s) = registry_with_sessions(1);
        registry.bind("did:rel:t:alice", s[0]);
        registry.bind("did:rel:t:bob", s[0]);
        assert_eq!(registry.resolve("did:rel:t:alice"), None);
        assert_eq!(registry.resolve("did:rel:t:bob"), Some(s[0]));
        assert_eq!(registry.identity_of(s[0]).as_deref(), Some("did:rel:t:bob"));
    }

    #[test]
    fn guard_requires_bound_identity() {
        let (registry, s) = registry_with_sessions(1);
        assert!(!registry.is_authorized(s[0]));
        registry.bind("did:rel:t:alice", s[0]);
        assert!(registry.is_authorized(s[0]));
    }
}
