// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Relay Core
//!
//! Orchestrates the session lifecycle: login binds a verified identity to
//! its transport session, relay forwards signed envelopes between
//! logged-in parties, disconnect purges the registry. Every failure is
//! reported to the calling session only; nothing here broadcasts errors
//! or touches another session's state.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::envelope;
use crate::error::RelayError;
use crate::models::{ServerFrame, EVENT_MESSAGE};
use crate::registry::{SessionId, SessionRegistry};
use crate::resolver::DidResolver;

pub struct RelayCore {
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn DidResolver>,
}

impl RelayCore {
    pub fn new(registry: Arc<SessionRegistry>, resolver: Arc<dyn DidResolver>) -> Self {
        Self { registry, resolver }
    }

    /// Authorization guard: fail fast with `Unauthenticated` unless the
    /// session has a bound identity.
    ///
    /// Re-checked against the registry on every gated operation, never
    /// cached, since sessions can be released between calls.
    pub fn require_authorized(&self, session: SessionId) -> Result<(), RelayError> {
        if self.registry.is_authorized(session) {
            Ok(())
        } else {
            Err(RelayError::Unauthenticated)
        }
    }

    /// Handle a login envelope: verify it as an authentication message and
    /// bind the sender DID to the session.
    ///
    /// Returns whether a new binding was created; a duplicate login from
    /// the same session and DID succeeds idempotently with `false` so
    /// callers can suppress repeated announcement side effects.
    pub async fn login(&self, raw: &str, session: SessionId) -> Result<bool, RelayError> {
        let message = envelope::verify(
            raw,
            Some(envelope::AUTHENTICATION_MESSAGE),
            self.resolver.as_ref(),
        )
        .await?;

        let new_binding = self.registry.bind(message.sender(), session);

        if new_binding {
            tracing::info!(did = %message.sender(), %session, "session identified");
        }

        Ok(new_binding)
    }

    /// Relay a signed envelope to its recipient's current session.
    ///
    /// The original envelope string is forwarded verbatim so the recipient
    /// can independently re-verify the signature end to end. A recipient
    /// with no bound session fails the attempt terminally; there is no
    /// retry or queuing here.
    pub async fn relay(&self, raw: &str, session: SessionId) -> Result<(), RelayError> {
        self.require_authorized(session)?;

        let message = envelope::verify(raw, None, self.resolver.as_ref()).await?;

        let recipient = message.recipient().ok_or_else(|| {
            RelayError::MalformedEnvelope("envelope carries no recipient".to_string())
        })?;

        let Some((_, sender)) = self.registry.sender_for_identity(recipient) else {
            return Err(RelayError::RecipientNotConnected {
                did: recipient.to_string(),
            });
        };

        if sender
            .send(ServerFrame::event(EVENT_MESSAGE, json!(message.raw())))
            .is_err()
        {
            // The recipient's writer task is gone; its registry entry just
            // hasn't been released yet.
            return Err(RelayError::RecipientNotConnected {
                did: recipient.to_string(),
            });
        }

        tracing::debug!(
            %session,
            from = %message.sender(),
            to = %recipient,
            message_type = %message.message_type().tag(),
            "message relayed"
        );

        Ok(())
    }

    /// Release the session's registry entries. Idempotent; never errors.
    pub fn disconnect(&self, session: SessionId) {
        if let Some(did) = self.registry.identity_of(session) {
            tracing::debug!(%did, %session, "session disconnected");
        }
        self.registry.release(session);
    }

    /// Push an out-of-band event to the identity's current session.
    ///
    /// Returns `false` when the identity has no active session; callers
    /// decide whether that is fatal for their flow.
    pub fn notify_by_identity(&self, did: &str, event: &str, payload: Value) -> bool {
        match self.registry.sender_for_identity(did) {
            Some((_, sender)) => sender.send(ServerFrame::event(event, payload)).is_ok(),
            None => false,
        }
    }
}
