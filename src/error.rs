// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service error taxonomy.
//!
//! Every per-request failure is converted into exactly one WebSocket
//! acknowledgement carrying an HTTP-style status code and a client-safe
//! message. Errors never propagate past the transport boundary and one
//! session's failure never affects another session's state.

use axum::http::StatusCode;

use crate::chain::ChainError;
use crate::envelope::EnvelopeError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("could not parse message envelope: {0}")]
    MalformedEnvelope(String),

    #[error("could not verify signer from {did}")]
    SignatureInvalid { did: String },

    #[error("DID could not be resolved from {did}")]
    SignerUnresolvable { did: String },

    #[error("message type must be '{expected}'")]
    UnexpectedMessageType { expected: &'static str },

    #[error("please login to be able to use service")]
    Unauthenticated,

    #[error("recipient not connected {did}")]
    RecipientNotConnected { did: String },

    #[error("issuer {did} is not a recognized platform application")]
    UntrustedIssuer { did: String },

    #[error("{0}")]
    InvalidAmount(String),

    #[error("daily faucet limit exceeded, {remaining} remaining")]
    ThrottleLimitExceeded { remaining: String },

    #[error("faucet is not available in this environment")]
    FaucetUnavailable,

    #[error("chain operation failed: {0}")]
    ChainOperationFailed(String),

    /// Catch-all. The detail is logged server-side; clients only ever see
    /// the generic display text.
    #[error("internal server error")]
    Internal(String),
}

impl RelayError {
    /// HTTP-style status code carried in the acknowledgement.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedEnvelope(_)
            | Self::UnexpectedMessageType { .. }
            | Self::RecipientNotConnected { .. }
            | Self::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            Self::SignatureInvalid { .. }
            | Self::Unauthenticated
            | Self::UntrustedIssuer { .. } => StatusCode::UNAUTHORIZED,
            Self::SignerUnresolvable { .. } => StatusCode::NOT_FOUND,
            Self::ThrottleLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::FaucetUnavailable => StatusCode::FORBIDDEN,
            Self::ChainOperationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EnvelopeError> for RelayError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Malformed(detail) => Self::MalformedEnvelope(detail),
            EnvelopeError::SignatureInvalid { did } => Self::SignatureInvalid { did },
            EnvelopeError::SignerUnresolvable { did } => Self::SignerUnresolvable { did },
            EnvelopeError::UnexpectedType { expected } => {
                Self::UnexpectedMessageType { expected }
            }
        }
    }
}

impl From<ChainError> for RelayError {
    fn from(err: ChainError) -> Self {
        Self::ChainOperationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_ack_contract() {
        assert_eq!(
            RelayError::MalformedEnvelope("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::SignatureInvalid { did: "did:rel:x:a".into() }.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            RelayError::SignerUnresolvable { did: "did:rel:x:a".into() }.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(RelayError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            RelayError::ThrottleLimitExceeded { remaining: "0.000000 REL".into() }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(RelayError::FaucetUnavailable.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            RelayError::ChainOperationFailed("rpc down".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_error_display_is_generic() {
        let err = RelayError::Internal("secret connection string".into());
        assert_eq!(err.to_string(), "internal server error");
    }

    #[test]
    fn envelope_errors_convert_unchanged() {
        let err: RelayError = EnvelopeError::SignerUnresolvable {
            did: "did:rel:x:ghost".into(),
        }
        .into();
        assert!(matches!(err, RelayError::SignerUnresolvable { .. }));
    }
}
