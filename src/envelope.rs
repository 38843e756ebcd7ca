// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Message Envelope Verifier
//!
//! Envelopes are compact signed credentials of the form
//! `b64url(header).b64url(claims).b64url(signature)`, signed with the
//! sender's Ed25519 key. This module is the single boundary that turns an
//! untrusted envelope string into a [`VerifiedMessage`]; nothing past it
//! ever parses raw client input.
//!
//! Verification order: decode, resolve the signer's key material, check
//! the signature, then check the expected message type. Each failure maps
//! to a distinct [`EnvelopeError`] so the transport can acknowledge with
//! the right status ("not found" for an unresolvable signer is
//! deliberately distinguishable from "unauthorized" for a bad signature).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resolver::{DidResolver, ResolveError};

/// Signature algorithm carried in the envelope header.
const ED25519_ALG: &str = "EdDSA";

/// Message type tag required for login.
pub const AUTHENTICATION_MESSAGE: &str = "AuthenticationMessage";
/// Message type tag required for ledger-to-Base swap requests.
pub const SWAP_MESSAGE: &str = "SwapMessage";
/// Message type tag required for faucet requests.
pub const FAUCET_MESSAGE: &str = "FaucetMessage";
/// Message type tag used for identity-verification results.
pub const VERIFICATION_MESSAGE: &str = "VerificationMessage";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("could not parse message envelope: {0}")]
    Malformed(String),

    #[error("could not verify signer from {did}")]
    SignatureInvalid { did: String },

    /// The signer's key-resolution service has no identity document for
    /// the claimed DID. Distinct from a generic signature failure.
    #[error("DID could not be resolved from {did}")]
    SignerUnresolvable { did: String },

    #[error("message type must be '{expected}'")]
    UnexpectedType { expected: &'static str },
}

/// Message kind, keyed by the envelope's type tag. Produced only by
/// [`verify`]; the relay forwards [`MessageType::Other`] variants opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Authentication,
    Swap,
    Faucet,
    Verification,
    Other(String),
}

impl MessageType {
    fn from_tag(tag: &str) -> Self {
        match tag {
            AUTHENTICATION_MESSAGE => Self::Authentication,
            SWAP_MESSAGE => Self::Swap,
            FAUCET_MESSAGE => Self::Faucet,
            VERIFICATION_MESSAGE => Self::Verification,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Authentication => AUTHENTICATION_MESSAGE,
            Self::Swap => SWAP_MESSAGE,
            Self::Faucet => FAUCET_MESSAGE,
            Self::Verification => VERIFICATION_MESSAGE,
            Self::Other(tag) => tag,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    kid: String,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(rename = "type")]
    message_type: String,
    payload: Value,
    iat: i64,
}

/// A successfully verified envelope. Keeps the original compact string so
/// relays can forward it verbatim for end-to-end re-verification.
#[derive(Debug, Clone)]
pub struct VerifiedMessage {
    raw: String,
    sender: String,
    recipient: Option<String>,
    message_type: MessageType,
    payload: Value,
}

impl VerifiedMessage {
    /// The original signed envelope string, unmodified.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Signer DID (`iss` claim).
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Recipient DID (`sub` claim), required only for relay.
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Verify a raw envelope, optionally requiring a specific message type.
///
/// Never panics past this boundary; callers branch on the result.
pub async fn verify(
    raw: &str,
    expected: Option<&'static str>,
    resolver: &dyn DidResolver,
) -> Result<VerifiedMessage, EnvelopeError> {
    let (header, claims, signed, signature) = decode(raw)?;

    if header.alg != ED25519_ALG {
        return Err(EnvelopeError::Malformed(format!(
            "unsupported signature algorithm '{}'",
            header.alg
        )));
    }

    let key = resolver.resolve(&claims.iss).await.map_err(|err| match err {
        ResolveError::NotFound(_) => EnvelopeError::SignerUnresolvable {
            did: claims.iss.clone(),
        },
        _ => EnvelopeError::SignatureInvalid {
            did: claims.iss.clone(),
        },
    })?;

    key.verify_strict(signed.as_bytes(), &signature)
        .map_err(|_| EnvelopeError::SignatureInvalid {
            did: claims.iss.clone(),
        })?;

    let message_type = MessageType::from_tag(&claims.message_type);

    if let Some(expected) = expected {
        if message_type.tag() != expected {
            return Err(EnvelopeError::UnexpectedType { expected });
        }
    }

    Ok(VerifiedMessage {
        raw: raw.to_string(),
        sender: claims.iss,
        recipient: claims.sub,
        message_type,
        payload: claims.payload,
    })
}

fn decode(raw: &str) -> Result<(Header, Claims, String, Signature), EnvelopeError> {
    let mut parts = raw.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(EnvelopeError::Malformed(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let header: Header = serde_json::from_slice(&decode_segment(header_b64, "header")?)
        .map_err(|e| EnvelopeError::Malformed(format!("header: {e}")))?;
    let claims: Claims = serde_json::from_slice(&decode_segment(claims_b64, "claims")?)
        .map_err(|e| EnvelopeError::Malformed(format!("claims: {e}")))?;

    let sig_bytes = decode_segment(sig_b64, "signature")?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| EnvelopeError::Malformed(format!("signature: {e}")))?;

    Ok((header, claims, format!("{header_b64}.{claims_b64}"), signature))
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, EnvelopeError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| EnvelopeError::Malformed(format!("{name} segment: {e}")))
}

/// Sign an envelope in the compact form [`verify`] accepts.
///
/// Wallet tooling and the test suite use this; the service itself never
/// signs client envelopes.
pub fn seal(
    key: &SigningKey,
    sender: &str,
    recipient: Option<&str>,
    message_type: &str,
    payload: Value,
) -> String {
    let header = Header {
        alg: ED25519_ALG.to_string(),
        kid: sender.to_string(),
    };
    let claims = Claims {
        iss: sender.to_string(),
        sub: recipient.map(str::to_string),
        message_type: message_type.to_string(),
        payload,
        iat: Utc::now().timestamp(),
    };

    let header_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("header serializes"));
    let claims_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).expect("claims serialize"));
    let signed = format!("{header_b64}.{claims_b64}");
    let signature = key.sign(signed.as_bytes());

    format!("{signed}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}
