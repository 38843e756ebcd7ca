// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity-verification webhook.
//!
//! The verification provider calls back with an HMAC-SHA256 signature
//! over the raw request body in the `x-hmac-signature` header. On a valid
//! signature the result is pushed to the subject DID's live session, if
//! any; delivery to an offline subject is still a 200, since webhook
//! retries are the provider's concern, not ours.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::models::EVENT_VERIFICATION_RECEIVE;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hmac-signature";

#[derive(Deserialize)]
struct WebhookPayload {
    /// Subject DID the verification session was opened for.
    #[serde(rename = "vendorData")]
    vendor_data: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    verification: Value,
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing webhook signature"})),
        );
    };

    if !signature_is_valid(
        state.settings.verification_webhook_secret.as_bytes(),
        signature,
        &body,
    ) {
        tracing::warn!("Verification webhook with invalid signature rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid webhook signature"})),
        );
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid payload: {error}")})),
            );
        }
    };

    let Some(did) = payload.vendor_data else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "vendorData (subject DID) is missing"})),
        );
    };

    let delivered = state.relay.notify_by_identity(
        &did,
        EVENT_VERIFICATION_RECEIVE,
        json!({
            "status": payload.status,
            "verification": payload.verification,
        }),
    );

    tracing::info!(%did, delivered, "Verification result processed");

    (StatusCode::OK, Json(json!({"delivered": delivered})))
}

/// Constant-time comparison of the hex HMAC against the raw body digest.
fn signature_is_valid(secret: &[u8], signature_hex: &str, body: &[u8]) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
