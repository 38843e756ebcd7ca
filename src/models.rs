// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wire types shared between the transport layer and the relay services.
//!
//! Every client request frame is answered by exactly one [`ServerFrame::Ack`]
//! carrying an HTTP-style status code; unsolicited pushes use
//! [`ServerFrame::Event`]. The request/acknowledgement pairing is mandatory
//! so clients can detect failures deterministically.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Push event: a relayed signed message. The payload is the original
/// envelope string, forwarded verbatim.
pub const EVENT_MESSAGE: &str = "v1/message";
/// Push event: an inbound bridge swap completed for the recipient.
pub const EVENT_SWAP_RECEIVE: &str = "v1/swap/receive";
/// Push event: an identity-verification result for the recipient.
pub const EVENT_VERIFICATION_RECEIVE: &str = "v1/verification/receive";

/// Request channels a client may invoke over the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "v1/login")]
    Login,
    #[serde(rename = "v1/message/relay")]
    Relay,
    #[serde(rename = "v1/swap/token")]
    Swap,
    #[serde(rename = "v1/faucet/token")]
    Faucet,
}

/// A single client request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Client-chosen sequence number, echoed back in the acknowledgement.
    pub seq: u64,
    pub channel: Channel,
    /// Signed credential envelope in compact form.
    pub envelope: String,
}

/// Frames the server sends down a session's socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack {
        seq: u64,
        status: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Event {
        event: String,
        payload: Value,
    },
}

impl ServerFrame {
    pub fn ok(seq: u64, details: Value) -> Self {
        Self::Ack {
            seq,
            status: 200,
            details: Some(details),
            error: None,
        }
    }

    pub fn error(seq: u64, err: &RelayError) -> Self {
        Self::Ack {
            seq,
            status: err.status().as_u16(),
            details: None,
            error: Some(err.to_string()),
        }
    }

    pub fn event(event: &str, payload: Value) -> Self {
        Self::Event {
            event: event.to_string(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_parses_channel_names() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"seq":7,"channel":"v1/message/relay","envelope":"a.b.c"}"#,
        )
        .unwrap();
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.channel, Channel::Relay);
        assert_eq!(frame.envelope, "a.b.c");
    }

    #[test]
    fn ack_omits_empty_fields() {
        let ack = ServerFrame::ok(1, serde_json::json!(true));
        let raw = serde_json::to_string(&ack).unwrap();
        assert_eq!(raw, r#"{"kind":"ack","seq":1,"status":200,"details":true}"#);
    }

    #[test]
    fn error_ack_carries_status_and_message() {
        let ack = ServerFrame::error(3, &RelayError::Unauthenticated);
        let raw = serde_json::to_value(&ack).unwrap();
        assert_eq!(raw["status"], 401);
        assert_eq!(raw["error"], "please login to be able to use service");
    }
}
