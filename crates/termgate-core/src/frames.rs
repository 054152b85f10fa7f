//! Terminal relay frames.
//!
//! One JSON object per WebSocket text message, discriminated by a `type`
//! field. Inbound and outbound directions have disjoint frame sets.

use crate::error::{TermgateError, TermgateResult};
use serde::{Deserialize, Serialize};

/// Frames the client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Raw keystrokes/paste payload, forwarded verbatim to the shell.
    Input { data: String },
    /// Terminal geometry change.
    Resize { cols: u16, rows: u16 },
    /// Keep-alive; answered with [`OutboundFrame::Pong`].
    Ping,
}

/// Frames the relay sends to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Decoded terminal output.
    Output { data: String },
    /// Keep-alive reply.
    Pong,
    /// Sent once, followed by transport close.
    Error { message: String },
}

/// Decode one inbound text message.
///
/// Distinguishes three cases the relay treats differently:
/// - `Ok(Some(frame))` — a recognized frame;
/// - `Ok(None)` — well-formed JSON of an unrecognized shape, to be ignored;
/// - `Err(_)` — unreadable payload, fatal to the relay.
///
/// A recognized type with missing fields (a resize without `rows`, say)
/// lands in the ignored class. Earlier servers patched absent geometry with
/// 80x24 defaults; here a partial resize is dropped rather than guessed at.
pub fn decode_inbound(raw: &str) -> TermgateResult<Option<InboundFrame>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| TermgateError::Codec(e.to_string()))?;
    Ok(serde_json::from_value(value).ok())
}
