//! `<code>|<json>` framing.

use serde_json::Value;

/// Frame code for outbound RPC calls.
pub const CALL_CODE: u32 = 41;

/// Encodes a call frame: `41|{"id":<session id>,"m":<method>,"p":<params>}`.
pub fn encode_call(session_id: &str, method: &str, params: Value) -> String {
    let payload = serde_json::json!({
        "id": session_id,
        "m": method,
        "p": params,
    });
    format!("{CALL_CODE}|{payload}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub code: u32,
    /// Parsed body; `None` when the part after `|` is empty or not JSON.
    pub body: Option<Value>,
}

/// Parses an inbound frame. Returns `None` when there is no numeric code prefix.
pub fn decode(text: &str) -> Option<InboundFrame> {
    let (code, rest) = match text.split_once('|') {
        Some((code, rest)) => (code, Some(rest)),
        None => (text, None),
    };
    let code = code.trim().parse::<u32>().ok()?;
    let body = rest
        .filter(|r| !r.is_empty())
        .and_then(|r| serde_json::from_str(r).ok());
    Some(InboundFrame { code, body })
}
