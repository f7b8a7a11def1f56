//! rosbridge v2 protocol framing.
//!
//! Only the subset the listener needs is implemented:
//!
//! | Direction | `op` | Fields |
//! |---|---|---|
//! | out | `subscribe` | `id`, `topic`, `type` |
//! | out | `unsubscribe` | `id`, `topic` |
//! | in | `publish` | `topic`, `msg` |
//! | in | `status` | `level`, `msg` |
//!
//! Anything else is reported as [`InboundFrame::Ignored`].

use serde_json::{Value, json};
use uuid::Uuid;

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A message published on a subscribed topic.
    Publish { topic: String, msg: Value },
    /// A server-side status report (e.g. an unknown message type).
    Status { level: String, msg: String },
    /// Not JSON, or an op the listener does not handle.
    Ignored(String),
}

/// Generate a unique subscription id for `topic`.
pub fn subscription_id(topic: &str) -> String {
    format!("subscribe:{topic}:{}", Uuid::new_v4())
}

/// Build a `subscribe` frame.
pub fn subscribe_frame(id: &str, topic: &str, message_type: &str) -> String {
    json!({
        "op": "subscribe",
        "id": id,
        "topic": topic,
        "type": message_type
    })
    .to_string()
}

/// Build an `unsubscribe` frame matching an earlier `subscribe` id.
pub fn unsubscribe_frame(id: &str, topic: &str) -> String {
    json!({
        "op": "unsubscribe",
        "id": id,
        "topic": topic
    })
    .to_string()
}

/// Build a `publish` frame.  Used by tests and by tooling that replays
/// recorded headset traffic.
pub fn publish_frame(topic: &str, msg: &Value) -> String {
    json!({
        "op": "publish",
        "topic": topic,
        "msg": msg
    })
    .to_string()
}

/// Decode one inbound text frame.
pub fn parse_inbound(text: &str) -> InboundFrame {
    let Ok(json) = serde_json::from_str::<Value>(text) else {
        return InboundFrame::Ignored("frame is not JSON".to_string());
    };

    let op = json.get("op").and_then(Value::as_str).unwrap_or("");
    match op {
        "publish" => {
            let Some(topic) = json.get("topic").and_then(Value::as_str) else {
                return InboundFrame::Ignored("publish frame without topic".to_string());
            };
            let msg = json.get("msg").cloned().unwrap_or(Value::Null);
            InboundFrame::Publish {
                topic: topic.to_string(),
                msg,
            }
        }
        "status" => InboundFrame::Status {
            level: json
                .get("level")
                .and_then(Value::as_str)
                .unwrap_or("info")
                .to_string(),
            msg: json
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "" => InboundFrame::Ignored("frame without op".to_string()),
        other => InboundFrame::Ignored(format!("unhandled op '{other}'")),
    }
}
