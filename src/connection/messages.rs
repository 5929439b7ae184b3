//! Socket frames and the JSON control vocabulary.
//!
//! Binary frames carry audio.  Text frames carry small JSON objects; the
//! recognised shapes are:
//!
//! | Inbound                                   | Meaning                       |
//! |-------------------------------------------|-------------------------------|
//! | `{"status": "processing"}`                | server is working on a turn   |
//! | `{"status": "completed"}`                 | reply finished                |
//! | `{"status": "cancelled" \| "stopped"}`    | reply abandoned               |
//! | `{"error": "..."}`                        | server-side failure           |
//! | `{"lifecycle": "turn_started"}`           | reply started                 |
//! | `{"lifecycle": "turn_ended"}`             | reply finished                |
//! | `{"action": "ping" \| "stop"}`            | keep-alive / halt playback    |
//! | `{"type": "transcript", "text": "..."}`   | recognised user speech        |
//! | `{"type": "status", "text": "..."}`       | free-text notice              |
//!
//! Outbound the client only sends `{"action": "ping"}` and
//! `{"action": "stop"}`.

use serde::{Deserialize, Serialize};

/// Notice texts that mark the start / end of a reply.  The server's
/// Russian phrasing is accepted alongside the English one.
const REPLY_STARTED_NOTICES: &[&str] = &["reply_started", "Начало ответа"];
const REPLY_FINISHED_NOTICES: &[&str] = &["reply_finished", "Ответ завершен"];

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// One frame crossing the socket, independent of the socket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Binary(Vec<u8>),
    Text(String),
    /// The peer (or transport) closed the socket, with an optional close code.
    Closed(Option<u16>),
}

// ---------------------------------------------------------------------------
// ControlMessage
// ---------------------------------------------------------------------------

/// A parsed inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Processing,
    ReplyStarted,
    ReplyFinished,
    /// `cancelled` / `stopped`: the reply will not continue.
    ReplyCancelled,
    Error(String),
    /// A lifecycle phase the client does not act on.
    Lifecycle(String),
    Ping,
    Stop,
    Transcript(String),
    Notice(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawControl {
    status: Option<String>,
    error: Option<String>,
    lifecycle: Option<String>,
    action: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

impl ControlMessage {
    /// Parse a text frame.  Returns `None` for invalid JSON or shapes the
    /// client does not recognise.
    pub fn parse(text: &str) -> Option<Self> {
        let raw: RawControl = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("connection: unparseable control message ({e}): {text}");
                return None;
            }
        };

        if let Some(error) = raw.error {
            return Some(Self::Error(error));
        }

        if let Some(status) = raw.status.as_deref() {
            return match status {
                "processing" => Some(Self::Processing),
                "completed" => Some(Self::ReplyFinished),
                "cancelled" | "stopped" => Some(Self::ReplyCancelled),
                other => Some(Self::Notice(other.to_string())),
            };
        }

        if let Some(lifecycle) = raw.lifecycle {
            return Some(match lifecycle.as_str() {
                "turn_started" => Self::ReplyStarted,
                "turn_ended" => Self::ReplyFinished,
                _ => Self::Lifecycle(lifecycle),
            });
        }

        if let Some(action) = raw.action.as_deref() {
            return match action {
                "ping" => Some(Self::Ping),
                "stop" => Some(Self::Stop),
                other => {
                    log::debug!("connection: ignoring action '{other}'");
                    None
                }
            };
        }

        match (raw.kind.as_deref(), raw.text) {
            (Some("transcript"), Some(text)) => Some(Self::Transcript(text)),
            (Some("status"), Some(text)) => Some(notice(text)),
            _ => None,
        }
    }
}

fn notice(text: String) -> ControlMessage {
    if REPLY_STARTED_NOTICES.contains(&text.as_str()) {
        ControlMessage::ReplyStarted
    } else if REPLY_FINISHED_NOTICES.contains(&text.as_str()) {
        ControlMessage::ReplyFinished
    } else {
        ControlMessage::Notice(text)
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Action<'a> {
    action: &'a str,
}

fn action(name: &str) -> WireMessage {
    // Serialising a single string field cannot fail.
    let json = serde_json::to_string(&Action { action: name })
        .unwrap_or_else(|_| format!(r#"{{"action":"{name}"}}"#));
    WireMessage::Text(json)
}

/// Keep-alive frame.
pub fn ping() -> WireMessage {
    action("ping")
}

/// Asks the server to abandon the current reply.
pub fn stop() -> WireMessage {
    action("stop")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_shapes() {
        assert_eq!(
            ControlMessage::parse(r#"{"status":"processing"}"#),
            Some(ControlMessage::Processing)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"status":"completed"}"#),
            Some(ControlMessage::ReplyFinished)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"status":"stopped"}"#),
            Some(ControlMessage::ReplyCancelled)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"status":"cancelled"}"#),
            Some(ControlMessage::ReplyCancelled)
        );
    }

    #[test]
    fn error_takes_precedence() {
        assert_eq!(
            ControlMessage::parse(r#"{"status":"completed","error":"boom"}"#),
            Some(ControlMessage::Error("boom".into()))
        );
    }

    #[test]
    fn parses_lifecycle_and_actions() {
        assert_eq!(
            ControlMessage::parse(r#"{"lifecycle":"turn_started"}"#),
            Some(ControlMessage::ReplyStarted)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"lifecycle":"agent_thinking"}"#),
            Some(ControlMessage::Lifecycle("agent_thinking".into()))
        );
        assert_eq!(
            ControlMessage::parse(r#"{"action":"ping"}"#),
            Some(ControlMessage::Ping)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"action":"stop"}"#),
            Some(ControlMessage::Stop)
        );
        assert_eq!(ControlMessage::parse(r#"{"action":"dance"}"#), None);
    }

    #[test]
    fn parses_typed_messages() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"transcript","text":"hello"}"#),
            Some(ControlMessage::Transcript("hello".into()))
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"status","text":"Начало ответа"}"#),
            Some(ControlMessage::ReplyStarted)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"status","text":"Ответ завершен"}"#),
            Some(ControlMessage::ReplyFinished)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"status","text":"Warming up"}"#),
            Some(ControlMessage::Notice("Warming up".into()))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(ControlMessage::parse("not json"), None);
        assert_eq!(ControlMessage::parse(r#"{"unrelated":1}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"type":"transcript"}"#), None);
    }

    #[test]
    fn outbound_actions() {
        assert_eq!(ping(), WireMessage::Text(r#"{"action":"ping"}"#.into()));
        assert_eq!(stop(), WireMessage::Text(r#"{"action":"stop"}"#.into()));
    }
}
