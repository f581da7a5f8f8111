use std::time::Duration;

use crate::items::ResponseItem;

/// `Ready` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyEvent {
    /// Session id assigned by the backend, when issued this early.
    #[serde(default)]
    session_id: Option<String>,
}

impl ReadyEvent {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// `SessionStarted` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartedEvent {
    session_id: String,
}

impl SessionStartedEvent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// `Recognized` event — partial or final transcript from the server-side
/// recognizer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedEvent {
    #[serde(default)]
    text: String,

    #[serde(default)]
    is_final: bool,
}

impl RecognizedEvent {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }
}

/// `ResponseItem` event — one playable unit streamed ahead of the
/// terminating `Response`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseItemEvent {
    #[serde(flatten)]
    item: ResponseItem,
}

impl ResponseItemEvent {
    pub fn item(&self) -> &ResponseItem {
        &self.item
    }

    pub fn into_item(self) -> ResponseItem {
        self.item
    }
}

/// `Response` event — batch of items plus session metadata for the turn.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    #[serde(default)]
    items: Vec<ResponseItem>,

    /// Cooldown hint in seconds; absent or non-positive means no cooldown.
    #[serde(default)]
    sleep_timeout: Option<f64>,

    #[serde(default)]
    session_ended: bool,

    /// Backend-side log lines for the host's console.
    #[serde(default)]
    logs: Option<Vec<String>>,
}

impl ResponseEvent {
    pub fn items(&self) -> &[ResponseItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ResponseItem> {
        self.items
    }

    pub fn sleep_timeout(&self) -> Option<Duration> {
        match self.sleep_timeout {
            Some(t) if t.is_finite() && t > 0.0 => Some(Duration::from_secs_f64(t)),
            _ => None,
        }
    }

    pub fn session_ended(&self) -> bool {
        self.session_ended
    }

    pub fn logs(&self) -> Option<&[String]> {
        self.logs.as_deref()
    }
}

/// `InputAudioStreamOpen` event — backend acknowledged the microphone
/// stream.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioStreamOpenedEvent {}

/// `Error` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    #[serde(default)]
    message: String,

    #[serde(default)]
    code: Option<String>,
}

impl ErrorEvent {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

/// `SessionEnded` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionEndedEvent {}
