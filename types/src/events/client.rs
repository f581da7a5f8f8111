use std::collections::BTreeMap;

use crate::logs::LogEntry;
use crate::session::InitConfig;

/// `Init` event — first message on a fresh socket.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitEvent {
    /// Stable identifier of the device/installation opening the session.
    device_id: String,

    /// Key identifying the bot to converse with.
    bot_key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,

    /// Session configuration negotiated with the backend.
    config: InitConfig,
}

impl InitEvent {
    pub fn new(device_id: &str, bot_key: &str, config: InitConfig) -> Self {
        Self {
            device_id: device_id.to_string(),
            bot_key: bot_key.to_string(),
            auth_token: None,
            config,
        }
    }

    pub fn with_auth_token(mut self, auth_token: &str) -> Self {
        self.auth_token = Some(auth_token.to_string());
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn bot_key(&self) -> &str {
        &self.bot_key
    }

    pub fn config(&self) -> &InitConfig {
        &self.config
    }
}

/// `Input` event — one text turn from the user.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    locale: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<String>,

    /// Free-form attributes attached to the turn (e.g. a dialogue node to
    /// start from).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

impl InputEvent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            locale: None,
            timezone: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.timezone = Some(timezone.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// `InputAudioStreamOpen` event — announces that binary PCM frames follow.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputAudioStreamOpenEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
}

impl InputAudioStreamOpenEvent {
    pub fn new() -> Self {
        Self { sample_rate: None }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

impl Default for InputAudioStreamOpenEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// `InputAudioStreamClose` event — no further PCM frames for this utterance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioStreamCloseEvent {}

impl InputAudioStreamCloseEvent {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for InputAudioStreamCloseEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// `Vote` event — feedback on a turn/node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEvent {
    turn_id: i64,
    node_id: i64,
    vote: i32,
}

impl VoteEvent {
    pub fn new(turn_id: i64, node_id: i64, vote: i32) -> Self {
        Self {
            turn_id,
            node_id,
            vote,
        }
    }

    pub fn turn_id(&self) -> i64 {
        self.turn_id
    }

    pub fn node_id(&self) -> i64 {
        self.node_id
    }

    pub fn vote(&self) -> i32 {
        self.vote
    }
}

/// `Log` event — batched flush of the local log buffer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEvent {
    entries: Vec<LogEntry>,
}

impl LogEvent {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}
