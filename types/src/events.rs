pub mod client;
mod server;

use client::*;
use server::*;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "Init")]
    Init(InitEvent),
    #[serde(rename = "Input")]
    Input(InputEvent),
    #[serde(rename = "InputAudioStreamOpen")]
    InputAudioStreamOpen(InputAudioStreamOpenEvent),
    #[serde(rename = "InputAudioStreamClose")]
    InputAudioStreamClose(InputAudioStreamCloseEvent),
    #[serde(rename = "Vote")]
    Vote(VoteEvent),
    #[serde(rename = "Log")]
    Log(LogEvent),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Synthetic event injected when the socket closes; never sent by the
    /// backend itself.
    #[serde(rename = "close")]
    Close {
        reason: Option<String>,
    },
    /// Synthetic event wrapping an out-of-band binary frame (TTS audio
    /// pushed by the backend for immediate replay).
    #[serde(rename = "audio_frame")]
    AudioFrame {
        bytes: Vec<u8>,
    },
    #[serde(rename = "Ready")]
    Ready(ReadyEvent),
    #[serde(rename = "SessionStarted")]
    SessionStarted(SessionStartedEvent),
    #[serde(rename = "Recognized")]
    Recognized(RecognizedEvent),
    #[serde(rename = "ResponseItem")]
    ResponseItem(ResponseItemEvent),
    #[serde(rename = "Response")]
    Response(ResponseEvent),
    #[serde(rename = "InputAudioStreamOpen")]
    InputAudioStreamOpen(InputAudioStreamOpenedEvent),
    #[serde(rename = "Error")]
    Error(ErrorEvent),
    #[serde(rename = "SessionEnded")]
    SessionEnded(SessionEndedEvent),
}
