use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::BotError;
use crate::session::SessionState;
use crate::types::ResponseItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Sent,
    Received,
}

/// Chat transcript entry surfaced to the host UI.
#[derive(Debug, Clone)]
pub struct UiMessage {
    pub direction: MessageDirection,
    pub text: String,
    pub image_url: Option<String>,
    /// Looping background sound to run behind this message, if any.
    pub background_cue: Option<String>,
    pub node_id: Option<i64>,
    pub dialogue_node_id: Option<i64>,
}

impl UiMessage {
    pub(crate) fn sent(text: &str) -> Self {
        Self {
            direction: MessageDirection::Sent,
            text: text.to_string(),
            image_url: None,
            background_cue: None,
            node_id: None,
            dialogue_node_id: None,
        }
    }

    pub(crate) fn received(item: &ResponseItem) -> Self {
        Self {
            direction: MessageDirection::Received,
            text: item.text().to_string(),
            image_url: item.image_url().map(str::to_string),
            background_cue: item.background_cue().map(str::to_string),
            node_id: item.node_id(),
            dialogue_node_id: item.dialogue_node_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub state: SessionState,
    /// Whether a session is currently open against the backend.
    pub is_active: bool,
}

/// Host-side UI callbacks. Everything except `add_message` has a no-op
/// default, so a host only implements what it can render.
pub trait UiDelegate: Send + Sync {
    fn add_message(&self, message: UiMessage);

    /// Video attachment for the current turn. `done` must be finished when
    /// playback completes; the default finishes immediately so hosts
    /// without video keep the item queue moving.
    fn add_video(&self, url: &str, done: PlaybackDone) {
        let _ = url;
        done.finish();
    }

    fn set_status(&self, status: StatusUpdate) {
        let _ = status;
    }

    fn on_error(&self, error: &BotError) {
        let _ = error;
    }

    /// Session is over, whether it ended gracefully or fatally.
    fn on_end(&self) {}

    /// Diagnostic lines the backend attached to a response.
    fn add_logs(&self, lines: &[String]) {
        let _ = lines;
    }

    fn focus_on_node(&self, node_id: i64) {
        let _ = node_id;
    }

    /// Backend-issued UI command. `code` is the command discriminator,
    /// `payload` the full decoded object it came from.
    fn handle_command(&self, code: &str, payload: &Value) {
        let _ = (code, payload);
    }

    /// Speech-to-text transcript, partial or final.
    fn on_transcript(&self, text: &str, is_final: bool) {
        let _ = (text, is_final);
    }

    /// The native recognizer stopped capturing without a final result.
    fn on_audio_input_ended(&self) {}
}

/// Media handed to the audio output: a URL to fetch (TTS file) or a raw
/// frame pushed by the backend.
#[derive(Debug, Clone)]
pub enum AudioSource {
    Url(String),
    Frame(Vec<u8>),
}

/// Host seam for audio playback.
pub trait AudioOutput: Send + Sync {
    /// Starts playback. `done` must be finished when the media ends.
    fn play(&self, source: AudioSource, done: PlaybackDone);

    fn pause(&self);

    fn resume(&self);

    /// Stops and discards the current playback. Pending `done` handles
    /// may be dropped unfinished.
    fn stop(&self);
}

/// Completion handle for one playback. Dropping it without calling
/// [`finish`](PlaybackDone::finish) counts as an aborted playback.
#[derive(Debug)]
pub struct PlaybackDone {
    tx: oneshot::Sender<()>,
}

impl PlaybackDone {
    pub(crate) fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Handle whose completion nobody observes, for fire-and-forget cues.
    pub(crate) fn detached() -> Self {
        let (tx, _) = oneshot::channel();
        Self { tx }
    }

    pub fn finish(self) {
        let _ = self.tx.send(());
    }
}

/// Output for hosts without audio: every playback completes instantly,
/// which turns TTS turns into text-only turns.
pub struct NullAudioOutput;

impl AudioOutput for NullAudioOutput {
    fn play(&self, _source: AudioSource, done: PlaybackDone) {
        done.finish();
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn stop(&self) {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_playback_done_signals() {
        let (done, rx) = PlaybackDone::pair();
        done.finish();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_playback_drop_counts_as_abort() {
        let (done, rx) = PlaybackDone::pair();
        drop(done);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_null_output_finishes_immediately() {
        let (done, rx) = PlaybackDone::pair();
        NullAudioOutput.play(AudioSource::Url("https://cdn.example/a.mp3".into()), done);
        assert!(rx.await.is_ok());
    }
}
