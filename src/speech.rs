use std::sync::Arc;

use crate::capture::AudioInput;
use crate::client::ClientTx;
use crate::error::{BotError, Result};
use crate::types::EngineSelection;

mod native;
mod stream;

pub(crate) use native::NativeEngine;
pub(crate) use stream::StreamEngine;

/// Events a speech recognizer reports back to the controller.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    /// A recognition result, partial or final.
    Result { text: String, is_final: bool },
    /// The cycle finished without a usable result.
    NoMatch,
    /// The recognizer stopped capturing, end of speech or timeout.
    AudioEnded,
    /// Recognizer failure. Recoverable: the controller starts a fresh
    /// listen cycle.
    Error(String),
}

pub type TranscriptSink = Box<dyn Fn(TranscriptEvent) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct RecognizerConfig {
    pub language: Option<String>,
    pub continuous: bool,
    pub interim_results: bool,
    pub max_alternatives: u32,
}

/// Host seam for a platform speech recognizer running in
/// single-utterance mode.
pub trait Recognizer: Send + Sync {
    /// Begins one recognition cycle, reporting to `sink` until a final
    /// result, `AudioEnded`, or an error.
    fn start(&self, config: RecognizerConfig, sink: TranscriptSink) -> Result<()>;

    /// Cancels the cycle. No sink calls may arrive after this returns.
    fn stop(&self);
}

/// How the controller learns that listening actually started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    /// Recognition is live as soon as the call returns.
    Listening,
    /// Frames are flowing but the backend has to ack the stream first.
    AwaitingAck,
}

pub(crate) enum SpeechEngine {
    WebSpeech(NativeEngine),
    AudioStream(StreamEngine),
}

impl SpeechEngine {
    fn kind(&self) -> EngineSelection {
        match self {
            SpeechEngine::WebSpeech(_) => EngineSelection::WebSpeech,
            SpeechEngine::AudioStream(_) => EngineSelection::AudioStream,
        }
    }
}

/// Owns the active speech engine and the host seams it is built from.
/// Engine instances live here across sessions; switching kinds tears the
/// previous engine down and reclaims its input device.
pub(crate) struct EngineSelector {
    recognizer: Option<Arc<dyn Recognizer>>,
    input: Option<Box<dyn AudioInput>>,
    engine: Option<SpeechEngine>,
    language: Option<String>,
}

impl EngineSelector {
    pub fn new(recognizer: Option<Arc<dyn Recognizer>>, input: Option<Box<dyn AudioInput>>) -> Self {
        Self {
            recognizer,
            input,
            engine: None,
            language: None,
        }
    }

    /// Prefers the native recognizer whenever the host provides one.
    pub fn detect(&self) -> EngineSelection {
        if self.recognizer.is_some() {
            EngineSelection::WebSpeech
        } else {
            EngineSelection::AudioStream
        }
    }

    /// Ensures an engine of the requested kind is instantiated, tearing
    /// down the previous one on a switch. Requests for web speech without
    /// a recognizer fall back to the audio stream. Returns the kind
    /// actually selected.
    pub async fn select(&mut self, kind: EngineSelection) -> EngineSelection {
        let kind = match kind {
            EngineSelection::WebSpeech if self.recognizer.is_none() => {
                tracing::warn!("web speech requested but no recognizer available, using audio stream");
                EngineSelection::AudioStream
            }
            kind => kind,
        };

        if self.engine.as_ref().map(SpeechEngine::kind) == Some(kind) {
            return kind;
        }

        if let Some(previous) = self.engine.take() {
            match previous {
                SpeechEngine::WebSpeech(mut engine) => engine.close(),
                SpeechEngine::AudioStream(mut engine) => {
                    engine.stop(false).await;
                    self.input = engine.into_input();
                }
            }
        }

        let engine = match (kind, self.recognizer.clone()) {
            (EngineSelection::WebSpeech, Some(recognizer)) => {
                SpeechEngine::WebSpeech(NativeEngine::new(recognizer))
            }
            _ => SpeechEngine::AudioStream(StreamEngine::new(self.input.take())),
        };
        self.engine = Some(engine);
        kind
    }

    /// Only the native engine honors a language override; the backend
    /// picks the language for the audio stream.
    pub fn select_language(&mut self, code: &str) {
        self.language = Some(code.to_string());
    }

    /// Points the stream engine at a fresh connection.
    pub fn bind_transport(&mut self, tx: ClientTx, sample_rate: u32) {
        if let Some(SpeechEngine::AudioStream(engine)) = self.engine.as_mut() {
            engine.bind(tx, sample_rate);
        }
    }

    /// Starts a listen cycle on the selected engine.
    pub async fn start_listening(&mut self, sink: TranscriptSink) -> Result<StartOutcome> {
        match self.engine.as_mut() {
            Some(SpeechEngine::WebSpeech(engine)) => {
                engine.start(self.language.as_deref(), sink)?;
                Ok(StartOutcome::Listening)
            }
            Some(SpeechEngine::AudioStream(engine)) => engine.start().await,
            None => Err(BotError::client("no speech engine selected")),
        }
    }

    /// Ends the current listen cycle. `notify` tells the backend the
    /// audio stream is done so it finalizes recognition; it is ignored by
    /// the native engine.
    pub async fn stop_listening(&mut self, notify: bool) {
        match self.engine.as_mut() {
            Some(SpeechEngine::WebSpeech(engine)) => engine.stop(),
            Some(SpeechEngine::AudioStream(engine)) => engine.stop(notify).await,
            None => {}
        }
    }

    /// Halts capture without closing the stream, for pause.
    pub fn suspend_listening(&mut self) {
        match self.engine.as_mut() {
            Some(SpeechEngine::WebSpeech(engine)) => engine.stop(),
            Some(SpeechEngine::AudioStream(engine)) => engine.suspend(),
            None => {}
        }
    }

    /// Session teardown: release devices and forget the connection.
    pub async fn close(&mut self) {
        match self.engine.as_mut() {
            Some(SpeechEngine::WebSpeech(engine)) => engine.close(),
            Some(SpeechEngine::AudioStream(engine)) => {
                engine.stop(false).await;
                engine.unbind();
            }
            None => {}
        }
    }

    pub fn native_mut(&mut self) -> Option<&mut NativeEngine> {
        match self.engine.as_mut() {
            Some(SpeechEngine::WebSpeech(engine)) => Some(engine),
            _ => None,
        }
    }
}
