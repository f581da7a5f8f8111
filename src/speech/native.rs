use std::sync::Arc;

use crate::error::Result;

use super::{Recognizer, RecognizerConfig, TranscriptSink};

/// Wraps the host recognizer and tracks one listen cycle at a time.
///
/// Interim results are not requested, but a recognizer may report partials
/// anyway; the latest one is kept so a cycle that ends abruptly can still
/// commit what it heard.
pub(crate) struct NativeEngine {
    recognizer: Arc<dyn Recognizer>,
    listening: bool,
    transcript: String,
    committed: bool,
}

impl NativeEngine {
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            recognizer,
            listening: false,
            transcript: String::new(),
            committed: false,
        }
    }

    /// Begins a fresh cycle for a single utterance.
    pub fn start(&mut self, language: Option<&str>, sink: TranscriptSink) -> Result<()> {
        self.transcript.clear();
        self.committed = false;
        let config = RecognizerConfig {
            language: language.map(str::to_string),
            continuous: false,
            interim_results: false,
            max_alternatives: 1,
        };
        self.recognizer.start(config, sink)?;
        self.listening = true;
        Ok(())
    }

    pub fn note_partial(&mut self, text: &str) {
        self.transcript = text.to_string();
    }

    /// Ends the cycle with a final result. Falls back to the last partial
    /// when the recognizer's final text is empty.
    pub fn commit(&mut self, final_text: &str) -> String {
        self.committed = true;
        self.listening = false;
        if final_text.is_empty() {
            std::mem::take(&mut self.transcript)
        } else {
            self.transcript.clear();
            final_text.to_string()
        }
    }

    pub fn committed(&self) -> bool {
        self.committed
    }

    pub fn stop(&mut self) {
        if self.listening {
            self.recognizer.stop();
            self.listening = false;
        }
    }

    pub fn close(&mut self) {
        self.stop();
        self.transcript.clear();
        self.committed = false;
    }
}
