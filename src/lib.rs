mod capture;
mod client;
mod error;
mod session;
mod speech;
mod ui;

pub use botwire_types as types;

pub use capture::{AudioInput, FrameSink, StreamInfo};
pub use client::config::{Config, ConfigBuilder};
pub use client::{connect, connect_with_config, Client, ClientTx, Outbound, ServerRx};
pub use error::{BotError, ErrorKind, Result};
pub use session::{InitOptions, SessionController, SessionControllerBuilder, SessionState, SoundCues};
pub use speech::{Recognizer, RecognizerConfig, TranscriptEvent, TranscriptSink};
pub use ui::{
    AudioOutput, AudioSource, MessageDirection, NullAudioOutput, PlaybackDone, StatusUpdate,
    UiDelegate, UiMessage,
};

#[cfg(feature = "utils")]
pub use botwire_utils as utils;
