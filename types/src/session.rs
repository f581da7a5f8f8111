use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Which speech engine carries the session's speech-to-text: a recognizer
/// native to the host, or raw PCM streamed to the backend. Decided once per
/// session and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSelection {
    WebSpeech,
    AudioStream,
}

impl Serialize for EngineSelection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            EngineSelection::WebSpeech => serializer.serialize_str("web-speech-api"),
            EngineSelection::AudioStream => serializer.serialize_str("audio-stream-api"),
        }
    }
}

impl FromStr for EngineSelection {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web-speech-api" => Ok(EngineSelection::WebSpeech),
            "audio-stream-api" => Ok(EngineSelection::AudioStream),
            _ => Err(serde::de::Error::custom(format!(
                "unknown engine selection: {s}"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for EngineSelection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EngineSelection::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Container format the backend uses for TTS audio files.
#[derive(Debug, Clone, PartialEq)]
pub enum TtsFileType {
    Mp3,
    Wav,
    Custom(String),
}

impl Serialize for TtsFileType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TtsFileType::Mp3 => serializer.serialize_str("mp3"),
            TtsFileType::Wav => serializer.serialize_str("wav"),
            TtsFileType::Custom(s) => serializer.serialize_str(s),
        }
    }
}

impl FromStr for TtsFileType {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mp3" => TtsFileType::Mp3,
            "wav" => TtsFileType::Wav,
            _ => TtsFileType::Custom(s.to_string()),
        })
    }
}

impl<'de> Deserialize<'de> for TtsFileType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(TtsFileType::from_str(&s).unwrap())
    }
}

/// Config block carried by the `Init` message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConfig {
    /// Sample rate of the PCM frames streamed upstream.
    sample_rate: u32,

    tts_file_type: TtsFileType,

    #[serde(skip_serializing_if = "Option::is_none")]
    locale: Option<String>,

    /// Backend voice name for TTS.
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<String>,

    /// Ask the backend to stream `ResponseItem` events ahead of the
    /// terminating `Response`.
    send_response_items: bool,

    /// Ask the backend to stream partial `Recognized` transcripts.
    interim_stt_results: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<EngineSelection>,
}

impl InitConfig {
    pub fn builder() -> InitConfigBuilder {
        InitConfigBuilder::new()
    }

    /// Builder seeded with this config, for per-session overrides.
    pub fn to_builder(&self) -> InitConfigBuilder {
        InitConfigBuilder { config: self.clone() }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn tts_file_type(&self) -> &TtsFileType {
        &self.tts_file_type
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    pub fn send_response_items(&self) -> bool {
        self.send_response_items
    }

    pub fn interim_stt_results(&self) -> bool {
        self.interim_stt_results
    }

    pub fn engine(&self) -> Option<EngineSelection> {
        self.engine
    }
}

pub struct InitConfigBuilder {
    config: InitConfig,
}

impl InitConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: InitConfig {
                sample_rate: 16000,
                tts_file_type: TtsFileType::Mp3,
                locale: None,
                voice: None,
                send_response_items: true,
                interim_stt_results: true,
                engine: None,
            },
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    pub fn with_tts_file_type(mut self, tts_file_type: TtsFileType) -> Self {
        self.config.tts_file_type = tts_file_type;
        self
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.config.locale = Some(locale.to_string());
        self
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.config.voice = Some(voice.to_string());
        self
    }

    pub fn with_send_response_items(mut self, enabled: bool) -> Self {
        self.config.send_response_items = enabled;
        self
    }

    pub fn with_interim_stt_results(mut self, enabled: bool) -> Self {
        self.config.interim_stt_results = enabled;
        self
    }

    pub fn with_engine(mut self, engine: EngineSelection) -> Self {
        self.config.engine = Some(engine);
        self
    }

    pub fn build(self) -> InitConfig {
        self.config
    }
}

impl Default for InitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
