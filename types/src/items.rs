/// One playable/renderable unit of a turn's response: an audio clip, image,
/// video, plain text, or control code. Consumed strictly in arrival order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    video_url: Option<String>,

    #[serde(default)]
    text: String,

    /// Ambience hint for the host (e.g. a scene/backdrop name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    background_cue: Option<String>,

    /// JSON string carrying a host command; parsed by the controller before
    /// delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    control_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    node_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    dialogue_node_id: Option<i64>,
}

impl ResponseItem {
    pub fn new(text: &str) -> Self {
        Self {
            audio_url: None,
            image_url: None,
            video_url: None,
            text: text.to_string(),
            background_cue: None,
            control_code: None,
            node_id: None,
            dialogue_node_id: None,
        }
    }

    pub fn with_audio_url(mut self, url: &str) -> Self {
        self.audio_url = Some(url.to_string());
        self
    }

    pub fn with_image_url(mut self, url: &str) -> Self {
        self.image_url = Some(url.to_string());
        self
    }

    pub fn with_video_url(mut self, url: &str) -> Self {
        self.video_url = Some(url.to_string());
        self
    }

    pub fn with_background_cue(mut self, cue: &str) -> Self {
        self.background_cue = Some(cue.to_string());
        self
    }

    pub fn with_control_code(mut self, control_code: &str) -> Self {
        self.control_code = Some(control_code.to_string());
        self
    }

    pub fn with_node_id(mut self, node_id: i64) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_dialogue_node_id(mut self, dialogue_node_id: i64) -> Self {
        self.dialogue_node_id = Some(dialogue_node_id);
        self
    }

    pub fn audio_url(&self) -> Option<&str> {
        self.audio_url.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn video_url(&self) -> Option<&str> {
        self.video_url.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn background_cue(&self) -> Option<&str> {
        self.background_cue.as_deref()
    }

    pub fn control_code(&self) -> Option<&str> {
        self.control_code.as_deref()
    }

    pub fn node_id(&self) -> Option<i64> {
        self.node_id
    }

    pub fn dialogue_node_id(&self) -> Option<i64> {
        self.dialogue_node_id
    }

    /// True when there is something to show in a message bubble.
    pub fn has_message(&self) -> bool {
        !self.text.is_empty() || self.image_url.is_some()
    }
}
