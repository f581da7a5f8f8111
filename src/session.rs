use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::capture::AudioInput;
use crate::client;
use crate::client::Client;
use crate::error::{BotError, Result};
use crate::speech::{EngineSelector, Recognizer, StartOutcome, TranscriptEvent, TranscriptSink};
use crate::types;
use crate::types::{EngineSelection, ResponseItem};
use crate::ui::{AudioOutput, AudioSource, NullAudioOutput, PlaybackDone, StatusUpdate, UiDelegate, UiMessage};

mod logs;
mod queue;

use logs::LogBuffer;
use queue::TurnState;

/// Controller phase, visible to the host through the status callback and
/// the watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Sleeping,
    Listening,
    Processing,
    Responding,
    Paused,
}

/// Feedback sounds played straight through the audio output, outside the
/// response queue.
#[derive(Debug, Clone, Default)]
pub struct SoundCues {
    listening: Option<String>,
    error: Option<String>,
}

impl SoundCues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listening(mut self, url: impl Into<String>) -> Self {
        self.listening = Some(url.into());
        self
    }

    pub fn with_error(mut self, url: impl Into<String>) -> Self {
        self.error = Some(url.into());
        self
    }

    pub fn listening(&self) -> Option<&str> {
        self.listening.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Per-session options passed to [`SessionController::init`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    intro: Option<String>,
    locale: Option<String>,
    timezone: Option<String>,
    input_audio: bool,
    output_audio: bool,
    intro_node: Option<i64>,
    auto_start: bool,
    sound_cues: SoundCues,
    force_restart: bool,
    stt_override: Option<EngineSelection>,
}

impl InitOptions {
    pub fn new() -> Self {
        Self {
            intro: None,
            locale: None,
            timezone: None,
            input_audio: true,
            output_audio: true,
            intro_node: None,
            auto_start: true,
            sound_cues: SoundCues::default(),
            force_restart: false,
            stt_override: None,
        }
    }

    /// Hidden first utterance sent on `Ready`, typically a command like
    /// `#intro` that the bot script reacts to.
    pub fn with_intro(mut self, intro: impl Into<String>) -> Self {
        self.intro = Some(intro.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_input_audio(mut self, enabled: bool) -> Self {
        self.input_audio = enabled;
        self
    }

    pub fn with_output_audio(mut self, enabled: bool) -> Self {
        self.output_audio = enabled;
        self
    }

    /// Dialogue node the conversation starts from, attached to the first
    /// input of the session.
    pub fn with_intro_node(mut self, node_id: i64) -> Self {
        self.intro_node = Some(node_id);
        self
    }

    /// With auto start off the controller connects but stays asleep until
    /// the first user input.
    pub fn with_auto_start(mut self, enabled: bool) -> Self {
        self.auto_start = enabled;
        self
    }

    pub fn with_sound_cues(mut self, cues: SoundCues) -> Self {
        self.sound_cues = cues;
        self
    }

    /// Tear down a live session instead of continuing it.
    pub fn with_force_restart(mut self, enabled: bool) -> Self {
        self.force_restart = enabled;
        self
    }

    /// Overrides speech engine detection for this session.
    pub fn with_stt_override(mut self, engine: EngineSelection) -> Self {
        self.stt_override = Some(engine);
        self
    }

    pub fn intro(&self) -> Option<&str> {
        self.intro.as_deref()
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn input_audio(&self) -> bool {
        self.input_audio
    }

    pub fn output_audio(&self) -> bool {
        self.output_audio
    }

    pub fn intro_node(&self) -> Option<i64> {
        self.intro_node
    }

    pub fn auto_start(&self) -> bool {
        self.auto_start
    }

    pub fn sound_cues(&self) -> &SoundCues {
        &self.sound_cues
    }

    pub fn force_restart(&self) -> bool {
        self.force_restart
    }

    pub fn stt_override(&self) -> Option<EngineSelection> {
        self.stt_override
    }
}

impl Default for InitOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum Command {
    Init {
        opts: InitOptions,
        reply: tokio::sync::oneshot::Sender<Result<()>>,
    },
    TextInput {
        text: String,
        echo: bool,
        close_audio: bool,
    },
    Pause,
    Resume,
    SetInputAudio(bool),
    SetOutputAudio(bool),
    Vote {
        turn_id: i64,
        node_id: i64,
        vote: i32,
    },
    SkipPlayed,
    SelectLanguage(String),
    Stop,
}

/// Everything the driver task reacts to, funneled through one channel so
/// ordering between commands, server events, speech results and playback
/// completions is total.
enum Event {
    Cmd(Command),
    Server(u64, types::ServerEvent),
    Played(u64, u64),
    Stt(u64, TranscriptEvent),
}

pub(crate) type Connector =
    Box<dyn FnMut(types::InitConfig) -> BoxFuture<'static, Result<Client>> + Send>;

pub struct SessionControllerBuilder {
    config: client::config::Config,
    capacity: usize,
    ui: Arc<dyn UiDelegate>,
    audio_output: Arc<dyn AudioOutput>,
    recognizer: Option<Arc<dyn Recognizer>>,
    audio_input: Option<Box<dyn AudioInput>>,
    connector: Option<Connector>,
}

impl SessionControllerBuilder {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_audio_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.audio_output = output;
        self
    }

    /// Platform recognizer; providing one makes engine detection prefer
    /// native speech.
    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Microphone used by the audio stream engine.
    pub fn with_audio_input(mut self, input: Box<dyn AudioInput>) -> Self {
        self.audio_input = Some(input);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> SessionController {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let (state_tx, state_rx) = tokio::sync::watch::channel(SessionState::Sleeping);

        let base_init = self.config.init_config().clone();
        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector(self.capacity, self.config),
        };

        let driver = Driver {
            ui: self.ui,
            audio: self.audio_output,
            connector,
            events_tx: events_tx.clone(),
            state_tx,
            client: None,
            generation: 0,
            opts: InitOptions::new(),
            base_init,
            selector: EngineSelector::new(self.recognizer, self.audio_input),
            turn: TurnState::new(),
            playing: None,
            play_seq: 0,
            awaiting_ack: false,
            paused_from: None,
            logs: LogBuffer::new(),
            sleep_until: None,
            input_audio: true,
            output_audio: true,
            session_live: false,
            intro_node: None,
        };
        tokio::spawn(driver.run(events_rx));

        SessionController {
            events: events_tx,
            state_rx,
        }
    }
}

fn default_connector(capacity: usize, config: client::config::Config) -> Connector {
    Box::new(move |init| {
        let config = config.to_builder().with_init_config(init).build();
        Box::pin(async move { client::connect_with_config(capacity, config).await })
    })
}

/// Handle to the session driver task. Cheap to clone; all methods are
/// safe to call from any task.
#[derive(Clone)]
pub struct SessionController {
    events: tokio::sync::mpsc::UnboundedSender<Event>,
    state_rx: tokio::sync::watch::Receiver<SessionState>,
}

impl SessionController {
    pub fn builder(config: client::config::Config, ui: Arc<dyn UiDelegate>) -> SessionControllerBuilder {
        SessionControllerBuilder {
            config,
            capacity: 1024,
            ui,
            audio_output: Arc::new(NullAudioOutput),
            recognizer: None,
            audio_input: None,
            connector: None,
        }
    }

    /// Opens a session (or continues one inside its sleep window) and
    /// resolves once the socket is up and the `Init` message is on its way.
    pub async fn init(&self, opts: InitOptions) -> Result<()> {
        let (reply, response) = tokio::sync::oneshot::channel();
        self.command(Command::Init { opts, reply })?;
        response
            .await
            .map_err(|_| BotError::client("session driver stopped"))?
    }

    /// User input. `echo` shows the text in the transcript;
    /// `close_audio_after` also closes the input audio stream.
    pub fn handle_text_input(&self, text: &str, echo: bool, close_audio_after: bool) -> Result<()> {
        self.command(Command::TextInput {
            text: text.to_string(),
            echo,
            close_audio: close_audio_after,
        })
    }

    pub fn pause(&self) -> Result<()> {
        self.command(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.command(Command::Resume)
    }

    pub fn set_input_audio(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetInputAudio(enabled))
    }

    pub fn set_output_audio(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetOutputAudio(enabled))
    }

    pub fn send_vote(&self, turn_id: i64, node_id: i64, vote: i32) -> Result<()> {
        self.command(Command::Vote { turn_id, node_id, vote })
    }

    /// Fast-forwards the turn in flight: remaining items are delivered
    /// without playback and the turn ends normally.
    pub fn skip_played_messages(&self) -> Result<()> {
        self.command(Command::SkipPlayed)
    }

    /// Recognition language for the native engine. The backend picks the
    /// language when recognition runs server-side.
    pub fn select_language(&self, code: &str) -> Result<()> {
        self.command(Command::SelectLanguage(code.to_string()))
    }

    /// Ends the session: socket closed, microphone released, state forced
    /// to sleeping. Safe to call repeatedly.
    pub fn stop(&self) -> Result<()> {
        self.command(Command::Stop)
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn state_changes(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.events
            .send(Event::Cmd(cmd))
            .map_err(|_| BotError::client("session driver stopped"))
    }
}

struct Driver {
    ui: Arc<dyn UiDelegate>,
    audio: Arc<dyn AudioOutput>,
    connector: Connector,
    events_tx: tokio::sync::mpsc::UnboundedSender<Event>,
    state_tx: tokio::sync::watch::Sender<SessionState>,

    client: Option<Client>,
    /// Bumped on every connect and teardown; events stamped with an older
    /// generation belong to a dead session and are dropped.
    generation: u64,
    opts: InitOptions,
    base_init: types::InitConfig,
    selector: EngineSelector,
    turn: TurnState,
    playing: Option<u64>,
    play_seq: u64,
    awaiting_ack: bool,
    paused_from: Option<SessionState>,
    logs: LogBuffer,
    sleep_until: Option<Instant>,
    input_audio: bool,
    output_audio: bool,
    session_live: bool,
    intro_node: Option<i64>,
}

impl Driver {
    async fn run(mut self, mut events: tokio::sync::mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Cmd(cmd) => self.on_command(cmd).await,
                Event::Server(generation, event) => {
                    if generation == self.generation {
                        self.on_server_event(event).await;
                    }
                }
                Event::Played(generation, seq) => {
                    if generation == self.generation && self.playing == Some(seq) {
                        self.playing = None;
                        self.advance_queue().await;
                    }
                }
                Event::Stt(generation, event) => {
                    if generation == self.generation {
                        self.on_transcript_event(event).await;
                    }
                }
            }
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Init { opts, reply } => {
                let result = self.init_session(opts).await;
                let _ = reply.send(result);
            }
            Command::TextInput { text, echo, close_audio } => {
                self.text_input(&text, echo, close_audio).await;
            }
            Command::Pause => self.pause(),
            Command::Resume => self.resume().await,
            Command::SetInputAudio(enabled) => self.set_input_audio(enabled).await,
            Command::SetOutputAudio(enabled) => self.set_output_audio(enabled).await,
            Command::Vote { turn_id, node_id, vote } => self.vote(turn_id, node_id, vote).await,
            Command::SkipPlayed => self.fast_forward().await,
            Command::SelectLanguage(code) => self.selector.select_language(&code),
            Command::Stop => self.shutdown().await,
        }
    }

    async fn init_session(&mut self, opts: InitOptions) -> Result<()> {
        if !opts.force_restart() && self.session_live && self.sleep_deadline_active() {
            self.logs.info("continuing session within sleep window");
            self.sleep_until = None;
            self.input_audio = opts.input_audio();
            self.output_audio = opts.output_audio();
            self.opts = opts;
            self.enter_listening().await;
            return Ok(());
        }

        if self.session_live {
            self.logs.info("restarting session");
            self.flush_logs().await;
            self.teardown().await;
        }

        self.input_audio = opts.input_audio();
        self.output_audio = opts.output_audio();
        self.intro_node = opts.intro_node();
        self.opts = opts;
        self.turn.reset();
        self.playing = None;
        self.sleep_until = None;
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;

        // pick the engine first so the init config announces what this
        // session will actually use
        let requested = self.opts.stt_override().unwrap_or_else(|| self.selector.detect());
        let engine = self.selector.select(requested).await;

        let mut init = self.base_init.to_builder();
        if let Some(locale) = self.opts.locale() {
            init = init.with_locale(locale);
        }
        let init = init.with_engine(engine).build();

        self.logs.reset_epoch();
        self.logs.info(format!("session opening ({:?} engine)", engine));

        let mut connected = match (self.connector)(init.clone()).await {
            Ok(client) => client,
            Err(e) => {
                let err = e.clone();
                self.fatal(e).await;
                return Err(err);
            }
        };

        let server_rx = match connected.server_events() {
            Ok(rx) => rx,
            Err(e) => {
                let err = e.clone();
                self.fatal(e).await;
                return Err(err);
            }
        };
        let client_tx = match connected.sender() {
            Ok(tx) => tx,
            Err(e) => {
                let err = e.clone();
                self.fatal(e).await;
                return Err(err);
            }
        };

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut server_rx = server_rx;
            loop {
                match server_rx.recv().await {
                    Ok(event) => {
                        if events.send(Event::Server(generation, event)).is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("server event relay lagged, dropped {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.selector.bind_transport(client_tx, init.sample_rate());
        self.client = Some(connected);
        self.session_live = true;
        self.push_status();
        Ok(())
    }

    async fn on_server_event(&mut self, event: types::ServerEvent) {
        match event {
            types::ServerEvent::Ready(ready) => {
                let session_id = ready.session_id().map(str::to_string);
                self.on_ready(session_id).await;
            }
            types::ServerEvent::SessionStarted(started) => {
                self.logs.info(format!("session started: {}", started.session_id()));
            }
            types::ServerEvent::Recognized(recognized) => {
                let text = recognized.text().to_string();
                self.on_recognized(&text, recognized.is_final()).await;
            }
            types::ServerEvent::ResponseItem(event) => {
                self.turn.push_streamed(event.into_item());
                self.maybe_drain().await;
            }
            types::ServerEvent::Response(response) => {
                self.logs.info(format!("response with {} item(s)", response.items().len()));
                if let Some(lines) = response.logs() {
                    self.ui.add_logs(lines);
                }
                let sleep_hint = response.sleep_timeout();
                let ended = response.session_ended();
                self.turn.merge_response(response.into_items(), sleep_hint, ended);
                self.maybe_drain().await;
            }
            types::ServerEvent::InputAudioStreamOpen(_) => {
                if self.awaiting_ack {
                    self.awaiting_ack = false;
                    // an ack landing while paused is absorbed; resume
                    // re-enters listening on its own
                    if self.state() != SessionState::Paused {
                        self.listening_now();
                    }
                }
            }
            types::ServerEvent::Error(error) => {
                self.fatal(BotError::server(error.message())).await;
            }
            types::ServerEvent::SessionEnded(_) => {
                self.logs.info("session ended by backend");
                self.turn.latch_end();
                if !self.output_audio {
                    self.fast_forward().await;
                } else if self.playing.is_none() {
                    self.maybe_drain().await;
                }
                // else: the latch fires once current playback completes
            }
            types::ServerEvent::Close { reason } => {
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                self.fatal(BotError::transport(reason)).await;
            }
            types::ServerEvent::AudioFrame { bytes } => {
                if self.output_audio {
                    self.audio.play(AudioSource::Frame(bytes), PlaybackDone::detached());
                }
            }
        }
    }

    async fn on_ready(&mut self, session_id: Option<String>) {
        match session_id {
            Some(id) => self.logs.info(format!("backend ready, session {}", id)),
            None => self.logs.info("backend ready"),
        }
        if !self.opts.auto_start() {
            return;
        }
        if let Some(intro) = self.opts.intro().map(str::to_string) {
            // the intro is machinery, not something the user typed
            self.text_input(&intro, false, false).await;
        }
        // without an intro the backend pushes the opening turn itself
    }

    /// Server-side recognition result for the audio stream engine.
    async fn on_recognized(&mut self, text: &str, is_final: bool) {
        self.ui.on_transcript(text, is_final);
        if !is_final {
            return;
        }
        if text.is_empty() {
            self.logs.info("empty recognition result");
            return;
        }
        self.logs.info("utterance recognized");
        self.ui.add_message(UiMessage::sent(text));
        self.turn.begin_turn();
        // the backend already has the utterance; just stop pushing frames
        self.selector.stop_listening(false).await;
        self.awaiting_ack = false;
        self.set_state(SessionState::Processing);
    }

    async fn on_transcript_event(&mut self, event: TranscriptEvent) {
        match event {
            TranscriptEvent::Result { text, is_final } => {
                if !is_final {
                    if let Some(native) = self.selector.native_mut() {
                        native.note_partial(&text);
                    }
                    self.ui.on_transcript(&text, false);
                    return;
                }
                let utterance = match self.selector.native_mut() {
                    Some(native) => native.commit(&text),
                    None => text,
                };
                self.ui.on_transcript(&utterance, true);
                if utterance.is_empty() {
                    self.restart_listening().await;
                    return;
                }
                self.text_input(&utterance, true, false).await;
            }
            TranscriptEvent::NoMatch => {
                self.logs.info("recognizer reported no match");
                self.restart_listening().await;
            }
            TranscriptEvent::AudioEnded => {
                let committed = self.selector.native_mut().map(|n| n.committed()).unwrap_or(true);
                if committed {
                    return;
                }
                self.ui.on_audio_input_ended();
                self.restart_listening().await;
            }
            TranscriptEvent::Error(message) => {
                self.logs.error(format!("recognizer error: {}", message));
                self.restart_listening().await;
            }
        }
    }

    async fn text_input(&mut self, text: &str, echo: bool, close_audio: bool) {
        if self.sleep_deadline_active() {
            tracing::debug!("ignoring input during sleep window");
            return;
        }
        self.sleep_until = None;

        if !self.session_live {
            tracing::warn!("input with no open session");
            return;
        }

        // new input makes pending output obsolete
        self.halt_playback();
        self.turn.begin_turn();

        if echo {
            self.ui.add_message(UiMessage::sent(text));
        }

        let mut input = types::events::client::InputEvent::new(text);
        if let Some(locale) = self.opts.locale() {
            input = input.with_locale(locale);
        }
        if let Some(timezone) = self.opts.timezone() {
            input = input.with_timezone(timezone);
        }
        if let Some(node) = self.intro_node.take() {
            input = input.with_attribute("node", &node.to_string());
        }

        let sent = match &self.client {
            Some(client) => client.send_input(input).await,
            None => Err(BotError::client("no open session")),
        };
        if let Err(e) = sent {
            self.fatal(e).await;
            return;
        }
        self.logs.info("input sent");

        if close_audio {
            self.selector.stop_listening(true).await;
            self.awaiting_ack = false;
        }
        self.set_state(SessionState::Processing);
    }

    /// Only flips to LISTENING once the engine is actually capturing (or
    /// instantly for text-only sessions); the audio stream engine defers
    /// to the backend ack.
    async fn enter_listening(&mut self) {
        if !self.session_live {
            return;
        }
        self.flush_logs().await;
        if !self.input_audio {
            self.listening_now();
            return;
        }
        if let Err(e) = self.start_listen_cycle().await {
            self.fatal(e).await;
        }
    }

    async fn start_listen_cycle(&mut self) -> Result<()> {
        let events = self.events_tx.clone();
        let generation = self.generation;
        let sink: TranscriptSink = Box::new(move |event| {
            let _ = events.send(Event::Stt(generation, event));
        });
        match self.selector.start_listening(sink).await? {
            StartOutcome::Listening => {
                self.awaiting_ack = false;
                self.listening_now();
            }
            StartOutcome::AwaitingAck => self.awaiting_ack = true,
        }
        Ok(())
    }

    async fn restart_listening(&mut self) {
        if self.state() != SessionState::Listening || !self.input_audio || !self.session_live {
            return;
        }
        if let Err(e) = self.start_listen_cycle().await {
            self.fatal(e).await;
        }
    }

    fn listening_now(&mut self) {
        self.set_state(SessionState::Listening);
        if let Some(cue) = self.opts.sound_cues().listening() {
            self.audio.play(AudioSource::Url(cue.to_string()), PlaybackDone::detached());
        }
    }

    async fn maybe_drain(&mut self) {
        if self.state() == SessionState::Paused || self.playing.is_some() {
            return;
        }
        if !self.turn.has_pending() && !self.turn.is_complete() && !self.turn.end_latched() {
            return;
        }
        if self.state() == SessionState::Listening && self.turn.has_pending() {
            // backend pushed a turn mid-listen: microphone off while the
            // bot talks
            self.selector.stop_listening(false).await;
            self.awaiting_ack = false;
        }
        self.advance_queue().await;
    }

    async fn advance_queue(&mut self) {
        if self.state() == SessionState::Paused {
            return;
        }
        while let Some(item) = self.turn.pop_next() {
            self.set_state(SessionState::Responding);
            self.deliver_item(&item);
            if let Some(seq) = self.begin_playback(&item) {
                self.playing = Some(seq);
                return;
            }
        }
        self.after_drain().await;
    }

    async fn after_drain(&mut self) {
        if self.turn.end_latched() {
            self.finish_session().await;
        } else if self.turn.is_complete() {
            self.end_of_turn().await;
        }
        // still streaming: hold in RESPONDING until the next item or the
        // terminating response arrives
    }

    async fn end_of_turn(&mut self) {
        let sleep_hint = self.turn.take_sleep_hint();
        self.turn.reset();
        match sleep_hint {
            Some(delay) => {
                self.logs.info(format!("sleeping for {:.1}s", delay.as_secs_f64()));
                self.flush_logs().await;
                self.sleep_until = Some(Instant::now() + delay);
                self.set_state(SessionState::Sleeping);
            }
            None => self.enter_listening().await,
        }
    }

    fn deliver_item(&mut self, item: &ResponseItem) {
        if let Some(code) = item.control_code() {
            self.dispatch_control(code);
        }
        if item.has_message() {
            self.ui.add_message(UiMessage::received(item));
            if let Some(node) = item.node_id() {
                self.ui.focus_on_node(node);
            }
        }
    }

    fn dispatch_control(&mut self, raw: &str) {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(payload) => {
                let code = payload
                    .get("code")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                self.ui.handle_command(&code, &payload);
            }
            Err(e) => {
                self.logs.error(format!("bad control payload: {}", e));
            }
        }
    }

    fn begin_playback(&mut self, item: &ResponseItem) -> Option<u64> {
        if self.output_audio {
            if let Some(url) = item.audio_url() {
                let seq = self.next_play_seq();
                let (done, watch) = PlaybackDone::pair();
                self.audio.play(AudioSource::Url(url.to_string()), done);
                self.watch_playback(seq, watch);
                return Some(seq);
            }
        }
        if let Some(url) = item.video_url() {
            let seq = self.next_play_seq();
            let (done, watch) = PlaybackDone::pair();
            self.ui.add_video(url, done);
            self.watch_playback(seq, watch);
            return Some(seq);
        }
        None
    }

    fn next_play_seq(&mut self) -> u64 {
        self.play_seq = self.play_seq.wrapping_add(1);
        self.play_seq
    }

    fn watch_playback(&self, seq: u64, watch: tokio::sync::oneshot::Receiver<()>) {
        let events = self.events_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            // finished and aborted both come back here; the driver filters
            // stale sequence numbers
            let _ = watch.await;
            let _ = events.send(Event::Played(generation, seq));
        });
    }

    fn halt_playback(&mut self) {
        self.audio.stop();
        self.playing = None;
    }

    /// Delivers everything still queued without playback, then lets the
    /// turn end normally.
    async fn fast_forward(&mut self) {
        self.halt_playback();
        while let Some(item) = self.turn.pop_next() {
            self.deliver_item(&item);
        }
        self.after_drain().await;
    }

    fn pause(&mut self) {
        let state = self.state();
        match state {
            SessionState::Paused | SessionState::Sleeping => return,
            SessionState::Listening => self.selector.suspend_listening(),
            SessionState::Responding | SessionState::Processing => {
                if self.playing.is_some() {
                    self.audio.pause();
                }
                // a listen cycle still waiting on the stream ack has the
                // microphone capturing already
                if self.awaiting_ack {
                    self.selector.suspend_listening();
                }
            }
        }
        self.paused_from = Some(state);
        self.set_state(SessionState::Paused);
    }

    async fn resume(&mut self) {
        if self.state() != SessionState::Paused {
            return;
        }
        let from = self.paused_from.take().unwrap_or(SessionState::Listening);
        if self.playing.is_some() {
            self.audio.resume();
            self.set_state(SessionState::Responding);
            return;
        }
        if self.turn.has_pending() || self.turn.is_complete() || self.turn.end_latched() {
            self.set_state(SessionState::Responding);
            self.advance_queue().await;
            return;
        }
        if self.turn.is_streaming() || from == SessionState::Processing {
            // mid-turn: the backend still owes items for this turn
            self.set_state(from);
            return;
        }
        self.enter_listening().await;
    }

    async fn set_input_audio(&mut self, enabled: bool) {
        if self.input_audio == enabled {
            return;
        }
        self.input_audio = enabled;
        self.logs.info(format!("input audio {}", if enabled { "on" } else { "off" }));
        if !enabled {
            // close the stream on the wire so recognition finalizes on
            // what the backend already has
            self.selector.stop_listening(true).await;
            self.awaiting_ack = false;
        } else if self.state() == SessionState::Listening {
            if let Err(e) = self.start_listen_cycle().await {
                self.fatal(e).await;
            }
        }
    }

    async fn set_output_audio(&mut self, enabled: bool) {
        if self.output_audio == enabled {
            return;
        }
        self.output_audio = enabled;
        self.logs.info(format!("output audio {}", if enabled { "on" } else { "off" }));
        if !enabled {
            if self.state() == SessionState::Responding && self.playing.is_some() {
                self.fast_forward().await;
            } else {
                self.halt_playback();
            }
        }
    }

    async fn vote(&mut self, turn_id: i64, node_id: i64, vote: i32) {
        let sent = match &self.client {
            Some(client) => client.send_vote(turn_id, node_id, vote).await,
            None => {
                tracing::warn!("vote with no open session");
                return;
            }
        };
        if let Err(e) = sent {
            self.fatal(e).await;
        }
    }

    async fn shutdown(&mut self) {
        if self.session_live {
            self.logs.info("session stopped");
            self.flush_logs().await;
            self.teardown().await;
            self.ui.on_end();
        } else {
            self.halt_playback();
        }
        self.sleep_until = None;
        self.set_state(SessionState::Sleeping);
    }

    /// Graceful end: the backend said the session is over and the queue
    /// has fully drained.
    async fn finish_session(&mut self) {
        self.logs.info("session complete");
        self.flush_logs().await;
        self.teardown().await;
        self.ui.on_end();
        self.set_state(SessionState::Sleeping);
    }

    /// Every fatal error funnels through here: surface it, play the error
    /// cue, flush what the logs still hold, then drop the session.
    async fn fatal(&mut self, error: BotError) {
        tracing::error!("fatal: {}", error);
        self.logs.error(error.to_string());
        self.ui.on_error(&error);
        self.halt_playback();
        if let Some(cue) = self.opts.sound_cues().error() {
            self.audio.play(AudioSource::Url(cue.to_string()), PlaybackDone::detached());
        }
        self.flush_logs().await;
        self.release_session().await;
        self.ui.on_end();
        self.set_state(SessionState::Sleeping);
    }

    async fn teardown(&mut self) {
        self.halt_playback();
        self.release_session().await;
    }

    async fn release_session(&mut self) {
        self.selector.close().await;
        self.generation = self.generation.wrapping_add(1);
        self.client = None;
        self.session_live = false;
        self.awaiting_ack = false;
        self.paused_from = None;
        self.turn.reset();
        self.sleep_until = None;
        self.push_status();
    }

    async fn flush_logs(&mut self) {
        if self.logs.is_empty() {
            return;
        }
        let entries = self.logs.drain();
        match &self.client {
            Some(client) => {
                if let Err(e) = client.flush_logs(entries).await {
                    tracing::warn!("log flush failed: {}", e);
                }
            }
            None => {
                tracing::debug!("dropping {} log entries, no connection", entries.len());
            }
        }
    }

    fn sleep_deadline_active(&self) -> bool {
        self.sleep_until.map(|until| Instant::now() < until).unwrap_or(false)
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: SessionState) {
        let previous = *self.state_tx.borrow();
        if previous == state {
            return;
        }
        self.logs.info(format!("state {:?} -> {:?}", previous, state));
        self.state_tx.send_replace(state);
        self.push_status();
    }

    fn push_status(&self) {
        self.ui.set_status(StatusUpdate {
            state: *self.state_tx.borrow(),
            is_active: self.session_live,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::{FrameSink, StreamInfo};
    use crate::client::Outbound;
    use crate::error::ErrorKind;
    use crate::speech::RecognizerConfig;
    use crate::ui::MessageDirection;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum UiCall {
        Message(MessageDirection, String),
        Video(String),
        Error(ErrorKind),
        End,
        Logs(Vec<String>),
        Focus(i64),
        Command(String),
        Transcript(String, bool),
        AudioEnded,
    }

    #[derive(Default)]
    struct RecordingUi {
        calls: Mutex<Vec<UiCall>>,
        videos: Mutex<Vec<PlaybackDone>>,
    }

    impl RecordingUi {
        fn calls(&self) -> Vec<UiCall> {
            self.calls.lock().unwrap().clone()
        }

        fn messages(&self) -> Vec<(MessageDirection, String)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    UiCall::Message(direction, text) => Some((direction, text)),
                    _ => None,
                })
                .collect()
        }

        fn ends(&self) -> usize {
            self.calls().iter().filter(|c| matches!(c, UiCall::End)).count()
        }

        fn errors(&self) -> Vec<ErrorKind> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    UiCall::Error(kind) => Some(kind),
                    _ => None,
                })
                .collect()
        }

        fn transcripts(&self) -> Vec<(String, bool)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    UiCall::Transcript(text, is_final) => Some((text, is_final)),
                    _ => None,
                })
                .collect()
        }

        fn audio_ended_count(&self) -> usize {
            self.calls().iter().filter(|c| matches!(c, UiCall::AudioEnded)).count()
        }
    }

    impl UiDelegate for RecordingUi {
        fn add_message(&self, message: UiMessage) {
            self.calls
                .lock()
                .unwrap()
                .push(UiCall::Message(message.direction, message.text));
        }

        fn add_video(&self, url: &str, done: PlaybackDone) {
            self.calls.lock().unwrap().push(UiCall::Video(url.to_string()));
            self.videos.lock().unwrap().push(done);
        }

        fn on_error(&self, error: &BotError) {
            self.calls.lock().unwrap().push(UiCall::Error(error.kind()));
        }

        fn on_end(&self) {
            self.calls.lock().unwrap().push(UiCall::End);
        }

        fn add_logs(&self, lines: &[String]) {
            self.calls.lock().unwrap().push(UiCall::Logs(lines.to_vec()));
        }

        fn focus_on_node(&self, node_id: i64) {
            self.calls.lock().unwrap().push(UiCall::Focus(node_id));
        }

        fn handle_command(&self, code: &str, _payload: &serde_json::Value) {
            self.calls.lock().unwrap().push(UiCall::Command(code.to_string()));
        }

        fn on_transcript(&self, text: &str, is_final: bool) {
            self.calls
                .lock()
                .unwrap()
                .push(UiCall::Transcript(text.to_string(), is_final));
        }

        fn on_audio_input_ended(&self) {
            self.calls.lock().unwrap().push(UiCall::AudioEnded);
        }
    }

    #[derive(Default)]
    struct TestAudio {
        plays: Mutex<Vec<String>>,
        pending: Mutex<VecDeque<PlaybackDone>>,
        paused: Mutex<usize>,
        resumed: Mutex<usize>,
        stopped: Mutex<usize>,
    }

    impl TestAudio {
        fn play_log(&self) -> Vec<String> {
            self.plays.lock().unwrap().clone()
        }

        fn finish_next(&self) -> bool {
            match self.pending.lock().unwrap().pop_front() {
                Some(done) => {
                    done.finish();
                    true
                }
                None => false,
            }
        }

        fn paused_count(&self) -> usize {
            *self.paused.lock().unwrap()
        }

        fn resumed_count(&self) -> usize {
            *self.resumed.lock().unwrap()
        }

        fn stopped_count(&self) -> usize {
            *self.stopped.lock().unwrap()
        }
    }

    impl AudioOutput for TestAudio {
        fn play(&self, source: AudioSource, done: PlaybackDone) {
            let label = match source {
                AudioSource::Url(url) => url,
                AudioSource::Frame(bytes) => format!("frame:{}", bytes.len()),
            };
            self.plays.lock().unwrap().push(label);
            self.pending.lock().unwrap().push_back(done);
        }

        fn pause(&self) {
            *self.paused.lock().unwrap() += 1;
        }

        fn resume(&self) {
            *self.resumed.lock().unwrap() += 1;
        }

        fn stop(&self) {
            *self.stopped.lock().unwrap() += 1;
            // dropping the handles counts as aborting the playbacks
            self.pending.lock().unwrap().clear();
        }
    }

    #[derive(Default)]
    struct RecState {
        sink: Option<TranscriptSink>,
        configs: Vec<RecognizerConfig>,
        stops: usize,
    }

    #[derive(Default)]
    struct FakeRecognizer {
        state: Mutex<RecState>,
    }

    impl FakeRecognizer {
        fn fire(&self, event: TranscriptEvent) {
            let state = self.state.lock().unwrap();
            if let Some(sink) = state.sink.as_ref() {
                sink(event);
            }
        }

        fn starts(&self) -> usize {
            self.state.lock().unwrap().configs.len()
        }

        fn language_of_start(&self, index: usize) -> Option<String> {
            self.state.lock().unwrap().configs[index].language.clone()
        }
    }

    impl Recognizer for FakeRecognizer {
        fn start(&self, config: RecognizerConfig, sink: TranscriptSink) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.configs.push(config);
            state.sink = Some(sink);
            Ok(())
        }

        fn stop(&self) {
            self.state.lock().unwrap().stops += 1;
        }
    }

    #[derive(Default)]
    struct MicState {
        sink: Option<FrameSink>,
        opens: usize,
        closes: usize,
        suspends: usize,
    }

    struct FakeMic {
        state: Arc<Mutex<MicState>>,
    }

    impl AudioInput for FakeMic {
        fn open(&mut self, sink: FrameSink) -> Result<StreamInfo> {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.sink = Some(sink);
            Ok(StreamInfo { sample_rate: 16_000 })
        }

        fn suspend(&mut self) -> Result<()> {
            self.state.lock().unwrap().suspends += 1;
            Ok(())
        }

        fn resume(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {
            let mut state = self.state.lock().unwrap();
            state.closes += 1;
            state.sink = None;
        }
    }

    struct Harness {
        controller: SessionController,
        ui: Arc<RecordingUi>,
        audio: Arc<TestAudio>,
        outbound: tokio::sync::mpsc::Receiver<Outbound>,
        server: tokio::sync::broadcast::Sender<types::ServerEvent>,
    }

    fn harness() -> Harness {
        harness_with(|builder| builder)
    }

    fn harness_with(
        customize: impl FnOnce(SessionControllerBuilder) -> SessionControllerBuilder,
    ) -> Harness {
        let (client, outbound, server) = client::fake(64);
        let ui = Arc::new(RecordingUi::default());
        let audio = Arc::new(TestAudio::default());
        let config = client::config::Config::builder().with_bot_key("test-bot").build();

        let mut slot = Some(client);
        let connector: Connector = Box::new(move |_init| {
            let client = slot.take();
            Box::pin(async move { client.ok_or_else(|| BotError::client("no more fake connections")) })
        });

        let controller = SessionController::builder(config, ui.clone())
            .with_audio_output(audio.clone())
            .with_connector(connector);
        let controller = customize(controller).build();

        Harness {
            controller,
            ui,
            audio,
            outbound,
            server,
        }
    }

    fn server_event(json: &str) -> types::ServerEvent {
        serde_json::from_str(json).expect("valid server event")
    }

    fn sent_events(outbound: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(item) = outbound.try_recv() {
            if let Outbound::Event(event) = item {
                out.push(serde_json::to_string(&event).expect("serializable"));
            }
        }
        out
    }

    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    fn text_only() -> InitOptions {
        InitOptions::new().with_input_audio(false)
    }

    #[tokio::test]
    async fn test_intro_turn_round_trip() {
        let mut h = harness();
        h.controller
            .init(text_only().with_intro("#hello").with_intro_node(7))
            .await
            .expect("init");
        settle().await;

        h.server
            .send(server_event(r#"{"type":"Ready","sessionId":"sess-1"}"#))
            .unwrap();
        settle().await;

        let sent = sent_events(&mut h.outbound);
        assert_eq!(
            sent,
            vec![r##"{"type":"Input","text":"#hello","attributes":{"node":"7"}}"##.to_string()]
        );
        assert_eq!(h.controller.state(), SessionState::Processing);
        // the intro is hidden machinery, nothing lands in the transcript
        assert!(h.ui.messages().is_empty());

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[{"audioUrl":"https://cdn.example/tts/1.mp3","text":"Hello!"}]}"#,
            ))
            .unwrap();
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Responding);
        assert_eq!(h.audio.play_log(), vec!["https://cdn.example/tts/1.mp3".to_string()]);
        assert_eq!(
            h.ui.messages(),
            vec![(MessageDirection::Received, "Hello!".to_string())]
        );

        h.audio.finish_next();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn test_items_play_one_at_a_time_in_order() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"audioUrl":"https://cdn.example/1.mp3","text":"one"},
                    {"audioUrl":"https://cdn.example/2.mp3","text":"two"},
                    {"audioUrl":"https://cdn.example/3.mp3","text":"three"}
                ]}"#,
            ))
            .unwrap();
        settle().await;

        // strictly one playback at a time, text delivered with its item
        assert_eq!(h.audio.play_log(), vec!["https://cdn.example/1.mp3".to_string()]);
        assert_eq!(h.ui.messages().len(), 1);

        h.audio.finish_next();
        settle().await;
        assert_eq!(h.audio.play_log().len(), 2);
        assert_eq!(h.ui.messages()[1].1, "two");

        h.audio.finish_next();
        settle().await;
        assert_eq!(h.audio.play_log().len(), 3);

        h.audio.finish_next();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Listening);
        let _ = sent_events(&mut h.outbound);
    }

    #[tokio::test]
    async fn test_streamed_items_not_replayed_from_response() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"ResponseItem","audioUrl":"https://cdn.example/1.mp3","text":"one"}"#,
            ))
            .unwrap();
        h.server
            .send(server_event(
                r#"{"type":"ResponseItem","audioUrl":"https://cdn.example/2.mp3","text":"two"}"#,
            ))
            .unwrap();
        settle().await;
        assert_eq!(h.audio.play_log().len(), 1);

        // terminating response repeats both items; they must not replay
        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"audioUrl":"https://cdn.example/1.mp3","text":"one"},
                    {"audioUrl":"https://cdn.example/2.mp3","text":"two"}
                ]}"#,
            ))
            .unwrap();
        settle().await;

        h.audio.finish_next();
        settle().await;
        h.audio.finish_next();
        settle().await;

        assert_eq!(h.audio.play_log().len(), 2);
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_deadline_gates_text_input() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[{"text":"Good night"}],"sleepTimeout":2.5}"#,
            ))
            .unwrap();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Sleeping);
        let _ = sent_events(&mut h.outbound);

        h.controller.handle_text_input("wake up", true, false).expect("send");
        settle().await;
        assert!(sent_events(&mut h.outbound).is_empty());
        assert_eq!(h.controller.state(), SessionState::Sleeping);

        tokio::time::advance(std::time::Duration::from_secs(3)).await;

        h.controller.handle_text_input("wake up", true, false).expect("send");
        settle().await;
        let sent = sent_events(&mut h.outbound);
        assert_eq!(sent, vec![r#"{"type":"Input","text":"wake up"}"#.to_string()]);
        assert_eq!(h.controller.state(), SessionState::Processing);
    }

    #[tokio::test]
    async fn test_server_error_is_fatal() {
        let mut h = harness();
        h.controller
            .init(text_only().with_sound_cues(SoundCues::new().with_error("https://cdn.example/error.mp3")))
            .await
            .expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(r#"{"type":"Error","message":"script crashed","code":"E42"}"#))
            .unwrap();
        settle().await;

        assert_eq!(h.ui.errors(), vec![ErrorKind::Server]);
        assert_eq!(h.ui.ends(), 1);
        assert_eq!(h.controller.state(), SessionState::Sleeping);
        assert!(h.audio.play_log().contains(&"https://cdn.example/error.mp3".to_string()));

        // buffered diagnostics were flushed before the socket dropped
        let sent = sent_events(&mut h.outbound);
        let log_flush = sent
            .iter()
            .filter_map(|json| serde_json::from_str::<serde_json::Value>(json).ok())
            .find(|value| value["type"] == "Log");
        let flush = log_flush.expect("log flush event");
        assert!(!flush["entries"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_after_graceful_end_is_ignored() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Bye"}],"sessionEnded":true}"#))
            .unwrap();
        settle().await;
        assert_eq!(h.ui.ends(), 1);
        assert_eq!(h.controller.state(), SessionState::Sleeping);

        h.server
            .send(server_event(r#"{"type":"Error","message":"late error"}"#))
            .unwrap();
        settle().await;

        assert!(h.ui.errors().is_empty());
        assert_eq!(h.ui.ends(), 1);
    }

    #[tokio::test]
    async fn test_socket_close_is_transport_fatal() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(types::ServerEvent::Close { reason: Some("gone".to_string()) })
            .unwrap();
        settle().await;

        assert_eq!(h.ui.errors(), vec![ErrorKind::Transport]);
        assert_eq!(h.ui.ends(), 1);
        assert_eq!(h.controller.state(), SessionState::Sleeping);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.controller.stop().expect("stop");
        settle().await;
        h.controller.stop().expect("stop again");
        settle().await;

        assert_eq!(h.ui.ends(), 1);
        assert_eq!(h.controller.state(), SessionState::Sleeping);

        // the connection is gone: the fake client's channel closed
        let _ = sent_events(&mut h.outbound);
        assert!(matches!(
            h.outbound.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_output_audio_disabled_turns_are_instant() {
        let mut h = harness();
        h.controller
            .init(text_only().with_output_audio(false))
            .await
            .expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"audioUrl":"https://cdn.example/1.mp3","text":"one"},
                    {"audioUrl":"https://cdn.example/2.mp3","text":"two"}
                ]}"#,
            ))
            .unwrap();
        settle().await;

        assert!(h.audio.play_log().is_empty());
        assert_eq!(h.ui.messages().len(), 2);
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn test_disabling_output_audio_fast_forwards_turn() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"audioUrl":"https://cdn.example/1.mp3","text":"one"},
                    {"audioUrl":"https://cdn.example/2.mp3","text":"two"},
                    {"audioUrl":"https://cdn.example/3.mp3","text":"three"}
                ]}"#,
            ))
            .unwrap();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Responding);
        assert_eq!(h.audio.play_log().len(), 1);

        h.controller.set_output_audio(false).expect("command");
        settle().await;

        assert!(h.audio.stopped_count() >= 1);
        assert_eq!(h.ui.messages().len(), 3);
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn test_skip_played_messages_fast_forwards() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"audioUrl":"https://cdn.example/1.mp3","text":"one"},
                    {"audioUrl":"https://cdn.example/2.mp3","text":"two"}
                ]}"#,
            ))
            .unwrap();
        settle().await;

        h.controller.skip_played_messages().expect("command");
        settle().await;

        assert_eq!(h.ui.messages().len(), 2);
        assert_eq!(h.audio.play_log().len(), 1);
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn test_text_input_barge_in_clears_queue() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"audioUrl":"https://cdn.example/1.mp3","text":"one"},
                    {"audioUrl":"https://cdn.example/2.mp3","text":"two"},
                    {"audioUrl":"https://cdn.example/3.mp3","text":"three"}
                ]}"#,
            ))
            .unwrap();
        settle().await;
        let _ = sent_events(&mut h.outbound);

        h.controller.handle_text_input("never mind", true, false).expect("send");
        settle().await;

        assert!(h.audio.stopped_count() >= 1);
        assert_eq!(h.controller.state(), SessionState::Processing);
        let sent = sent_events(&mut h.outbound);
        assert_eq!(sent, vec![r#"{"type":"Input","text":"never mind"}"#.to_string()]);

        // queued items two and three never surface
        let messages = h.ui.messages();
        assert_eq!(
            messages,
            vec![
                (MessageDirection::Received, "one".to_string()),
                (MessageDirection::Sent, "never mind".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_pause_and_resume_playback() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"audioUrl":"https://cdn.example/1.mp3","text":"one"},
                    {"audioUrl":"https://cdn.example/2.mp3","text":"two"}
                ]}"#,
            ))
            .unwrap();
        settle().await;

        h.controller.pause().expect("pause");
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Paused);
        assert_eq!(h.audio.paused_count(), 1);

        // items arriving while paused queue up without starting playback
        h.server
            .send(server_event(
                r#"{"type":"ResponseItem","audioUrl":"https://cdn.example/3.mp3","text":"three"}"#,
            ))
            .unwrap();
        settle().await;
        assert_eq!(h.audio.play_log().len(), 1);

        h.controller.resume().expect("resume");
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Responding);
        assert_eq!(h.audio.resumed_count(), 1);

        h.audio.finish_next();
        settle().await;
        assert_eq!(h.audio.play_log().len(), 2);
    }

    #[tokio::test]
    async fn test_session_ended_waits_for_queue_drain() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[{"audioUrl":"https://cdn.example/bye.mp3","text":"Bye"}],"sessionEnded":true}"#,
            ))
            .unwrap();
        settle().await;

        // farewell still playing: not over yet
        assert_eq!(h.ui.ends(), 0);
        assert_eq!(h.controller.state(), SessionState::Responding);

        h.audio.finish_next();
        settle().await;

        assert_eq!(h.ui.ends(), 1);
        assert_eq!(h.controller.state(), SessionState::Sleeping);

        // diagnostics went out before the socket dropped
        let sent = sent_events(&mut h.outbound);
        let has_log_flush = sent
            .iter()
            .filter_map(|json| serde_json::from_str::<serde_json::Value>(json).ok())
            .any(|value| value["type"] == "Log");
        assert!(has_log_flush);
    }

    #[tokio::test]
    async fn test_vote_round_trip() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;
        let _ = sent_events(&mut h.outbound);

        h.controller.send_vote(3, 9, 1).expect("vote");
        settle().await;

        let sent = sent_events(&mut h.outbound);
        assert_eq!(sent, vec![r#"{"type":"Vote","turnId":3,"nodeId":9,"vote":1}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_auto_start_disabled_waits_for_user() {
        let mut h = harness();
        h.controller
            .init(text_only().with_intro("#hello").with_auto_start(false))
            .await
            .expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        assert!(sent_events(&mut h.outbound).is_empty());
        assert_eq!(h.controller.state(), SessionState::Sleeping);

        h.controller.handle_text_input("hello there", true, false).expect("send");
        settle().await;
        let sent = sent_events(&mut h.outbound);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(r#""text":"hello there""#));
        assert_eq!(h.controller.state(), SessionState::Processing);
    }

    #[tokio::test]
    async fn test_control_items_dispatch_commands() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"controlCode":"{\"code\":\"open-map\",\"zoom\":4}","nodeId":11,"text":"Here is the map"}
                ]}"#,
            ))
            .unwrap();
        settle().await;

        let calls = h.ui.calls();
        assert!(calls.iter().any(|c| matches!(c, UiCall::Command(code) if code == "open-map")));
        assert!(calls.iter().any(|c| matches!(c, UiCall::Focus(11))));
    }

    #[tokio::test]
    async fn test_response_logs_forwarded_to_host() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[{"text":"ok"}],"logs":["matched rule 4","latency 120ms"]}"#,
            ))
            .unwrap();
        settle().await;

        let calls = h.ui.calls();
        assert!(calls
            .iter()
            .any(|c| matches!(c, UiCall::Logs(lines) if lines.len() == 2 && lines[0] == "matched rule 4")));
    }

    #[tokio::test]
    async fn test_native_final_result_becomes_input() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let rec = recognizer.clone();
        let mut h = harness_with(move |builder| builder.with_recognizer(rec));

        h.controller.init(InitOptions::new()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        // opening turn from the backend, then the mic opens
        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hi!"}]}"#))
            .unwrap();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert_eq!(recognizer.starts(), 1);
        let _ = sent_events(&mut h.outbound);

        recognizer.fire(TranscriptEvent::Result {
            text: "turn on the".to_string(),
            is_final: false,
        });
        settle().await;
        assert_eq!(h.ui.transcripts(), vec![("turn on the".to_string(), false)]);

        recognizer.fire(TranscriptEvent::Result {
            text: "turn on the lights".to_string(),
            is_final: true,
        });
        settle().await;

        let sent = sent_events(&mut h.outbound);
        assert_eq!(sent, vec![r#"{"type":"Input","text":"turn on the lights"}"#.to_string()]);
        assert_eq!(h.controller.state(), SessionState::Processing);
        assert!(h
            .ui
            .messages()
            .contains(&(MessageDirection::Sent, "turn on the lights".to_string())));
    }

    #[tokio::test]
    async fn test_native_audio_ended_without_result_relistens() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let rec = recognizer.clone();
        let mut h = harness_with(move |builder| builder.with_recognizer(rec));

        h.controller.init(InitOptions::new()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hi!"}]}"#))
            .unwrap();
        settle().await;
        assert_eq!(recognizer.starts(), 1);
        let _ = sent_events(&mut h.outbound);

        recognizer.fire(TranscriptEvent::AudioEnded);
        settle().await;

        assert_eq!(h.ui.audio_ended_count(), 1);
        assert_eq!(recognizer.starts(), 2);
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert!(sent_events(&mut h.outbound).is_empty());
    }

    #[tokio::test]
    async fn test_select_language_reaches_native_engine() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let rec = recognizer.clone();
        let h = harness_with(move |builder| builder.with_recognizer(rec));

        h.controller.select_language("sv-SE").expect("command");
        h.controller.init(InitOptions::new()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hej!"}]}"#))
            .unwrap();
        settle().await;

        assert_eq!(recognizer.starts(), 1);
        assert_eq!(recognizer.language_of_start(0), Some("sv-SE".to_string()));
    }

    #[tokio::test]
    async fn test_stream_engine_listens_on_backend_ack() {
        let mic_state = Arc::new(Mutex::new(MicState::default()));
        let mic = FakeMic { state: mic_state.clone() };
        let mut h = harness_with(move |builder| builder.with_audio_input(Box::new(mic)));

        h.controller.init(InitOptions::new()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hi!"}]}"#))
            .unwrap();
        settle().await;

        // stream announced, mic open, but not LISTENING until the ack
        assert_eq!(mic_state.lock().unwrap().opens, 1);
        let sent = sent_events(&mut h.outbound);
        assert!(sent.contains(&r#"{"type":"InputAudioStreamOpen","sampleRate":16000}"#.to_string()));
        assert_ne!(h.controller.state(), SessionState::Listening);

        h.server
            .send(server_event(r#"{"type":"InputAudioStreamOpen"}"#))
            .unwrap();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn test_disabling_input_audio_closes_stream_not_session() {
        let mic_state = Arc::new(Mutex::new(MicState::default()));
        let mic = FakeMic { state: mic_state.clone() };
        let mut h = harness_with(move |builder| builder.with_audio_input(Box::new(mic)));

        h.controller.init(InitOptions::new()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hi!"}]}"#))
            .unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"InputAudioStreamOpen"}"#))
            .unwrap();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Listening);
        let _ = sent_events(&mut h.outbound);

        h.controller.set_input_audio(false).expect("command");
        settle().await;

        assert_eq!(mic_state.lock().unwrap().closes, 1);
        let sent = sent_events(&mut h.outbound);
        assert_eq!(sent, vec![r#"{"type":"InputAudioStreamClose"}"#.to_string()]);
        // the session itself stays up, text input still works
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert_eq!(h.ui.ends(), 0);
    }

    #[tokio::test]
    async fn test_server_recognized_final_stops_capture() {
        let mic_state = Arc::new(Mutex::new(MicState::default()));
        let mic = FakeMic { state: mic_state.clone() };
        let mut h = harness_with(move |builder| builder.with_audio_input(Box::new(mic)));

        h.controller.init(InitOptions::new()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hi!"}]}"#))
            .unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"InputAudioStreamOpen"}"#))
            .unwrap();
        settle().await;
        let _ = sent_events(&mut h.outbound);

        h.server
            .send(server_event(r#"{"type":"Recognized","text":"what is","isFinal":false}"#))
            .unwrap();
        h.server
            .send(server_event(r#"{"type":"Recognized","text":"what is the time","isFinal":true}"#))
            .unwrap();
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Processing);
        assert_eq!(mic_state.lock().unwrap().closes, 1);
        assert!(h
            .ui
            .messages()
            .contains(&(MessageDirection::Sent, "what is the time".to_string())));
        // backend already has the utterance: no Input, no stream close
        assert!(sent_events(&mut h.outbound).is_empty());
        assert_eq!(
            h.ui.transcripts(),
            vec![
                ("what is".to_string(), false),
                ("what is the time".to_string(), true)
            ]
        );
    }

    #[tokio::test]
    async fn test_video_items_block_until_host_finishes() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[
                    {"videoUrl":"https://cdn.example/clip.mp4","text":"Watch this"},
                    {"text":"After the clip"}
                ]}"#,
            ))
            .unwrap();
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Responding);
        let calls = h.ui.calls();
        assert!(calls
            .iter()
            .any(|c| matches!(c, UiCall::Video(url) if url == "https://cdn.example/clip.mp4")));
        // the follow-up item waits for the video
        assert_eq!(h.ui.messages().len(), 1);

        let done = h.ui.videos.lock().unwrap().pop();
        done.expect("video handle").finish();
        settle().await;

        assert_eq!(h.ui.messages().len(), 2);
        assert_eq!(h.controller.state(), SessionState::Listening);
        let _ = sent_events(&mut h.outbound);
    }

    #[tokio::test]
    async fn test_reinit_replaces_session_without_on_end() {
        let (client_a, mut out_a, server_a) = client::fake(64);
        let (client_b, mut out_b, server_b) = client::fake(64);
        let ui = Arc::new(RecordingUi::default());
        let audio = Arc::new(TestAudio::default());
        let config = client::config::Config::builder().with_bot_key("test-bot").build();

        let mut pool = VecDeque::from([client_a, client_b]);
        let connector: Connector = Box::new(move |_init| {
            let client = pool.pop_front();
            Box::pin(async move { client.ok_or_else(|| BotError::client("no more fake connections")) })
        });

        let controller = SessionController::builder(config, ui.clone())
            .with_audio_output(audio.clone())
            .with_connector(connector)
            .build();

        controller.init(text_only()).await.expect("first init");
        settle().await;
        server_a.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        controller
            .init(text_only().with_intro("#again"))
            .await
            .expect("second init");
        settle().await;

        // a restart is not an end, and the old socket is gone
        assert_eq!(ui.ends(), 0);
        let _ = sent_events(&mut out_a);
        assert!(matches!(
            out_a.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));

        server_b.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;
        let sent = sent_events(&mut out_b);
        assert_eq!(sent, vec![r##"{"type":"Input","text":"#again"}"##.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_within_sleep_window_continues_session() {
        let mut h = harness();
        h.controller.init(text_only()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(
                r#"{"type":"Response","items":[{"text":"Back soon"}],"sleepTimeout":30.0}"#,
            ))
            .unwrap();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Sleeping);
        let _ = sent_events(&mut h.outbound);

        // a second init inside the window must reuse the connection; the
        // harness only has one fake connection to give out
        h.controller.init(text_only()).await.expect("re-init");
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Listening);
        assert_eq!(h.ui.ends(), 0);

        h.controller.handle_text_input("back", true, false).expect("send");
        settle().await;
        let sent = sent_events(&mut h.outbound);
        assert!(sent.iter().any(|json| json.contains(r#""text":"back""#)));
    }

    #[tokio::test]
    async fn test_pause_while_listening_suspends_capture() {
        let mic_state = Arc::new(Mutex::new(MicState::default()));
        let mic = FakeMic { state: mic_state.clone() };
        let mut h = harness_with(move |builder| builder.with_audio_input(Box::new(mic)));

        h.controller.init(InitOptions::new()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hi!"}]}"#))
            .unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"InputAudioStreamOpen"}"#))
            .unwrap();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Listening);
        let _ = sent_events(&mut h.outbound);

        h.controller.pause().expect("pause");
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Paused);
        assert_eq!(mic_state.lock().unwrap().suspends, 1);

        h.controller.resume().expect("resume");
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Listening);
        // resuming a suspended stream reuses the device and the stream on
        // the wire: no second open, no second announce
        assert_eq!(mic_state.lock().unwrap().opens, 1);
        let sent = sent_events(&mut h.outbound);
        assert!(!sent.iter().any(|json| json.contains("InputAudioStreamOpen")));
    }

    #[tokio::test]
    async fn test_stream_ack_while_paused_defers_listening() {
        let mic_state = Arc::new(Mutex::new(MicState::default()));
        let mic = FakeMic { state: mic_state.clone() };
        let mut h = harness_with(move |builder| builder.with_audio_input(Box::new(mic)));

        h.controller.init(InitOptions::new()).await.expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;
        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hi!"}]}"#))
            .unwrap();
        settle().await;
        // stream announced, ack still in flight
        assert_eq!(mic_state.lock().unwrap().opens, 1);
        assert_ne!(h.controller.state(), SessionState::Listening);

        h.controller.pause().expect("pause");
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Paused);
        assert_eq!(mic_state.lock().unwrap().suspends, 1);

        h.server
            .send(server_event(r#"{"type":"InputAudioStreamOpen"}"#))
            .unwrap();
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Paused);

        h.controller.resume().expect("resume");
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert_eq!(mic_state.lock().unwrap().opens, 1);
        let _ = sent_events(&mut h.outbound);
    }

    #[tokio::test]
    async fn test_listening_cue_plays_on_listen() {
        let mut h = harness();
        h.controller
            .init(text_only().with_sound_cues(SoundCues::new().with_listening("https://cdn.example/ding.mp3")))
            .await
            .expect("init");
        settle().await;
        h.server.send(server_event(r#"{"type":"Ready"}"#)).unwrap();
        settle().await;

        h.server
            .send(server_event(r#"{"type":"Response","items":[{"text":"Hi"}]}"#))
            .unwrap();
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Listening);
        assert_eq!(h.audio.play_log(), vec!["https://cdn.example/ding.mp3".to_string()]);
        let _ = sent_events(&mut h.outbound);
    }
}
