use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{BotError, Result};
use crate::types;
use crate::types::LogEntry;

pub mod config;
mod consts;
mod utils;

/// Traffic flowing towards the backend: structured events on the text
/// channel, raw PCM16 frames on the binary channel.
#[derive(Debug)]
pub enum Outbound {
    Event(types::ClientEvent),
    Audio(Vec<u8>),
}

pub type ClientTx = tokio::sync::mpsc::Sender<Outbound>;
type ServerTx = tokio::sync::broadcast::Sender<types::ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<types::ServerEvent>;

pub struct Client {
    capacity: usize,
    config: config::Config,
    c_tx: Option<ClientTx>,
    s_tx: Option<ServerTx>,
    s_rx: Option<ServerRx>,
    session_id: Arc<Mutex<Option<String>>>,
}

impl Client {
    fn new(capacity: usize, config: config::Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_tx: None,
            s_rx: None,
            session_id: Arc::new(Mutex::new(None)),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.c_tx.is_some() {
            return Err(BotError::client("already connected"));
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;

        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel(self.capacity);
        let (s_tx, s_rx) = tokio::sync::broadcast::channel(self.capacity);

        self.c_tx = Some(c_tx.clone());
        self.s_tx = Some(s_tx.clone());
        // Held back so the first subscriber sees events from before it
        // called server_events().
        self.s_rx = Some(s_rx);

        tokio::spawn(async move {
            let mut ping = tokio::time::interval(consts::PING_PERIOD);
            loop {
                tokio::select! {
                    outbound = c_rx.recv() => {
                        match outbound {
                            Some(Outbound::Event(event)) => match serde_json::to_string(&event) {
                                Ok(text) => {
                                    if let Err(e) = write.send(Message::Text(text)).await {
                                        tracing::error!("failed to send message: {}", e);
                                    }
                                }
                                Err(e) => {
                                    tracing::error!("failed to serialize event: {}", e);
                                }
                            },
                            Some(Outbound::Audio(frame)) => {
                                if let Err(e) = write.send(Message::Binary(frame)).await {
                                    tracing::error!("failed to send audio frame: {}", e);
                                }
                            }
                            None => {
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    _ = ping.tick() => {
                        if let Err(e) = write.send(Message::Ping(vec![])).await {
                            tracing::error!("failed to send ping: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            let mut close_reason: Option<String> = None;
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        close_reason = Some(e.to_string());
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<types::ServerEvent>(&text) {
                            Ok(event) => {
                                match &event {
                                    types::ServerEvent::Ready(ready) => {
                                        if let Some(id) = ready.session_id() {
                                            if let Ok(mut guard) = session_id.lock() {
                                                *guard = Some(id.to_string());
                                            }
                                        }
                                    }
                                    types::ServerEvent::SessionStarted(started) => {
                                        if let Ok(mut guard) = session_id.lock() {
                                            *guard = Some(started.session_id().to_string());
                                        }
                                    }
                                    types::ServerEvent::SessionEnded(_) => {
                                        if let Ok(mut guard) = session_id.lock() {
                                            *guard = None;
                                        }
                                    }
                                    _ => {}
                                }

                                if let Err(e) = s_tx.send(event) {
                                    tracing::debug!("no subscribers for server event: {}", e);
                                }
                            }
                            Err(e) => {
                                let json = serde_json::from_str::<serde_json::Value>(&text);
                                json.map(|json| {
                                    tracing::error!("failed to deserialize event: {}, json=> {:?}", e, json);
                                }).unwrap_or_else(|_| {
                                    tracing::error!("failed to deserialize event: {}, text=> {:?}", e, text);
                                });
                            }
                        }
                    }
                    Message::Binary(bin) => {
                        if let Err(e) = s_tx.send(types::ServerEvent::AudioFrame { bytes: bin }) {
                            tracing::debug!("no subscribers for audio frame: {}", e);
                        }
                    }
                    Message::Close(frame) => {
                        tracing::info!("connection closed: {:?}", frame);
                        close_reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    _ => {}
                }
            }
            let _ = s_tx.send(types::ServerEvent::Close { reason: close_reason });
        });

        self.send_init().await
    }

    async fn send_init(&self) -> Result<()> {
        let mut init = types::events::client::InitEvent::new(
            self.config.device_id(),
            self.config.bot_key(),
            self.config.init_config().clone(),
        );
        let token = self.config.auth_token().expose_secret();
        if !token.is_empty() {
            init = init.with_auth_token(token);
        }
        self.send_client_event(types::ClientEvent::Init(init)).await
    }

    /// Receiver for the server event stream. The first call returns a
    /// subscription opened before the socket tasks started, so nothing
    /// is missed; later calls only see events from now on.
    pub fn server_events(&mut self) -> Result<ServerRx> {
        if let Some(rx) = self.s_rx.take() {
            return Ok(rx);
        }
        match self.s_tx {
            Some(ref tx) => Ok(tx.subscribe()),
            None => Err(BotError::client("not connected yet")),
        }
    }

    /// Raw outbound handle, used by the capture pipeline to push PCM
    /// frames without going through the typed helpers.
    pub fn sender(&self) -> Result<ClientTx> {
        match self.c_tx {
            Some(ref tx) => Ok(tx.clone()),
            None => Err(BotError::client("not connected yet")),
        }
    }

    /// Backend-assigned session id, once a `Ready` or `SessionStarted`
    /// event carried one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|guard| guard.clone())
    }

    async fn send_client_event(&self, event: types::ClientEvent) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => tx
                .send(Outbound::Event(event))
                .await
                .map_err(|_| BotError::transport("connection task ended")),
            None => Err(BotError::client("not connected yet")),
        }
    }

    pub async fn send_input(&self, input: types::events::client::InputEvent) -> Result<()> {
        self.send_client_event(types::ClientEvent::Input(input)).await
    }

    pub async fn open_input_audio(&self, sample_rate: u32) -> Result<()> {
        let event = types::ClientEvent::InputAudioStreamOpen(
            types::events::client::InputAudioStreamOpenEvent::new().with_sample_rate(sample_rate),
        );
        self.send_client_event(event).await
    }

    pub async fn close_input_audio(&self) -> Result<()> {
        let event = types::ClientEvent::InputAudioStreamClose(
            types::events::client::InputAudioStreamCloseEvent::new(),
        );
        self.send_client_event(event).await
    }

    pub async fn send_vote(&self, turn_id: i64, node_id: i64, vote: i32) -> Result<()> {
        let event = types::ClientEvent::Vote(types::events::client::VoteEvent::new(turn_id, node_id, vote));
        self.send_client_event(event).await
    }

    pub async fn flush_logs(&self, entries: Vec<LogEntry>) -> Result<()> {
        let event = types::ClientEvent::Log(types::events::client::LogEvent::new(entries));
        self.send_client_event(event).await
    }
}

pub async fn connect_with_config(capacity: usize, config: config::Config) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect().await?;
    Ok(client)
}

pub async fn connect() -> Result<Client> {
    let config = config::Config::new();
    connect_with_config(1024, config).await
}

#[cfg(test)]
pub(crate) fn fake(capacity: usize) -> (Client, tokio::sync::mpsc::Receiver<Outbound>, ServerTx) {
    let (c_tx, c_rx) = tokio::sync::mpsc::channel(capacity);
    let (s_tx, s_rx) = tokio::sync::broadcast::channel(capacity);
    let client = Client {
        capacity,
        config: config::Config::builder().with_bot_key("test-bot").with_device_id("test-device").build(),
        c_tx: Some(c_tx),
        s_tx: Some(s_tx.clone()),
        s_rx: Some(s_rx),
        session_id: Arc::new(Mutex::new(None)),
    };
    (client, c_rx, s_tx)
}
