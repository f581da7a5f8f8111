use super::StartOutcome;
use crate::capture::{encode_pcm16, AudioInput, CaptureState};
use crate::client::{ClientTx, Outbound};
use crate::error::{BotError, Result};
use crate::types;

/// Backend-side recognition: announces an audio stream on the wire, then
/// pushes PCM16 frames from the capture device until stopped. Transcripts
/// come back as `Recognized` server events.
pub(crate) struct StreamEngine {
    input: Option<Box<dyn AudioInput>>,
    state: CaptureState,
    tx: Option<ClientTx>,
    sample_rate: u32,
}

impl StreamEngine {
    pub fn new(input: Option<Box<dyn AudioInput>>) -> Self {
        Self {
            input,
            state: CaptureState::Closed,
            tx: None,
            sample_rate: 16_000,
        }
    }

    /// Points the engine at a fresh connection. Must happen before the
    /// first `start` of a session.
    pub fn bind(&mut self, tx: ClientTx, sample_rate: u32) {
        self.tx = Some(tx);
        self.sample_rate = sample_rate;
    }

    pub fn unbind(&mut self) {
        self.tx = None;
    }

    /// Opens or resumes capture. A fresh open announces the stream to the
    /// backend and listening must wait for its ack; resuming after a
    /// suspend does not re-announce, so capture is live immediately.
    pub async fn start(&mut self) -> Result<StartOutcome> {
        match self.state {
            CaptureState::Running => Ok(StartOutcome::Listening),
            CaptureState::Suspended => {
                if let Some(input) = self.input.as_mut() {
                    input.resume()?;
                }
                self.state = CaptureState::Running;
                Ok(StartOutcome::Listening)
            }
            CaptureState::Closed => {
                self.open().await?;
                Ok(StartOutcome::AwaitingAck)
            }
        }
    }

    async fn open(&mut self) -> Result<()> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| BotError::client("audio stream not bound to a connection"))?;
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| BotError::client("no audio input available"))?;
        let target_rate = self.sample_rate;

        tx.send(Outbound::Event(types::ClientEvent::InputAudioStreamOpen(
            types::events::client::InputAudioStreamOpenEvent::new().with_sample_rate(target_rate),
        )))
        .await
        .map_err(|_| BotError::transport("connection task ended"))?;

        let frame_tx = tx.clone();
        let info = input.open(Box::new(move |samples, source_rate| {
            let bytes = encode_pcm16(samples, source_rate, target_rate);
            if bytes.is_empty() {
                return;
            }
            // Frames are droppable; never block the capture thread.
            if let Err(e) = frame_tx.try_send(Outbound::Audio(bytes)) {
                tracing::debug!("dropping capture frame: {}", e);
            }
        }))?;
        tracing::debug!("capture open at {} Hz, streaming at {} Hz", info.sample_rate, target_rate);
        self.state = CaptureState::Running;
        Ok(())
    }

    /// Halts capture without releasing the device or closing the stream
    /// on the wire.
    pub fn suspend(&mut self) {
        if self.state != CaptureState::Running {
            return;
        }
        if let Some(input) = self.input.as_mut() {
            if let Err(e) = input.suspend() {
                tracing::warn!("failed to suspend capture: {}", e);
            }
        }
        self.state = CaptureState::Suspended;
    }

    /// Releases the device. With `notify` the backend is told the stream
    /// is done so it finalizes recognition on what it already has.
    pub async fn stop(&mut self, notify: bool) {
        if self.state == CaptureState::Closed {
            return;
        }
        if let Some(input) = self.input.as_mut() {
            input.close();
        }
        self.state = CaptureState::Closed;

        if notify {
            if let Some(tx) = &self.tx {
                let event = types::ClientEvent::InputAudioStreamClose(
                    types::events::client::InputAudioStreamCloseEvent::new(),
                );
                if tx.send(Outbound::Event(event)).await.is_err() {
                    tracing::debug!("stream close dropped, connection gone");
                }
            }
        }
    }

    pub fn into_input(self) -> Option<Box<dyn AudioInput>> {
        self.input
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::{FrameSink, StreamInfo};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MicState {
        sink: Option<FrameSink>,
        opens: usize,
        suspends: usize,
        resumes: usize,
        closes: usize,
    }

    struct FakeMic {
        state: Arc<Mutex<MicState>>,
        rate: u32,
    }

    impl FakeMic {
        fn new(rate: u32) -> (Self, Arc<Mutex<MicState>>) {
            let state = Arc::new(Mutex::new(MicState::default()));
            (Self { state: state.clone(), rate }, state)
        }
    }

    impl AudioInput for FakeMic {
        fn open(&mut self, sink: FrameSink) -> Result<StreamInfo> {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.sink = Some(sink);
            Ok(StreamInfo { sample_rate: self.rate })
        }

        fn suspend(&mut self) -> Result<()> {
            self.state.lock().unwrap().suspends += 1;
            Ok(())
        }

        fn resume(&mut self) -> Result<()> {
            self.state.lock().unwrap().resumes += 1;
            Ok(())
        }

        fn close(&mut self) {
            let mut state = self.state.lock().unwrap();
            state.closes += 1;
            state.sink = None;
        }
    }

    fn push_frame(state: &Arc<Mutex<MicState>>, samples: &[f32], rate: u32) {
        let mut state = state.lock().unwrap();
        if let Some(sink) = state.sink.as_mut() {
            sink(samples, rate);
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_open_announces_then_streams() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let (mic, mic_state) = FakeMic::new(32_000);
        let mut engine = StreamEngine::new(Some(Box::new(mic)));
        engine.bind(tx, 16_000);

        let outcome = engine.start().await.expect("start");
        assert_eq!(outcome, StartOutcome::AwaitingAck);
        assert_eq!(mic_state.lock().unwrap().opens, 1);

        push_frame(&mic_state, &[0.0f32; 640], 32_000);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        match &sent[0] {
            Outbound::Event(types::ClientEvent::InputAudioStreamOpen(event)) => {
                assert_eq!(event.sample_rate(), Some(16_000));
            }
            other => panic!("expected stream open, got {:?}", other),
        }
        match &sent[1] {
            // 640 samples at 2:1 -> 320 samples -> 640 bytes
            Outbound::Audio(bytes) => assert_eq!(bytes.len(), 640),
            other => panic!("expected audio frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let (mic, mic_state) = FakeMic::new(16_000);
        let mut engine = StreamEngine::new(Some(Box::new(mic)));
        engine.bind(tx, 16_000);

        engine.start().await.expect("first start");
        engine.start().await.expect("second start");
        assert_eq!(mic_state.lock().unwrap().opens, 1);
    }

    #[tokio::test]
    async fn test_suspend_resume_does_not_reannounce() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let (mic, mic_state) = FakeMic::new(16_000);
        let mut engine = StreamEngine::new(Some(Box::new(mic)));
        engine.bind(tx, 16_000);

        engine.start().await.expect("start");
        let _ = drain(&mut rx);

        engine.suspend();
        let outcome = engine.start().await.expect("resume");
        assert_eq!(outcome, StartOutcome::Listening);

        let state = mic_state.lock().unwrap();
        assert_eq!(state.suspends, 1);
        assert_eq!(state.resumes, 1);
        assert_eq!(state.opens, 1);
        drop(state);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_stop_notifies_and_releases() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let (mic, mic_state) = FakeMic::new(16_000);
        let mut engine = StreamEngine::new(Some(Box::new(mic)));
        engine.bind(tx, 16_000);

        engine.start().await.expect("start");
        let _ = drain(&mut rx);

        engine.stop(true).await;
        assert_eq!(mic_state.lock().unwrap().closes, 1);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            Outbound::Event(types::ClientEvent::InputAudioStreamClose(_))
        ));

        // stopping again is a no-op
        engine.stop(true).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_start_without_device_fails() {
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let mut engine = StreamEngine::new(None);
        engine.bind(tx, 16_000);
        assert!(engine.start().await.is_err());
    }
}
