use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use botwire::{
    AudioInput, AudioOutput, AudioSource, BotError, Config, FrameSink, InitOptions,
    MessageDirection, PlaybackDone, Result, SessionController, SessionState, StatusUpdate,
    StreamInfo, UiDelegate, UiMessage,
};
use botwire_utils as utils;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapProd;
use rubato::{FastFixedIn, Resampler};
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

const INPUT_CHUNK_SIZE: usize = 1024;
const OUTPUT_CHUNK_SIZE: usize = 1024;
const OUTPUT_LATENCY_MS: usize = 1000;

enum MicCommand {
    Open(FrameSink),
    Suspend,
    Resume,
    Close,
}

/// Microphone capture on a dedicated thread. cpal streams cannot move
/// between threads; the command channel can.
struct CpalMicrophone {
    commands: std_mpsc::Sender<MicCommand>,
    sample_rate: u32,
}

impl CpalMicrophone {
    fn open_default() -> anyhow::Result<Self> {
        let device = utils::device::input_device(None)?;
        let default_config = device.default_input_config()?;
        let sample_rate = default_config.sample_rate().0;
        let channels = default_config.channels();
        let config = StreamConfig {
            channels,
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
        };
        println!("input: device={:?}, config={:?}", device.name()?, &config);

        let (commands, command_rx) = std_mpsc::channel::<MicCommand>();
        std::thread::spawn(move || {
            run_microphone(device, config, channels as usize, sample_rate, command_rx)
        });
        Ok(Self {
            commands,
            sample_rate,
        })
    }
}

fn run_microphone(
    device: cpal::Device,
    config: StreamConfig,
    channels: usize,
    sample_rate: u32,
    commands: std_mpsc::Receiver<MicCommand>,
) {
    let mut stream: Option<cpal::Stream> = None;
    while let Ok(command) = commands.recv() {
        match command {
            MicCommand::Open(mut sink) => {
                let data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels > 1 {
                        // left channel only
                        let mono: Vec<f32> = data.chunks(channels).map(|frame| frame[0]).collect();
                        sink(&mono, sample_rate);
                    } else {
                        sink(data, sample_rate);
                    }
                };
                match device.build_input_stream(
                    &config,
                    data_fn,
                    move |err| eprintln!("input stream error: {}", err),
                    None,
                ) {
                    Ok(s) => {
                        if let Err(e) = s.play() {
                            eprintln!("failed to start capture: {}", e);
                        }
                        stream = Some(s);
                    }
                    Err(e) => eprintln!("failed to open capture: {}", e),
                }
            }
            MicCommand::Suspend => {
                if let Some(s) = stream.as_ref() {
                    if let Err(e) = s.pause() {
                        eprintln!("failed to pause capture: {}", e);
                    }
                }
            }
            MicCommand::Resume => {
                if let Some(s) = stream.as_ref() {
                    if let Err(e) = s.play() {
                        eprintln!("failed to resume capture: {}", e);
                    }
                }
            }
            MicCommand::Close => {
                stream = None;
            }
        }
    }
}

impl AudioInput for CpalMicrophone {
    fn open(&mut self, sink: FrameSink) -> Result<StreamInfo> {
        self.commands
            .send(MicCommand::Open(sink))
            .map_err(|_| BotError::client("microphone thread stopped"))?;
        Ok(StreamInfo {
            sample_rate: self.sample_rate,
        })
    }

    fn suspend(&mut self) -> Result<()> {
        self.commands
            .send(MicCommand::Suspend)
            .map_err(|_| BotError::client("microphone thread stopped"))
    }

    fn resume(&mut self) -> Result<()> {
        self.commands
            .send(MicCommand::Resume)
            .map_err(|_| BotError::client("microphone thread stopped"))
    }

    fn close(&mut self) {
        let _ = self.commands.send(MicCommand::Close);
    }
}

/// Plays backend PCM frames through the output ring buffer. URL media is
/// announced but not fetched; pair this demo with a frame-streaming bot.
struct FramePlayer {
    producer: Mutex<HeapProd<f32>>,
    resampler: Mutex<FastFixedIn<f32>>,
}

impl AudioOutput for FramePlayer {
    fn play(&self, source: AudioSource, done: PlaybackDone) {
        match source {
            AudioSource::Url(url) => {
                println!("(audio) {}", url);
            }
            AudioSource::Frame(bytes) => {
                let samples = utils::audio::decode_frame(&bytes);
                let mut resampler = self.resampler.lock().unwrap();
                let mut producer = self.producer.lock().unwrap();
                let chunk_size = resampler.input_frames_next();
                for chunk in utils::audio::split_for_chunks(&samples, chunk_size) {
                    if let Ok(resampled) = resampler.process(&[chunk.as_slice()], None) {
                        if let Some(resampled) = resampled.first() {
                            for sample in resampled {
                                if producer.try_push(*sample).is_err() {
                                    tracing::warn!("output buffer full, dropping samples");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
        done.finish();
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn stop(&self) {}
}

struct ConsoleUi;

impl UiDelegate for ConsoleUi {
    fn add_message(&self, message: UiMessage) {
        match message.direction {
            MessageDirection::Sent => println!("you: {}", message.text),
            MessageDirection::Received => println!("bot: {}", message.text),
        }
    }

    fn set_status(&self, status: StatusUpdate) {
        if status.state == SessionState::Listening {
            println!("(listening...)");
        }
    }

    fn on_transcript(&self, text: &str, is_final: bool) {
        if !is_final {
            println!("you (speaking): {}", text);
        }
    }

    fn on_error(&self, error: &BotError) {
        eprintln!("error: {}", error);
    }

    fn on_end(&self) {
        println!("(session ended)");
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let output = utils::device::output_device(None).expect("failed to get output device");
    let output_config = output
        .default_output_config()
        .expect("failed to get default output config");
    let output_config = StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let output_channel_count = output_config.channels as usize;
    let output_sample_rate = output_config.sample_rate.0 as f64;
    println!(
        "output: device={:?}, config={:?}",
        output.name().expect("output device name"),
        &output_config
    );

    let buffer = utils::audio::shared_buffer(output_sample_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let (producer, mut consumer) = buffer.split();

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        for frame in data.chunks_mut(output_channel_count) {
            let sample = consumer.try_pop().unwrap_or(0.0);
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }
    };
    let output_stream = output
        .build_output_stream(
            &output_config,
            output_data_fn,
            move |err| eprintln!("output stream error: {}", err),
            None,
        )
        .expect("failed to build output stream");
    output_stream.play().expect("failed to play output stream");

    let resampler = utils::audio::create_resampler(
        utils::audio::STREAM_PCM16_SAMPLE_RATE,
        output_sample_rate,
        OUTPUT_CHUNK_SIZE,
    )
    .expect("failed to create resampler for output");

    let player = Arc::new(FramePlayer {
        producer: Mutex::new(producer),
        resampler: Mutex::new(resampler),
    });

    let microphone = CpalMicrophone::open_default().expect("failed to open microphone");

    let config = Config::new();
    let controller = SessionController::builder(config, Arc::new(ConsoleUi))
        .with_audio_output(player)
        .with_audio_input(Box::new(microphone))
        .build();

    controller
        .init(InitOptions::new())
        .await
        .expect("failed to open session");

    println!("Connected. Speak into the microphone; Ctrl-C to leave.");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    println!("Shutting down...");
    controller.stop().expect("failed to stop session");
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}
