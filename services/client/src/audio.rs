//! Hardware adapters for voice capture and speech playback.
//!
//! Both cpal and rodio streams must stay on the thread that created them, so
//! each adapter parks its device on a dedicated thread and talks to it over
//! channels. The engine only ever sees the `MicrophonePort` and `AudioOutput`
//! traits.

use alim_core::capture::{CaptureStream, MicrophoneError, MicrophonePort};
use alim_core::playback::AudioOutput;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default-device microphone. While a recording runs, a capture thread owns
/// the cpal stream and forwards PCM16 chunks; dropping the stop sender shuts
/// it down. The chunk channel is unbounded so nothing is lost while the
/// runtime sits on user input.
pub struct CpalMicrophone {
    stop: Option<std::sync::mpsc::Sender<()>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self { stop: None }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MicrophonePort for CpalMicrophone {
    async fn open(&mut self) -> Result<CaptureStream, MicrophoneError> {
        self.close();

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        std::thread::spawn(move || match open_input_stream(chunk_tx) {
            Ok((stream, sample_rate)) => {
                if ready_tx.send(Ok(sample_rate)).is_err() {
                    return;
                }
                // Parks until the stop sender is used or dropped.
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        });

        let sample_rate = ready_rx
            .await
            .map_err(|_| MicrophoneError::Other(anyhow!("capture thread exited unexpectedly")))??;
        self.stop = Some(stop_tx);
        Ok(CaptureStream {
            chunks: chunk_rx,
            sample_rate,
        })
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Opens the default input device and starts delivering little-endian PCM16
/// chunks, mixed down to mono. Must run on the thread that will own the
/// stream.
fn open_input_stream(
    chunks: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<(cpal::Stream, u32), MicrophoneError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(MicrophoneError::Unsupported)?;
    let config = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => MicrophoneError::Unsupported,
        other => MicrophoneError::Other(other.into()),
    })?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    tracing::info!(
        sample_rate,
        channels,
        "using input device: {:?}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let err_fn = |err| tracing::error!("an error occurred on the input stream: {err}");
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let chunk = mono_pcm16_from_f32(data, channels);
                if chunks.send(chunk).is_err() {
                    tracing::debug!("capture chunk delivered after the stream was released");
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let chunk = mono_pcm16_from_i16(data, channels);
                if chunks.send(chunk).is_err() {
                    tracing::debug!("capture chunk delivered after the stream was released");
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(MicrophoneError::Other(anyhow!(
                "unsupported input sample format: {other:?}"
            )));
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => MicrophoneError::Unsupported,
        other => MicrophoneError::Other(other.into()),
    })?;

    stream
        .play()
        .map_err(|e| MicrophoneError::Other(e.into()))?;
    Ok((stream, sample_rate))
}

fn mono_pcm16_from_f32(data: &[f32], channels: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / channels.max(1) * 2);
    for frame in data.chunks(channels.max(1)) {
        let mixed = frame.iter().sum::<f32>() / frame.len() as f32;
        let sample = (mixed.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

fn mono_pcm16_from_i16(data: &[i16], channels: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / channels.max(1) * 2);
    for frame in data.chunks(channels.max(1)) {
        let mixed = (frame.iter().map(|&s| s as i32).sum::<i32>() / frame.len() as i32) as i16;
        out.extend_from_slice(&mixed.to_le_bytes());
    }
    out
}

/// Default-device speaker. Each payload gets a playback thread that owns the
/// rodio output stream; the sink handle it sends back is what lets the
/// controller stop or observe the playback.
pub struct RodioSpeaker {
    sink: Option<Arc<rodio::Sink>>,
}

impl RodioSpeaker {
    pub fn new() -> Self {
        Self { sink: None }
    }
}

impl Default for RodioSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for RodioSpeaker {
    fn start(&mut self, audio: Vec<u8>) -> Result<()> {
        self.stop();

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let stream = match rodio::OutputStreamBuilder::open_default_stream() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx
                        .send(Err(anyhow::Error::from(e).context("no audio output device")));
                    return;
                }
            };
            let sink = Arc::new(rodio::Sink::connect_new(stream.mixer()));
            let source = match rodio::Decoder::new(Cursor::new(audio)) {
                Ok(source) => source,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow::Error::from(e)
                        .context("could not decode the synthesized audio")));
                    return;
                }
            };
            sink.append(source);
            if ready_tx.send(Ok(Arc::clone(&sink))).is_err() {
                return;
            }
            // Keeps the output stream alive until the sink drains or is
            // stopped.
            sink.sleep_until_end();
            drop(stream);
        });

        let sink = ready_rx
            .recv()
            .map_err(|_| anyhow!("playback thread exited unexpectedly"))??;
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().map(|s| s.empty()).unwrap_or(true)
    }
}
