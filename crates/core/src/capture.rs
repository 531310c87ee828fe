use crate::Notice;
use crate::api::VoiceGateway;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Why the microphone could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum MicrophoneError {
    #[error("l'accès au micro a été refusé")]
    PermissionDenied,
    #[error("aucun périphérique de capture disponible")]
    Unsupported,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A live recording: raw little-endian PCM16 byte chunks plus the rate they
/// were captured at. The channel closes when the device is released.
///
/// The channel is unbounded: the device delivers chunks faster than the
/// runtime polls them, and a bounded channel would drop audio once full. The
/// payload stays bounded by the recording gesture itself.
pub struct CaptureStream {
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    pub sample_rate: u32,
}

/// Port over the audio capture hardware. `open` requests the device and
/// starts delivering chunks; `close` stops delivery and releases it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MicrophonePort: Send {
    async fn open(&mut self) -> Result<CaptureStream, MicrophoneError>;
    fn close(&mut self);
}

/// One finished recording, ready for the transcription upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAudio {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Recording,
    Finalizing,
}

/// What one `toggle` call did.
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Recording has started.
    Started,
    /// The call raced an in-progress transition and was ignored.
    Ignored,
    /// Recording finished; the transcript goes down the send pathway,
    /// tagged as voice-originated.
    Transcribed(String),
    /// Recording ended without anything to send.
    Aborted(Notice),
}

/// State machine wrapping microphone acquisition, chunked recording and the
/// hand-off to transcription.
///
/// Lives across recording gestures; the buffered chunks and the capture
/// stream only live for the duration of one gesture.
pub struct VoiceCaptureController {
    state: CaptureState,
    chunks: Vec<Vec<u8>>,
    stream: Option<CaptureStream>,
}

impl VoiceCaptureController {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            chunks: Vec::new(),
            stream: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Starts a recording when idle, finishes it when recording. A second
    /// call while the device is still being requested is ignored.
    pub async fn toggle<V>(
        &mut self,
        microphone: &mut dyn MicrophonePort,
        voice: &V,
    ) -> CaptureOutcome
    where
        V: VoiceGateway + ?Sized,
    {
        match self.state {
            CaptureState::Idle => self.start(microphone).await,
            CaptureState::Requesting | CaptureState::Finalizing => CaptureOutcome::Ignored,
            CaptureState::Recording => self.finish(microphone, voice).await,
        }
    }

    /// Drains chunks the device has delivered so far. Safe to call from the
    /// runtime loop at any cadence; everything left over is drained again
    /// when the recording stops.
    pub fn poll_chunks(&mut self) {
        if self.state != CaptureState::Recording {
            return;
        }
        if let Some(stream) = &mut self.stream {
            while let Ok(chunk) = stream.chunks.try_recv() {
                self.chunks.push(chunk);
            }
        }
    }

    async fn start(&mut self, microphone: &mut dyn MicrophonePort) -> CaptureOutcome {
        self.state = CaptureState::Requesting;
        match microphone.open().await {
            Ok(stream) => {
                tracing::info!(sample_rate = stream.sample_rate, "recording started");
                self.chunks.clear();
                self.stream = Some(stream);
                self.state = CaptureState::Recording;
                CaptureOutcome::Started
            }
            Err(e) => {
                tracing::warn!("microphone unavailable: {e}");
                self.state = CaptureState::Idle;
                CaptureOutcome::Aborted(Notice::MicrophoneUnavailable(e.to_string()))
            }
        }
    }

    async fn finish<V>(&mut self, microphone: &mut dyn MicrophonePort, voice: &V) -> CaptureOutcome
    where
        V: VoiceGateway + ?Sized,
    {
        self.state = CaptureState::Finalizing;

        // Release the hardware before any network call.
        microphone.close();
        let mut stream = self.stream.take();
        let sample_rate = stream.as_ref().map(|s| s.sample_rate).unwrap_or(0);
        if let Some(stream) = &mut stream {
            while let Ok(chunk) = stream.chunks.try_recv() {
                self.chunks.push(chunk);
            }
        }
        drop(stream);

        let pcm: Vec<u8> = self.chunks.drain(..).flatten().collect();
        self.state = CaptureState::Idle;

        if pcm.is_empty() {
            tracing::warn!("recording stopped with no captured audio");
            return CaptureOutcome::Aborted(Notice::NothingRecorded);
        }

        tracing::info!(bytes = pcm.len(), "recording stopped, transcribing");
        match voice.transcribe(RecordedAudio { pcm, sample_rate }).await {
            Ok(text) if !text.trim().is_empty() => CaptureOutcome::Transcribed(text),
            Ok(_) => CaptureOutcome::Aborted(Notice::TranscriptionFailed(
                "aucun texte reconnu".to_string(),
            )),
            Err(e) => {
                tracing::error!("transcription failed: {e:#}");
                CaptureOutcome::Aborted(Notice::TranscriptionFailed(e.to_string()))
            }
        }
    }
}

impl Default for VoiceCaptureController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockVoiceGateway;

    fn stream_with_chunks(chunks: Vec<Vec<u8>>, sample_rate: u32) -> CaptureStream {
        let (tx, rx) = mpsc::unbounded_channel();
        for chunk in chunks {
            tx.send(chunk).unwrap();
        }
        CaptureStream {
            chunks: rx,
            sample_rate,
        }
    }

    #[tokio::test]
    async fn a_full_gesture_hands_the_concatenated_payload_to_transcription() {
        let mut microphone = MockMicrophonePort::new();
        microphone
            .expect_open()
            .times(1)
            .returning(|| Ok(stream_with_chunks(vec![vec![1, 2], vec![3, 4]], 16_000)));
        microphone.expect_close().times(1).return_const(());

        let mut gateway = MockVoiceGateway::new();
        gateway
            .expect_transcribe()
            .withf(|audio| audio.pcm == vec![1, 2, 3, 4] && audio.sample_rate == 16_000)
            .times(1)
            .returning(|_| Ok("Qu'est-ce que la zakat ?".to_string()));

        let mut controller = VoiceCaptureController::new();
        assert_eq!(
            controller.toggle(&mut microphone, &gateway).await,
            CaptureOutcome::Started
        );
        assert_eq!(controller.state(), CaptureState::Recording);
        controller.poll_chunks();

        let outcome = controller.toggle(&mut microphone, &gateway).await;
        assert_eq!(
            outcome,
            CaptureOutcome::Transcribed("Qu'est-ce que la zakat ?".to_string())
        );
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn a_long_recording_loses_no_chunks_even_when_never_polled() {
        // Thousands of undelivered chunks sit in the channel, as they would
        // during a long gesture with the runtime parked on user input.
        let chunk_count = 2048;
        let mut microphone = MockMicrophonePort::new();
        microphone.expect_open().returning(move || {
            Ok(stream_with_chunks(vec![vec![7u8, 7]; chunk_count], 16_000))
        });
        microphone.expect_close().return_const(());

        let mut gateway = MockVoiceGateway::new();
        gateway
            .expect_transcribe()
            .withf(move |audio| audio.pcm.len() == chunk_count * 2)
            .times(1)
            .returning(|_| Ok("une longue question".to_string()));

        let mut controller = VoiceCaptureController::new();
        controller.toggle(&mut microphone, &gateway).await;
        let outcome = controller.toggle(&mut microphone, &gateway).await;

        assert_eq!(
            outcome,
            CaptureOutcome::Transcribed("une longue question".to_string())
        );
    }

    #[tokio::test]
    async fn a_denied_microphone_surfaces_a_notice_and_returns_to_idle() {
        let mut microphone = MockMicrophonePort::new();
        microphone
            .expect_open()
            .returning(|| Err(MicrophoneError::PermissionDenied));

        let gateway = MockVoiceGateway::new();
        let mut controller = VoiceCaptureController::new();
        let outcome = controller.toggle(&mut microphone, &gateway).await;

        assert!(matches!(
            outcome,
            CaptureOutcome::Aborted(Notice::MicrophoneUnavailable(_))
        ));
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn stopping_with_zero_bytes_never_calls_the_transcriber() {
        let mut microphone = MockMicrophonePort::new();
        microphone
            .expect_open()
            .returning(|| Ok(stream_with_chunks(vec![], 16_000)));
        microphone.expect_close().return_const(());

        // No expectation on `transcribe`: any call would panic.
        let gateway = MockVoiceGateway::new();
        let mut controller = VoiceCaptureController::new();
        controller.toggle(&mut microphone, &gateway).await;
        let outcome = controller.toggle(&mut microphone, &gateway).await;

        assert_eq!(outcome, CaptureOutcome::Aborted(Notice::NothingRecorded));
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn a_failed_transcription_surfaces_its_own_notice() {
        let mut microphone = MockMicrophonePort::new();
        microphone
            .expect_open()
            .returning(|| Ok(stream_with_chunks(vec![vec![9, 9]], 16_000)));
        microphone.expect_close().return_const(());

        let mut gateway = MockVoiceGateway::new();
        gateway
            .expect_transcribe()
            .returning(|_| Err(anyhow::anyhow!("whisper is down")));

        let mut controller = VoiceCaptureController::new();
        controller.toggle(&mut microphone, &gateway).await;
        let outcome = controller.toggle(&mut microphone, &gateway).await;

        assert!(matches!(
            outcome,
            CaptureOutcome::Aborted(Notice::TranscriptionFailed(_))
        ));
    }

    #[tokio::test]
    async fn an_empty_transcription_sends_nothing() {
        let mut microphone = MockMicrophonePort::new();
        microphone
            .expect_open()
            .returning(|| Ok(stream_with_chunks(vec![vec![9, 9]], 16_000)));
        microphone.expect_close().return_const(());

        let mut gateway = MockVoiceGateway::new();
        gateway
            .expect_transcribe()
            .returning(|_| Ok("   ".to_string()));

        let mut controller = VoiceCaptureController::new();
        controller.toggle(&mut microphone, &gateway).await;
        let outcome = controller.toggle(&mut microphone, &gateway).await;

        assert!(matches!(
            outcome,
            CaptureOutcome::Aborted(Notice::TranscriptionFailed(_))
        ));
    }
}
