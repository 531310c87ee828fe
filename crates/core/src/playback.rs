use crate::api::VoiceGateway;
use anyhow::Result;

/// Which synthesis voice to use for a playback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechVoice {
    /// The narrative answer voice.
    Narrative,
    /// The original-language excerpt voice.
    Original,
}

/// The single audio output resource. Starting a payload while another is
/// playing is a caller bug; the controller below owns the only instance, so
/// overlap is impossible by construction.
#[cfg_attr(test, mockall::automock)]
pub trait AudioOutput: Send {
    /// Begins playing one encoded audio payload.
    fn start(&mut self, audio: Vec<u8>) -> Result<()>;
    /// Stops playback and releases the underlying audio resources.
    fn stop(&mut self);
    /// Whether the last started payload has drained.
    fn is_finished(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading { text: String },
    Playing { text: String },
}

impl PlaybackState {
    fn text(&self) -> Option<&str> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Loading { text } | PlaybackState::Playing { text } => Some(text),
        }
    }
}

/// Guarantees at most one synthesized-audio stream plays at a time.
///
/// Both call sites share this controller: the auto-read of a narrative
/// answer after a voice-originated send, and the per-message toggle for an
/// original-language excerpt.
pub struct SpeechPlaybackController {
    output: Box<dyn AudioOutput>,
    state: PlaybackState,
}

impl SpeechPlaybackController {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            state: PlaybackState::Idle,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Synthesizes `text` and plays it. Requesting the text that is already
    /// loading or playing stops it instead (toggle semantics); requesting a
    /// different text stops the current audio before starting the new one.
    ///
    /// Errors are returned to the caller, which decides whether to surface
    /// them; the controller is always back in `Idle` when that happens.
    pub async fn play<V>(&mut self, text: &str, voice: SpeechVoice, gateway: &V) -> Result<()>
    where
        V: VoiceGateway + ?Sized,
    {
        self.refresh();

        if self.state.text() == Some(text) {
            self.stop();
            return Ok(());
        }
        if self.state != PlaybackState::Idle {
            self.stop();
        }

        self.state = PlaybackState::Loading {
            text: text.to_string(),
        };
        let audio = match gateway.synthesize(text, voice).await {
            Ok(audio) => audio,
            Err(e) => {
                self.state = PlaybackState::Idle;
                return Err(e.context("speech synthesis failed"));
            }
        };

        if let Err(e) = self.output.start(audio) {
            self.output.stop();
            self.state = PlaybackState::Idle;
            return Err(e.context("audio playback failed to start"));
        }
        self.state = PlaybackState::Playing {
            text: text.to_string(),
        };
        Ok(())
    }

    /// Stops any current playback and releases the audio resources.
    pub fn stop(&mut self) {
        if self.state != PlaybackState::Idle {
            self.output.stop();
            self.state = PlaybackState::Idle;
        }
    }

    /// Folds a naturally ended playback back to `Idle`. Called from the
    /// runtime loop; playback that drained on its own still gets its
    /// resources released.
    pub fn refresh(&mut self) {
        if matches!(self.state, PlaybackState::Playing { .. }) && self.output.is_finished() {
            self.output.stop();
            self.state = PlaybackState::Idle;
        }
    }
}
