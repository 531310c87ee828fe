use crate::Notice;
use crate::api::{ChatReply, ChatService, SessionDirectory, SessionSummary, VoiceGateway};
use crate::capture::{CaptureOutcome, CaptureState, MicrophonePort, VoiceCaptureController};
use crate::catalog::SessionCatalog;
use crate::conversation::{ConversationStore, Message, Sender};
use crate::identity::{IdentityStore, SessionId, SessionIdentity, mint_session_id};
use crate::playback::{AudioOutput, PlaybackState, SpeechPlaybackController, SpeechVoice};
use crate::segment::segment;
use crate::stream::{SEND_FAILURE_TEXT, StreamOutcome, consume_reply};
use anyhow::Result;

/// Synthetic assistant text shown when a session history cannot be loaded.
pub const HISTORY_LOAD_FAILURE_TEXT: &str = "Impossible de charger cette conversation.";

/// Whether a user message was typed or produced by transcription. A
/// voice-originated send tags the eventual reply for auto-read-aloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Typed,
    Voice,
}

/// What an engine command did.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Refused(Notice),
}

/// Coordinates the session identity, the transcript, the catalog and the two
/// media controllers. Everything runs on one cooperative scheduler; the only
/// suspension points are the collaborator calls.
pub struct ChatEngine<B, I> {
    backend: B,
    identity: SessionIdentity<I>,
    store: ConversationStore,
    catalog: SessionCatalog,
    capture: VoiceCaptureController,
    playback: SpeechPlaybackController,
    microphone: Box<dyn MicrophonePort>,
    busy: bool,
}

impl<B, I> ChatEngine<B, I>
where
    B: ChatService + SessionDirectory + VoiceGateway,
    I: IdentityStore,
{
    pub fn new(
        backend: B,
        identity_store: I,
        microphone: Box<dyn MicrophonePort>,
        speaker: Box<dyn AudioOutput>,
    ) -> Self {
        Self {
            backend,
            identity: SessionIdentity::new(identity_store),
            store: ConversationStore::new(),
            catalog: SessionCatalog::new(),
            capture: VoiceCaptureController::new(),
            playback: SpeechPlaybackController::new(speaker),
            microphone,
            busy: false,
        }
    }

    pub fn transcript(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        self.catalog.sessions()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.store.session()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn playback_state(&self) -> &PlaybackState {
        self.playback.state()
    }

    /// Folds a naturally ended playback back to idle; call from the runtime
    /// loop.
    pub fn refresh_playback(&mut self) {
        self.playback.refresh();
    }

    pub fn stop_playback(&mut self) {
        self.playback.stop();
    }

    /// Startup policy: resolve the identifier, fetch the catalog, and only
    /// load a history when the persisted id is one the server still knows.
    /// A locally-cached id the server has forgotten starts an empty
    /// conversation instead of erroring.
    pub async fn startup(&mut self) {
        let (id, newly_minted) = self.identity.resolve();
        self.catalog.refresh(&self.backend).await;
        if newly_minted || !self.catalog.contains(&id) {
            tracing::info!(session = %id, "starting a new conversation");
            self.store.reset_for(id);
        } else {
            self.load_history(id).await;
        }
    }

    /// Starts a brand-new conversation under a freshly minted identifier.
    pub async fn start_new_chat(&mut self) -> Outcome {
        if self.busy {
            return Outcome::Refused(Notice::SendInProgress);
        }
        let id = mint_session_id();
        tracing::info!(session = %id, "starting new chat");
        self.identity.adopt(id.clone());
        self.store.reset_for(id);
        self.catalog.refresh(&self.backend).await;
        Outcome::Done
    }

    /// Switches to an existing session and loads its transcript.
    pub async fn select_session(&mut self, id: SessionId) -> Outcome {
        if self.busy {
            return Outcome::Refused(Notice::SendInProgress);
        }
        self.identity.adopt(id.clone());
        self.load_history(id).await;
        Outcome::Done
    }

    /// Sends one user message: optimistic append, then the remote call,
    /// then a catalog refresh. A voice-originated send reads the narrative
    /// part of the reply aloud once it is complete.
    pub async fn send(&mut self, text: &str, origin: MessageOrigin) -> Outcome {
        if self.busy {
            return Outcome::Refused(Notice::SendInProgress);
        }
        let Some(session) = self.store.session().cloned() else {
            tracing::warn!("dropping outbound message: no active session");
            return Outcome::Refused(Notice::NoActiveSession);
        };

        self.store.append_user(text);
        self.busy = true;

        let reply_text = match ChatService::send(&self.backend, text, &session).await {
            Ok(ChatReply::Complete(answer)) => {
                self.store.append_assistant_complete(&answer);
                Some(answer)
            }
            Ok(ChatReply::Streaming(chunks)) => {
                match consume_reply(&mut self.store, chunks).await {
                    StreamOutcome::Completed => self
                        .store
                        .messages()
                        .last()
                        .filter(|m| m.sender == Sender::Assistant)
                        .map(|m| m.text.clone()),
                    StreamOutcome::FailedBeforeOutput | StreamOutcome::Truncated => None,
                }
            }
            Err(e) => {
                tracing::error!("chat request failed: {e:#}");
                self.store.append_assistant_error(SEND_FAILURE_TEXT);
                None
            }
        };

        self.catalog.refresh(&self.backend).await;
        self.busy = false;

        if origin == MessageOrigin::Voice {
            if let Some(reply) = reply_text {
                self.auto_read(&reply).await;
            }
        }
        Outcome::Done
    }

    /// Toggles voice capture. A finished recording goes down the send
    /// pathway exactly as if the transcription had been typed.
    pub async fn toggle_voice_capture(&mut self) -> Outcome {
        if self.busy {
            return Outcome::Refused(Notice::SendInProgress);
        }
        let outcome = self
            .capture
            .toggle(self.microphone.as_mut(), &self.backend)
            .await;
        match outcome {
            CaptureOutcome::Started | CaptureOutcome::Ignored => Outcome::Done,
            CaptureOutcome::Aborted(notice) => Outcome::Refused(notice),
            CaptureOutcome::Transcribed(text) => self.send(&text, MessageOrigin::Voice).await,
        }
    }

    /// Drains microphone chunks while a recording is running.
    pub fn poll_capture(&mut self) {
        self.capture.poll_chunks();
    }

    /// On-demand play/stop of the original-language excerpt of the message
    /// at `index`. Unlike the auto-read, failures here are surfaced.
    pub async fn play_original(&mut self, index: usize) -> Result<Outcome> {
        let Some(message) = self.store.messages().get(index) else {
            anyhow::bail!("no message at index {index}");
        };
        if message.sender != Sender::Assistant {
            return Ok(Outcome::Refused(Notice::NoOriginalText));
        }
        let Some(original) = segment(&message.text).original else {
            return Ok(Outcome::Refused(Notice::NoOriginalText));
        };
        self.playback
            .play(&original, SpeechVoice::Original, &self.backend)
            .await?;
        Ok(Outcome::Done)
    }

    async fn load_history(&mut self, id: SessionId) {
        match self.backend.history(&id).await {
            Ok(messages) => {
                tracing::info!(session = %id, count = messages.len(), "loaded session history");
                self.store.reset_for(id);
                self.store.replace_all(messages);
            }
            Err(e) => {
                tracing::warn!(session = %id, "failed to load session history: {e:#}");
                self.store.reset_for(id);
                self.store.append_assistant_error(HISTORY_LOAD_FAILURE_TEXT);
            }
        }
    }

    /// Reads the narrative answer segment aloud, never the citations or the
    /// original-language excerpt. Failures stay silent for the auto-read.
    async fn auto_read(&mut self, reply: &str) {
        let narrative = segment(reply).answer;
        if narrative.is_empty() {
            return;
        }
        if let Err(e) = self
            .playback
            .play(&narrative, SpeechVoice::Narrative, &self.backend)
            .await
        {
            tracing::warn!("auto-read of the reply failed: {e:#}");
        }
    }
}
