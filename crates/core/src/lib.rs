pub mod api;
pub mod capture;
pub mod catalog;
pub mod conversation;
pub mod engine;
pub mod identity;
pub mod playback;
pub mod segment;
pub mod stream;

/// User-facing notices emitted by the engine and the media controllers.
///
/// A notice never mutates the transcript; it is the engine's way of telling
/// the runtime "show this to the user and carry on". The display strings are
/// the ones the user sees, so they stay in the application's language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Microphone access was denied or no capture device exists.
    MicrophoneUnavailable(String),
    /// Recording stopped without capturing any audio.
    NothingRecorded,
    /// The transcription service failed or returned no text.
    TranscriptionFailed(String),
    /// The selected message carries no original-language block.
    NoOriginalText,
    /// No active session identifier; the message was dropped.
    NoActiveSession,
    /// A transcript-mutating request is already outstanding.
    SendInProgress,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::MicrophoneUnavailable(detail) => {
                write!(f, "Micro indisponible : {detail}")
            }
            Notice::NothingRecorded => {
                write!(f, "Aucun audio n'a été capturé. Veuillez réessayer.")
            }
            Notice::TranscriptionFailed(detail) => {
                write!(f, "La transcription a échoué : {detail}")
            }
            Notice::NoOriginalText => {
                write!(f, "Ce message ne contient pas de texte original.")
            }
            Notice::NoActiveSession => write!(f, "Aucune session active."),
            Notice::SendInProgress => {
                write!(f, "Un message est déjà en cours d'envoi. Veuillez patienter.")
            }
        }
    }
}
