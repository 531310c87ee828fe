//! Trait seams for the remote collaborators and the single HTTP
//! implementation backing all of them.
//!
//! The traits exist so the engine and the media controllers can be exercised
//! against mocks without a network; `HttpBackend` is the production
//! implementation speaking to the backend service.

use crate::capture::RecordedAudio;
use crate::conversation::{Message, Sender};
use crate::identity::SessionId;
use crate::playback::SpeechVoice;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, TryStreamExt};
use hound::{SampleFormat, WavSpec, WavWriter};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::io::Cursor;
use std::pin::Pin;

/// Ordered byte chunks of a streamed reply body.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, anyhow::Error>> + Send>>;

/// A chat reply is either one complete JSON answer or a chunked text body
/// whose concatenation is the answer.
pub enum ChatReply {
    Complete(String),
    Streaming(ChunkStream),
}

/// Read-only projection of one known session, for display and selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send(&self, message: &str, session: &SessionId) -> Result<ChatReply>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn list(&self) -> Result<Vec<SessionSummary>>;
    async fn history(&self, session: &SessionId) -> Result<Vec<Message>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Uploads one recorded audio payload and returns its transcription.
    async fn transcribe(&self, audio: RecordedAudio) -> Result<String>;
    /// Synthesizes `text` with the given voice and returns the audio bytes.
    async fn synthesize(&self, text: &str, voice: SpeechVoice) -> Result<Vec<u8>>;
}

#[derive(Deserialize)]
struct ChatAnswer {
    answer: String,
}

#[derive(Deserialize)]
struct WireMessage {
    message: String,
    sender: String,
}

#[derive(Deserialize)]
struct Transcription {
    transcription: String,
}

/// Maps the wire sender vocabulary onto ours: `"human"` is the user,
/// anything else is the assistant.
fn map_sender(wire: &str) -> Sender {
    if wire == "human" {
        Sender::User
    } else {
        Sender::Assistant
    }
}

/// Reqwest-backed client for the chat, session and voice endpoints.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ChatService for HttpBackend {
    async fn send(&self, message: &str, session: &SessionId) -> Result<ChatReply> {
        let response = self
            .client
            .post(self.url("/api/message"))
            .json(&serde_json::json!({
                "message": message,
                "session_id": session.as_str(),
            }))
            .send()
            .await
            .context("chat request failed")?
            .error_for_status()
            .context("chat request rejected by the backend")?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let body: ChatAnswer = response
                .json()
                .await
                .context("failed to decode the chat answer")?;
            Ok(ChatReply::Complete(body.answer))
        } else {
            let chunks = response
                .bytes_stream()
                .map_ok(|bytes| bytes.to_vec())
                .map_err(anyhow::Error::from);
            Ok(ChatReply::Streaming(Box::pin(chunks)))
        }
    }
}

#[async_trait]
impl SessionDirectory for HttpBackend {
    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let sessions = self
            .client
            .get(self.url("/api/sessions"))
            .send()
            .await
            .context("session list request failed")?
            .error_for_status()
            .context("session list request rejected")?
            .json()
            .await
            .context("failed to decode the session list")?;
        Ok(sessions)
    }

    async fn history(&self, session: &SessionId) -> Result<Vec<Message>> {
        let wire: Vec<WireMessage> = self
            .client
            .get(self.url(&format!("/api/sessions/{session}")))
            .send()
            .await
            .context("session history request failed")?
            .error_for_status()
            .context("session history request rejected")?
            .json()
            .await
            .context("failed to decode the session history")?;

        Ok(wire
            .into_iter()
            .map(|m| Message {
                text: m.message,
                sender: map_sender(&m.sender),
            })
            .collect())
    }
}

#[async_trait]
impl VoiceGateway for HttpBackend {
    async fn transcribe(&self, audio: RecordedAudio) -> Result<String> {
        let wav = pcm16_to_wav(&audio)?;
        let part = Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .context("failed to build the audio upload part")?;
        let form = Form::new().part("file", part);

        let body: Transcription = self
            .client
            .post(self.url("/api/v1/voice/transcribe"))
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?
            .error_for_status()
            .context("transcription request rejected")?
            .json()
            .await
            .context("failed to decode the transcription")?;
        Ok(body.transcription)
    }

    async fn synthesize(&self, text: &str, voice: SpeechVoice) -> Result<Vec<u8>> {
        let path = match voice {
            SpeechVoice::Narrative => "/api/v1/voice/synthesize",
            SpeechVoice::Original => "/api/v1/voice/synthesize_arabic",
        };
        let bytes = self
            .client
            .post(self.url(path))
            .query(&[("text", text)])
            .send()
            .await
            .context("speech synthesis request failed")?
            .error_for_status()
            .context("speech synthesis request rejected")?
            .bytes()
            .await
            .context("failed to read the synthesized audio")?;
        Ok(bytes.to_vec())
    }
}

/// Wraps raw little-endian PCM16 samples into a mono WAV container for the
/// multipart upload.
fn pcm16_to_wav(audio: &RecordedAudio) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut buffer, spec).context("failed to create the WAV writer")?;
        for chunk in audio.pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                .context("failed to write a WAV sample")?;
        }
        writer.finalize().context("failed to finalize the WAV")?;
    }
    Ok(buffer.into_inner())
}
