use crate::conversation::ConversationStore;
use futures_util::{Stream, StreamExt};

/// Synthetic assistant text appended when a send fails before any reply
/// content arrived.
pub const SEND_FAILURE_TEXT: &str =
    "Désolé, une erreur est survenue. Veuillez réessayer plus tard.";

/// How a streamed reply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The source signalled completion; the message text is final.
    Completed,
    /// Transport failed before any chunk arrived; a synthetic assistant
    /// error message was appended instead.
    FailedBeforeOutput,
    /// Transport failed mid-stream; the partial text stands as-is and no
    /// synthetic error is appended.
    Truncated,
}

/// Drives the store's streaming-append path from an ordered chunk source.
///
/// The slot is created on first chunk arrival, every decoded chunk is
/// appended through the handle, and the handle is finalized when the source
/// ends, whether normally or by a mid-stream failure. Chunk boundaries are
/// arbitrary: splits mid-multibyte-character are buffered by the decoder
/// rather than corrupted.
pub async fn consume_reply<S, E>(store: &mut ConversationStore, mut chunks: S) -> StreamOutcome
where
    S: Stream<Item = Result<Vec<u8>, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut decoder = Utf8ChunkDecoder::default();
    let mut handle = None;

    while let Some(item) = chunks.next().await {
        match item {
            Ok(bytes) => {
                let text = decoder.push(&bytes);
                let h = *handle.get_or_insert_with(|| store.begin_assistant_stream());
                if !text.is_empty() {
                    store.append_chunk(h, &text);
                }
            }
            Err(e) => {
                return match handle {
                    None => {
                        tracing::error!("chat stream failed before any reply content: {e}");
                        store.append_assistant_error(SEND_FAILURE_TEXT);
                        StreamOutcome::FailedBeforeOutput
                    }
                    Some(h) => {
                        tracing::warn!("chat stream interrupted, keeping partial reply: {e}");
                        store.finish_stream(h);
                        StreamOutcome::Truncated
                    }
                };
            }
        }
    }

    if let Some(h) = handle {
        let tail = decoder.finish();
        if !tail.is_empty() {
            store.append_chunk(h, &tail);
        }
        store.finish_stream(h);
    }
    StreamOutcome::Completed
}

/// Incremental UTF-8 decoder tolerating arbitrary chunk boundaries.
///
/// An incomplete multibyte sequence at the end of a chunk is buffered until
/// the next chunk arrives; genuinely invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Feeds one chunk and returns every completely decodable character.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut buf = std::mem::take(&mut self.pending);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&buf) {
                Ok(valid) => {
                    out.push_str(valid);
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&buf[..valid_up_to]).unwrap_or_default());
                    match e.error_len() {
                        // Possibly the prefix of a multibyte character split
                        // across chunks: keep it for the next push.
                        None => {
                            self.pending = buf.split_off(valid_up_to);
                            return out;
                        }
                        Some(invalid_len) => {
                            out.push('\u{FFFD}');
                            buf.drain(..valid_up_to + invalid_len);
                        }
                    }
                }
            }
        }
    }

    /// Flushes the decoder at end of stream. Leftover bytes can only be an
    /// unfinished multibyte sequence and decode to a single U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            "\u{FFFD}".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Sender;
    use crate::identity::mint_session_id;
    use futures_util::stream;

    fn store_with_session() -> ConversationStore {
        let mut store = ConversationStore::new();
        store.reset_for(mint_session_id());
        store
    }

    fn ok_chunks(parts: Vec<&[u8]>) -> impl Stream<Item = Result<Vec<u8>, String>> + Unpin {
        stream::iter(parts.into_iter().map(|p| Ok(p.to_vec())).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn chunks_concatenate_into_one_assistant_message() {
        let mut store = store_with_session();
        let outcome = consume_reply(
            &mut store,
            ok_chunks(vec![b"La ", b"priere ", b"du soir"]),
        )
        .await;

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].sender, Sender::Assistant);
        assert_eq!(store.messages()[0].text, "La priere du soir");
    }

    #[tokio::test]
    async fn multibyte_characters_survive_arbitrary_chunk_splits() {
        // "نص" in UTF-8 is d9 86 d8 b5; split inside both characters.
        let bytes = "A نص B".as_bytes();
        let mut store = store_with_session();
        let parts: Vec<&[u8]> = vec![&bytes[..3], &bytes[3..4], &bytes[4..7], &bytes[7..]];
        let outcome = consume_reply(&mut store, ok_chunks(parts)).await;

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(store.messages()[0].text, "A نص B");
    }

    #[tokio::test]
    async fn failure_before_any_chunk_appends_the_error_notice() {
        let mut store = store_with_session();
        let chunks = stream::iter(vec![Err::<Vec<u8>, String>("boom".into())]);
        let outcome = consume_reply(&mut store, chunks).await;

        assert_eq!(outcome, StreamOutcome::FailedBeforeOutput);
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].text, SEND_FAILURE_TEXT);
    }

    #[tokio::test]
    async fn failure_mid_stream_keeps_the_partial_text() {
        let mut store = store_with_session();
        let chunks = stream::iter(vec![
            Ok::<Vec<u8>, String>(b"partial answ".to_vec()),
            Err("connection reset".into()),
        ]);
        let outcome = consume_reply(&mut store, chunks).await;

        assert_eq!(outcome, StreamOutcome::Truncated);
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].text, "partial answ");
    }

    #[tokio::test]
    async fn an_empty_stream_touches_nothing() {
        let mut store = store_with_session();
        let outcome = consume_reply(&mut store, ok_chunks(vec![])).await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert!(store.messages().is_empty());
    }

    #[test]
    fn decoder_replaces_invalid_bytes_without_losing_the_rest() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.push(b"ok \xff still ok"), "ok \u{FFFD} still ok");
    }

    #[test]
    fn decoder_flushes_a_trailing_incomplete_sequence() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.push(&[0xd9]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }
}
