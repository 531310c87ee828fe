use crate::identity::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

/// One transcript entry. The text of an in-flight streamed assistant message
/// grows append-only; once its stream is finished the message is immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Assistant,
        }
    }
}

/// Handle for one in-flight streamed assistant reply.
///
/// The handle is the only valid target for chunk appends, rather than
/// whatever message happens to be last in the transcript. A stale handle
/// (stream finished, or transcript replaced) makes appends a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle {
    slot: usize,
    stream_id: u64,
}

/// Ordered transcript of messages, scoped to exactly one session at a time.
///
/// Transcript order is exactly call order; a streaming assistant message
/// occupies a single slot from creation to stream end.
pub struct ConversationStore {
    session: Option<SessionId>,
    messages: Vec<Message>,
    open_stream: Option<StreamHandle>,
    next_stream_id: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            session: None,
            messages: Vec::new(),
            open_stream: None,
            next_stream_id: 0,
        }
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Clears the transcript and binds it to a new session. Switching
    /// sessions always replaces the transcript wholesale, never merges.
    pub fn reset_for(&mut self, session: SessionId) {
        self.session = Some(session);
        self.messages.clear();
        self.open_stream = None;
    }

    /// Replaces the whole transcript, e.g. with a fetched session history.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.open_stream = None;
    }

    /// Pushes a user message. Silent no-op when no session id is bound.
    pub fn append_user(&mut self, text: &str) {
        if self.session.is_none() {
            tracing::warn!("dropping user message: no active session id");
            return;
        }
        self.messages.push(Message::user(text));
    }

    /// Pushes one finished assistant message (non-streamed replies).
    pub fn append_assistant_complete(&mut self, text: &str) {
        self.messages.push(Message::assistant(text));
    }

    /// Pushes a terminal assistant message carrying a user-facing failure
    /// notice. Used when the remote call fails outright, not for mid-stream
    /// errors.
    pub fn append_assistant_error(&mut self, text: &str) {
        self.messages.push(Message::assistant(text));
    }

    /// Pushes a placeholder assistant message with empty text and returns the
    /// handle that chunk appends must present.
    pub fn begin_assistant_stream(&mut self) -> StreamHandle {
        self.messages.push(Message::assistant(""));
        let handle = StreamHandle {
            slot: self.messages.len() - 1,
            stream_id: self.next_stream_id,
        };
        self.next_stream_id += 1;
        self.open_stream = Some(handle);
        handle
    }

    /// Appends `chunk` to the message the handle was minted for. A handle
    /// that is no longer the open stream is ignored, so a user message
    /// appended mid-stream can never receive assistant chunks.
    pub fn append_chunk(&mut self, handle: StreamHandle, chunk: &str) {
        if self.open_stream != Some(handle) {
            tracing::warn!("ignoring chunk for a closed or stale stream handle");
            return;
        }
        self.messages[handle.slot].text.push_str(chunk);
    }

    /// Ends the stream; the message becomes immutable.
    pub fn finish_stream(&mut self, handle: StreamHandle) {
        if self.open_stream == Some(handle) {
            self.open_stream = None;
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::mint_session_id;

    fn store_with_session() -> ConversationStore {
        let mut store = ConversationStore::new();
        store.reset_for(mint_session_id());
        store
    }

    #[test]
    fn transcript_order_equals_call_order() {
        let mut store = store_with_session();
        store.append_user("salam");
        store.append_assistant_complete("wa alaykum");
        store.append_user("question");
        store.append_assistant_complete("answer");

        let texts: Vec<&str> = store.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["salam", "wa alaykum", "question", "answer"]);
        assert_eq!(store.messages()[0].sender, Sender::User);
        assert_eq!(store.messages()[1].sender, Sender::Assistant);
    }

    #[test]
    fn append_user_without_session_is_a_no_op() {
        let mut store = ConversationStore::new();
        store.append_user("lost");
        assert!(store.messages().is_empty());
    }

    #[test]
    fn streamed_chunks_accumulate_in_one_slot() {
        let mut store = store_with_session();
        let handle = store.begin_assistant_stream();
        store.append_chunk(handle, "Bismi");
        store.append_chunk(handle, "llah");
        store.finish_stream(handle);

        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].text, "Bismillah");
        assert_eq!(store.messages()[0].sender, Sender::Assistant);
    }

    #[test]
    fn chunks_still_reach_their_slot_after_a_user_append() {
        let mut store = store_with_session();
        let handle = store.begin_assistant_stream();
        store.append_chunk(handle, "partial");
        store.append_user("impatient follow-up");
        store.append_chunk(handle, " reply");

        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.messages()[0].text, "partial reply");
        assert_eq!(store.messages()[1].text, "impatient follow-up");
    }

    #[test]
    fn a_finished_handle_no_longer_accepts_chunks() {
        let mut store = store_with_session();
        let handle = store.begin_assistant_stream();
        store.append_chunk(handle, "done");
        store.finish_stream(handle);
        store.append_chunk(handle, " and more");
        assert_eq!(store.messages()[0].text, "done");
    }

    #[test]
    fn replacing_the_transcript_invalidates_the_open_stream() {
        let mut store = store_with_session();
        let handle = store.begin_assistant_stream();
        store.reset_for(mint_session_id());
        store.append_user("fresh start");
        store.append_chunk(handle, "ghost chunk");

        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].text, "fresh start");
    }

    #[test]
    fn a_new_stream_does_not_revive_an_old_handle() {
        let mut store = store_with_session();
        let first = store.begin_assistant_stream();
        store.finish_stream(first);
        let second = store.begin_assistant_stream();
        store.append_chunk(first, "stale");
        store.append_chunk(second, "live");

        assert_eq!(store.messages()[0].text, "");
        assert_eq!(store.messages()[1].text, "live");
    }
}
