use eyre::Result;
use std::{
    future::Future,
    pin::Pin,
};

/// One message as it arrives from the chat transport. Only the author fields
/// matter for participant tracking; `text` is kept for trace logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub author_name: String,
    /// Stable channel identifier of the author. Absent for some message
    /// types (e.g. anonymous or membership-gifted authors).
    pub author_channel_id: Option<String>,
    pub author_profile_url: Option<String>,
    pub text: String,
}

/// A live connection to the chat of one stream.
pub trait ChatHandle: Send + 'static {
    /// Whether the transport still expects more messages on this handle.
    fn is_alive(&self) -> bool;

    /// Next batch of messages, possibly empty. Must return promptly; a
    /// silent chat surfaces as empty batches, never as a hang.
    fn next_batch(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<RawMessage>>> + Send + '_>>;

    /// Release the handle. Best-effort: implementations swallow transport
    /// errors, and calling this more than once is fine.
    fn terminate(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Factory for chat connections positioned at the live edge of a stream.
pub trait ChatSource: Send + Sync + 'static {
    type Handle: ChatHandle;

    fn create_live_handle<'a>(
        &'a self,
        stream_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Handle>> + Send + 'a>>;
}
