use crate::source::{
    ChatHandle as _,
    ChatSource,
    RawMessage,
};
use chrono::Utc;
use eyre::{
    OptionExt as _,
    Result,
};
use std::{
    sync::{
        atomic::{
            AtomicI64,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Timestamp of the last received chat message, shared between the
/// consumption loop (writer) and the health monitor (reader).
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicI64>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(Utc::now().timestamp_millis())))
    }

    pub fn touch(&self) {
        self.0.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_millis(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Whether no message has been seen for longer than `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        is_stale_at(Utc::now().timestamp_millis(), self.last_millis(), timeout)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

fn is_stale_at(now_millis: i64, last_millis: i64, timeout: Duration) -> bool {
    now_millis - last_millis > timeout.as_millis() as i64
}

/// Owns the one active chat handle for a stream and its lifecycle:
/// connect with backoff, poll, terminate, forced reconnect. Callers that
/// share a manager across tasks must put it behind a single lock so the
/// handle is never replaced from two places at once.
pub struct ConnectionManager<S: ChatSource> {
    source: S,
    stream_id: String,
    handle: Option<S::Handle>,
    liveness: Liveness,
}

impl<S: ChatSource> ConnectionManager<S> {
    pub fn new(source: S, stream_id: String, liveness: Liveness) -> Self {
        Self {
            source,
            stream_id,
            handle: None,
            liveness,
        }
    }

    /// Dial the chat, retrying with exponential backoff (2s, 4s, 8s, 16s,
    /// 32s) before giving up. A handle that is obtained but reports dead
    /// counts as a failed attempt. The previous handle, if any, is released
    /// first.
    pub async fn connect(&mut self) -> Result<()> {
        self.terminate_current().await;

        let mut retry_delay = CONNECT_BASE_DELAY;
        for attempt in 1..=CONNECT_ATTEMPTS {
            info!(attempt, max = CONNECT_ATTEMPTS, stream_id = %self.stream_id, "connecting to chat");

            match self.source.create_live_handle(&self.stream_id).await {
                Ok(handle) if handle.is_alive() => {
                    info!(stream_id = %self.stream_id, "connected to live chat");
                    self.liveness.touch();
                    self.handle = Some(handle);
                    return Ok(());
                }
                Ok(_) => warn!(attempt, "obtained a chat handle but it is not alive"),
                Err(err) => warn!(attempt, "connection attempt failed: {err}"),
            }

            tokio::time::sleep(retry_delay).await;
            retry_delay *= 2;
        }

        Err(eyre::eyre!(
            "exhausted {CONNECT_ATTEMPTS} connection attempts for stream {}",
            self.stream_id
        ))
    }

    /// Next batch from the current handle. Errors if no connection is
    /// established; transport errors propagate so the caller can count them.
    pub async fn poll(&mut self) -> Result<Vec<RawMessage>> {
        let handle = self.handle.as_mut().ok_or_eyre("no active chat connection")?;
        let batch = handle.next_batch().await?;
        if !batch.is_empty() {
            self.liveness.touch();
        }
        Ok(batch)
    }

    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| handle.is_alive())
    }

    /// Release the active handle. Idempotent; safe with no handle present.
    pub async fn terminate_current(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.terminate().await;
            debug!(stream_id = %self.stream_id, "terminated chat handle");
        }
    }

    /// Terminate-then-connect cycle used by the watchdog and by the error
    /// escalation in the consumption loop.
    pub async fn force_reconnect(&mut self) -> Result<()> {
        self.terminate_current().await;
        self.connect().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::ChatHandle;
    use pretty_assertions::assert_eq;
    use std::{
        collections::VecDeque,
        future::Future,
        pin::Pin,
        sync::{
            atomic::AtomicUsize,
            Mutex,
        },
    };

    struct ScriptedHandle {
        batches: VecDeque<Result<Vec<RawMessage>>>,
        alive: bool,
        terminations: Arc<AtomicUsize>,
    }

    impl ScriptedHandle {
        fn alive(batches: Vec<Result<Vec<RawMessage>>>, terminations: Arc<AtomicUsize>) -> Self {
            Self {
                batches: batches.into(),
                alive: true,
                terminations,
            }
        }
    }

    impl ChatHandle for ScriptedHandle {
        fn is_alive(&self) -> bool {
            self.alive
        }

        fn next_batch(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<RawMessage>>> + Send + '_>> {
            let next = self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()));
            Box::pin(async move { next })
        }

        fn terminate(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            self.alive = false;
            self.terminations.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    /// Hands out pre-scripted handles, one per connect attempt.
    struct ScriptedSource {
        handles: Mutex<VecDeque<ScriptedHandle>>,
        attempts: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(handles: Vec<ScriptedHandle>) -> Self {
            Self {
                handles: Mutex::new(handles.into()),
                attempts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ChatSource for ScriptedSource {
        type Handle = ScriptedHandle;

        fn create_live_handle<'a>(
            &'a self,
            _stream_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Self::Handle>> + Send + 'a>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.handles.lock().unwrap().pop_front();
            Box::pin(async move { next.ok_or_else(|| eyre::eyre!("stream offline")) })
        }
    }

    fn message(name: &str) -> RawMessage {
        RawMessage {
            author_name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_backs_off_exponentially_then_fails() {
        let source = ScriptedSource::new(Vec::new());
        let attempts = source.attempts.clone();
        let mut manager = ConnectionManager::new(source, "dQw4w9WgXcQ".to_string(), Liveness::new());

        let started = tokio::time::Instant::now();
        let result = manager.connect().await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(2 + 4 + 8 + 16 + 32));
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_handle_counts_as_a_failed_attempt() {
        let terminations = Arc::new(AtomicUsize::new(0));
        let mut handle = ScriptedHandle::alive(Vec::new(), terminations);
        handle.alive = false;
        let source = ScriptedSource::new(vec![handle]);
        let attempts = source.attempts.clone();
        let mut manager = ConnectionManager::new(source, "stream".to_string(), Liveness::new());

        assert!(manager.connect().await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn poll_updates_liveness_only_for_non_empty_batches() {
        let terminations = Arc::new(AtomicUsize::new(0));
        let handle = ScriptedHandle::alive(
            vec![Ok(Vec::new()), Ok(vec![message("Alice")])],
            terminations,
        );
        let source = ScriptedSource::new(vec![handle]);
        let liveness = Liveness::new();
        let mut manager = ConnectionManager::new(source, "stream".to_string(), liveness.clone());
        manager.connect().await.unwrap();

        // Rewind so a touch is observable regardless of wall-clock resolution.
        liveness.0.store(0, Ordering::Relaxed);

        assert_eq!(manager.poll().await.unwrap(), Vec::new());
        assert_eq!(liveness.last_millis(), 0);

        assert_eq!(manager.poll().await.unwrap().len(), 1);
        assert!(liveness.last_millis() > 0);
    }

    #[tokio::test]
    async fn poll_without_a_connection_errors() {
        let source = ScriptedSource::new(Vec::new());
        let mut manager = ConnectionManager::new(source, "stream".to_string(), Liveness::new());
        assert!(manager.poll().await.is_err());
    }

    #[tokio::test]
    async fn terminate_current_is_idempotent() {
        let terminations = Arc::new(AtomicUsize::new(0));
        let handle = ScriptedHandle::alive(Vec::new(), terminations.clone());
        let source = ScriptedSource::new(vec![handle]);
        let mut manager = ConnectionManager::new(source, "stream".to_string(), Liveness::new());
        manager.connect().await.unwrap();

        manager.terminate_current().await;
        manager.terminate_current().await;

        assert_eq!(terminations.load(Ordering::SeqCst), 1);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn force_reconnect_replaces_the_handle() {
        let terminations = Arc::new(AtomicUsize::new(0));
        let first = ScriptedHandle::alive(Vec::new(), terminations.clone());
        let second = ScriptedHandle::alive(vec![Ok(vec![message("Bob")])], terminations.clone());
        let source = ScriptedSource::new(vec![first, second]);
        let mut manager = ConnectionManager::new(source, "stream".to_string(), Liveness::new());
        manager.connect().await.unwrap();

        manager.force_reconnect().await.unwrap();

        assert_eq!(terminations.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected());
        assert_eq!(manager.poll().await.unwrap().len(), 1);
    }

    #[test]
    fn staleness_boundary() {
        let t0 = 1_700_000_000_000_i64;
        let timeout = Duration::from_secs(45);
        assert!(!is_stale_at(t0 + 44_000, t0, timeout));
        assert!(is_stale_at(t0 + 46_000, t0, timeout));
    }
}
