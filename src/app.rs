use crate::{
    args::Args,
    monitor::HealthMonitor,
    stats::SessionStats,
};
use chat_relay_source::{
    ChatSource,
    ConnectionManager,
    Liveness,
    Participant,
    ParticipantRegistry,
    RawMessage,
    YouTubeSource,
};
use collector_client::{
    CollectorClient,
    HeartbeatStatus,
    ParticipantEntry,
};
use eyre::{
    Context as _,
    Result,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::Mutex,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

const POLL_PAUSE: Duration = Duration::from_millis(200);
const ERROR_PAUSE: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_ERRORS: u32 = 10;
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);
const RECONNECT_FAILED_PAUSE: Duration = Duration::from_secs(10);

/// Supervised run loop tying the chat connection to the collector: polls
/// message batches, registers newly seen participants, and pushes a full
/// snapshot to the collector for every new one. A health monitor task runs
/// alongside and shares the connection through one mutex so the two can
/// never replace the chat handle concurrently.
pub struct App<S: ChatSource> {
    video_id: String,
    connection: Arc<Mutex<ConnectionManager<S>>>,
    liveness: Liveness,
    registry: ParticipantRegistry,
    collector: CollectorClient,
    stats: Arc<SessionStats>,
    cancel: CancellationToken,
}

impl App<YouTubeSource> {
    pub fn new(args: Args) -> Result<Self> {
        Self::with_source(YouTubeSource::new()?, args)
    }
}

impl<S: ChatSource> App<S> {
    pub fn with_source(source: S, args: Args) -> Result<Self> {
        let liveness = Liveness::new();
        let connection = ConnectionManager::new(source, args.video_id.clone(), liveness.clone());
        let collector = CollectorClient::new(args.collector_url)?;

        Ok(Self {
            video_id: args.video_id,
            connection: Arc::new(Mutex::new(connection)),
            liveness,
            registry: ParticipantRegistry::new(),
            collector,
            stats: Arc::new(SessionStats::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Token observed by every long-running task; cancelling it ends the
    /// run within one poll/tick cycle.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    pub async fn run(&mut self) -> Result<()> {
        info!(video_id = %self.video_id, "starting chat relay");

        // Failing to come up at all is fatal; every later connection loss
        // is handled inside the loop or by the watchdog.
        self.connection
            .lock()
            .await
            .connect()
            .await
            .context("failed to establish the initial chat connection")?;

        let monitor = HealthMonitor::new(
            self.connection.clone(),
            self.liveness.clone(),
            self.collector.clone(),
            self.stats.clone(),
            self.video_id.clone(),
        );
        let monitor_task = tokio::spawn(monitor.run(self.cancel.clone()));

        tokio::spawn({
            let cancel = self.cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received");
                    cancel.cancel();
                }
            }
        });

        self.consume().await;

        self.cancel.cancel();
        let _ = monitor_task.await;
        self.shutdown().await;

        Ok(())
    }

    async fn consume(&mut self) {
        let mut consecutive_errors: u32 = 0;

        while !self.cancel.is_cancelled() {
            let polled = {
                let mut connection = self.connection.lock().await;

                if !connection.is_connected() {
                    warn!("chat connection lost, reconnecting");
                    match connection.connect().await {
                        Ok(()) => self.stats.record_reconnect(),
                        Err(err) => {
                            drop(connection);
                            error!("reconnect failed: {err}");
                            self.pause(RECONNECT_PAUSE).await;
                            continue;
                        }
                    }
                }

                connection.poll().await
            };

            match polled {
                Ok(batch) => {
                    consecutive_errors = 0;
                    for message in &batch {
                        self.process_message(message);
                    }
                    self.pause(POLL_PAUSE).await;
                }
                Err(err) => {
                    consecutive_errors += 1;
                    self.stats.record_error();
                    warn!(
                        consecutive_errors,
                        max = MAX_CONSECUTIVE_ERRORS,
                        "error in the consumption loop: {err}"
                    );

                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!("too many consecutive errors, forcing reconnect");
                        self.connection.lock().await.terminate_current().await;
                        self.pause(RECONNECT_PAUSE).await;

                        match self.connection.lock().await.connect().await {
                            Ok(()) => {
                                consecutive_errors = 0;
                                self.stats.record_reconnect();
                            }
                            Err(err) => {
                                error!("unable to reconnect: {err}");
                                self.pause(RECONNECT_FAILED_PAUSE).await;
                            }
                        }
                    }

                    self.pause(ERROR_PAUSE).await;
                }
            }
        }
    }

    fn process_message(&mut self, message: &RawMessage) {
        self.stats.record_message();

        let participant = Participant::from_message(message);
        trace!(author = %participant.display_name, "chat message");

        if self.registry.insert_if_absent(participant.clone()) {
            info!("New participant: {} -> {}", participant.display_name, participant.key);
            self.stats.record_participant();
            self.push_snapshot();
        }
    }

    /// Full-snapshot delivery, spawned so retry pauses never stall the
    /// consumption loop. Updates may overtake each other; each one carries
    /// the complete set, so the collector converges regardless of order.
    fn push_snapshot(&self) {
        let entries: Vec<ParticipantEntry> = self.registry.snapshot().iter().map(wire_entry).collect();
        let collector = self.collector.clone();
        let video_id = self.video_id.clone();

        tokio::spawn(async move {
            collector.send_participants_update(&video_id, &entries).await;
        });
    }

    async fn shutdown(&mut self) {
        self.connection.lock().await.terminate_current().await;

        let stats = self.stats.snapshot();
        info!(
            messages = stats.messages_processed,
            participants = stats.participants_found,
            errors = stats.errors,
            reconnects = stats.reconnects,
            "final session statistics"
        );

        self.collector
            .send_heartbeat(
                &self.video_id,
                HeartbeatStatus::Terminated,
                &stats,
                Some(self.registry.len()),
            )
            .await;

        info!("chat relay stopped");
    }

    /// Sleep that wakes early on cancellation so shutdown is prompt.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }
}

fn wire_entry(participant: &Participant) -> ParticipantEntry {
    ParticipantEntry {
        name: participant.display_name.clone(),
        id: participant.key.clone(),
        url: participant.profile_url.clone(),
        first_seen: participant.first_seen,
    }
}
