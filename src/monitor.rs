use crate::stats::SessionStats;
use chat_relay_source::{
    ChatSource,
    ConnectionManager,
    Liveness,
};
use collector_client::{
    CollectorClient,
    HeartbeatStatus,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::Mutex,
    time::{
        interval,
        sleep,
        Instant,
    },
};
use tokio_util::sync::CancellationToken;

pub(crate) const STALE_AFTER: Duration = Duration::from_secs(45);
const TICK: Duration = Duration::from_secs(5);
const HEARTBEAT_EVERY: Duration = Duration::from_secs(10);
const RECONNECT_FAILURE_PAUSE: Duration = Duration::from_secs(5);

/// Watchdog running next to the consumption loop for the whole session.
/// Emits periodic heartbeats and forces a reconnect once the chat has been
/// silent past the staleness window. Never processes messages and never
/// touches the participant registry; on reconnect failure it waits and
/// tries again on the next tick, indefinitely.
pub(crate) struct HealthMonitor<S: ChatSource> {
    connection: Arc<Mutex<ConnectionManager<S>>>,
    liveness: Liveness,
    collector: CollectorClient,
    stats: Arc<SessionStats>,
    video_id: String,
}

impl<S: ChatSource> HealthMonitor<S> {
    pub(crate) fn new(
        connection: Arc<Mutex<ConnectionManager<S>>>,
        liveness: Liveness,
        collector: CollectorClient,
        stats: Arc<SessionStats>,
        video_id: String,
    ) -> Self {
        Self {
            connection,
            liveness,
            collector,
            stats,
            video_id,
        }
    }

    pub(crate) async fn run(self, cancel: CancellationToken) {
        let mut tick = interval(TICK);
        let mut last_heartbeat = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            if last_heartbeat.elapsed() >= HEARTBEAT_EVERY {
                self.collector
                    .send_heartbeat(
                        &self.video_id,
                        HeartbeatStatus::Alive,
                        &self.stats.snapshot(),
                        Some(self.stats.participants_found() as usize),
                    )
                    .await;
                last_heartbeat = Instant::now();
            }

            if self.liveness.is_stale(STALE_AFTER) {
                warn!(
                    timeout_secs = STALE_AFTER.as_secs(),
                    "no chat messages within the staleness window, forcing reconnect"
                );

                let mut connection = self.connection.lock().await;
                match connection.force_reconnect().await {
                    Ok(()) => {
                        self.stats.record_reconnect();
                        info!("watchdog reconnect succeeded");
                    }
                    Err(err) => {
                        drop(connection);
                        error!("watchdog reconnect failed, retrying next tick: {err}");
                        sleep(RECONNECT_FAILURE_PAUSE).await;
                    }
                }
            }
        }

        debug!("health monitor stopped");
    }
}
