//! Thin client for the collector service consuming participant snapshots
//! and liveness heartbeats. Both operations are deliberately infallible at
//! the call site: participant updates retry a few times and then log the
//! loss, heartbeats are single-shot best-effort.

#[macro_use]
extern crate tracing;

use chrono::{
    DateTime,
    Utc,
};
use eyre::{
    Context as _,
    Result,
};
use serde::Serialize;
use std::time::Duration;
use url::Url;

const UPDATE_ATTEMPTS: u32 = 3;
const UPDATE_RETRY_PAUSE: Duration = Duration::from_millis(500);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(5);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// One participant as the collector expects it on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantEntry {
    pub name: String,
    pub id: String,
    pub url: String,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantsUpdate<'a> {
    video_id: &'a str,
    participants: &'a [ParticipantEntry],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HeartbeatStatus {
    Alive,
    Terminated,
}

/// Counters reported with every heartbeat and in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub start_time: DateTime<Utc>,
    pub messages_processed: u64,
    pub participants_found: u64,
    pub errors: u64,
    pub reconnects: u64,
}

#[derive(Debug, Serialize)]
struct Heartbeat<'a> {
    #[serde(rename = "videoId")]
    video_id: &'a str,
    status: HeartbeatStatus,
    stats: &'a StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    participants_count: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CollectorClient {
    participants_url: Url,
    heartbeat_url: Url,
    http: reqwest::Client,
}

impl CollectorClient {
    pub fn new(base_url: Url) -> Result<Self> {
        let participants_url = base_url
            .join("/api/chat-participants")
            .context("invalid collector base url")?;
        let heartbeat_url = base_url
            .join("/api/chat-heartbeat")
            .context("invalid collector base url")?;
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build the collector http client")?;

        Ok(Self {
            participants_url,
            heartbeat_url,
            http,
        })
    }

    /// POST the full participant snapshot. Retries transport failures and
    /// non-2xx responses a few times with a short pause; exhaustion is
    /// logged and reported as `false`, never raised — a lost update is
    /// repaired by the next one, since every payload carries the full set.
    pub async fn send_participants_update(&self, video_id: &str, participants: &[ParticipantEntry]) -> bool {
        let payload = ParticipantsUpdate {
            video_id,
            participants,
        };

        for attempt in 1..=UPDATE_ATTEMPTS {
            let request = self
                .http
                .post(self.participants_url.clone())
                .timeout(UPDATE_TIMEOUT)
                .json(&payload);

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(count = participants.len(), "delivered participant snapshot");
                    return true;
                }
                Ok(response) => {
                    warn!(attempt, status = %response.status(), "collector rejected the participant update");
                }
                Err(err) => warn!(attempt, "participant update failed: {err}"),
            }

            if attempt < UPDATE_ATTEMPTS {
                tokio::time::sleep(UPDATE_RETRY_PAUSE).await;
            }
        }

        error!(video_id, "failed to deliver a participant update after {UPDATE_ATTEMPTS} attempts");
        false
    }

    /// POST a liveness heartbeat. Single attempt, short timeout, failures
    /// swallowed: heartbeats must never add latency or noise to the caller.
    pub async fn send_heartbeat(
        &self,
        video_id: &str,
        status: HeartbeatStatus,
        stats: &StatsSnapshot,
        participants_count: Option<usize>,
    ) {
        let payload = Heartbeat {
            video_id,
            status,
            stats,
            participants_count,
        };

        let request = self
            .http
            .post(self.heartbeat_url.clone())
            .timeout(HEARTBEAT_TIMEOUT)
            .json(&payload);

        match request.send().await {
            Ok(response) if response.status().is_success() => trace!(%status, "heartbeat delivered"),
            Ok(response) => trace!(status = %response.status(), "collector refused the heartbeat"),
            Err(err) => trace!("heartbeat failed: {err}"),
        }
    }
}
