use clap::Parser;

/// Live-chat participant relay.
///
/// Tails the live chat of a stream and pushes every newly seen participant
/// to the collector, reconnecting on its own when the chat goes quiet or
/// the connection drops.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// ID of the live stream whose chat should be tailed.
    pub video_id: String,

    /// Base URL of the collector receiving participant updates and heartbeats.
    #[arg(env = "CHAT_COLLECTOR_URL", default_value = "http://localhost:3001")]
    pub collector_url: url::Url,
}
