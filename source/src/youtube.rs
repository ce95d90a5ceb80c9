use crate::source::{
    ChatHandle,
    ChatSource,
    RawMessage,
};
use eyre::{
    Context as _,
    OptionExt as _,
    Result,
};
use regex::Regex;
use serde_json::{
    json,
    Value,
};
use std::{
    future::Future,
    pin::Pin,
    time::Duration,
};
use tokio::time::Instant;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const INNERTUBE_BASE: &str = "https://www.youtube.com/youtubei/v1";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Chat source backed by YouTube's InnerTube live-chat endpoint. Creating a
/// handle scrapes the watch page for the API key and the live-chat
/// continuation; polling follows the continuation chain from there.
#[derive(Debug, Clone)]
pub struct YouTubeSource {
    http: reqwest::Client,
}

impl YouTubeSource {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build the youtube http client")?;
        Ok(Self { http })
    }
}

impl ChatSource for YouTubeSource {
    type Handle = YouTubeChatHandle;

    fn create_live_handle<'a>(
        &'a self,
        stream_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Handle>> + Send + 'a>> {
        Box::pin(async move {
            let watch_url = format!("https://www.youtube.com/watch?v={stream_id}");
            let page = self
                .http
                .get(&watch_url)
                .send()
                .await
                .context("failed to fetch the watch page")?
                .error_for_status()
                .context("watch page request was rejected")?
                .text()
                .await
                .context("failed to read the watch page")?;

            let api_key = extract_first(&page, r#""INNERTUBE_API_KEY":"([^"]+)""#)
                .ok_or_eyre("no InnerTube api key in the watch page")?
                .to_string();
            let client_version = extract_first(&page, r#""INNERTUBE_CONTEXT_CLIENT_VERSION":"([^"]+)""#)
                .ok_or_eyre("no InnerTube client version in the watch page")?
                .to_string();
            let continuation = live_chat_continuation(&page)
                .ok_or_else(|| eyre::eyre!("no live chat on the watch page for {stream_id} (stream not live?)"))?;

            debug!(stream_id, "obtained live chat continuation");

            Ok(YouTubeChatHandle {
                http: self.http.clone(),
                api_key,
                client_version,
                continuation: Some(continuation),
                poll_after: None,
            })
        })
    }
}

pub struct YouTubeChatHandle {
    http: reqwest::Client,
    api_key: String,
    client_version: String,
    /// Token for the next `get_live_chat` call. `None` once the stream's
    /// chat has ended or the handle was terminated.
    continuation: Option<String>,
    /// Earliest instant the endpoint wants to be polled again; polls before
    /// it yield an empty batch instead of hitting the API.
    poll_after: Option<Instant>,
}

impl ChatHandle for YouTubeChatHandle {
    fn is_alive(&self) -> bool {
        self.continuation.is_some()
    }

    fn next_batch(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<RawMessage>>> + Send + '_>> {
        Box::pin(async move {
            let continuation = self.continuation.clone().ok_or_eyre("chat handle is terminated")?;

            if let Some(poll_after) = self.poll_after {
                if Instant::now() < poll_after {
                    return Ok(Vec::new());
                }
            }

            let url = format!(
                "{INNERTUBE_BASE}/live_chat/get_live_chat?key={}&prettyPrint=false",
                self.api_key
            );
            let body = json!({
                "context": {
                    "client": {
                        "clientName": "WEB",
                        "clientVersion": self.client_version,
                    },
                },
                "continuation": continuation,
            });

            let response: Value = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .context("get_live_chat request failed")?
                .error_for_status()
                .context("get_live_chat request was rejected")?
                .json()
                .await
                .context("get_live_chat returned malformed json")?;

            let Some(live) = response.pointer("/continuationContents/liveChatContinuation") else {
                // Chat is over; the endpoint stops returning a continuation.
                debug!("live chat ended");
                self.continuation = None;
                return Ok(Vec::new());
            };

            match next_continuation(live) {
                Some((continuation, timeout_millis)) => {
                    self.continuation = Some(continuation);
                    self.poll_after = timeout_millis.map(|millis| Instant::now() + Duration::from_millis(millis));
                }
                None => self.continuation = None,
            }

            let batch = live
                .pointer("/actions")
                .and_then(Value::as_array)
                .map(|actions| actions.as_slice())
                .unwrap_or(&[])
                .iter()
                .filter_map(message_from_action)
                .collect();

            Ok(batch)
        })
    }

    fn terminate(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.continuation = None;
        self.poll_after = None;
        Box::pin(async {})
    }
}

fn extract_first<'t>(page: &'t str, pattern: &str) -> Option<&'t str> {
    let captures = Regex::new(pattern).ok()?.captures(page)?;
    captures.get(1).map(|capture| capture.as_str())
}

/// The watch page embeds one reload continuation per chat subview; the last
/// one is the unfiltered "Live chat" view, which is the live edge we want
/// (the first is the "Top chat" filter).
fn live_chat_continuation(page: &str) -> Option<String> {
    let pattern = Regex::new(r#""reloadContinuationData":\{"continuation":"([^"]+)""#).ok()?;
    pattern
        .captures_iter(page)
        .last()
        .and_then(|captures| captures.get(1))
        .map(|capture| capture.as_str().to_string())
}

fn next_continuation(live: &Value) -> Option<(String, Option<u64>)> {
    let data = live.pointer("/continuations/0")?;
    for kind in [
        "invalidationContinuationData",
        "timedContinuationData",
        "reloadContinuationData",
    ] {
        if let Some(data) = data.get(kind) {
            let continuation = data.get("continuation").and_then(Value::as_str)?.to_string();
            let timeout_millis = data.get("timeoutMs").and_then(Value::as_u64);
            return Some((continuation, timeout_millis));
        }
    }
    None
}

fn message_from_action(action: &Value) -> Option<RawMessage> {
    let item = action.pointer("/addChatItemAction/item")?;
    let renderer = item
        .get("liveChatTextMessageRenderer")
        .or_else(|| item.get("liveChatPaidMessageRenderer"))?;

    let author_name = renderer
        .pointer("/authorName/simpleText")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let author_channel_id = renderer
        .get("authorExternalChannelId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let author_profile_url = author_channel_id
        .as_ref()
        .map(|id| format!("https://www.youtube.com/channel/{id}"));
    let text = renderer
        .pointer("/message/runs")
        .and_then(Value::as_array)
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();

    Some(RawMessage {
        author_name,
        author_channel_id,
        author_profile_url,
        text,
    })
}
