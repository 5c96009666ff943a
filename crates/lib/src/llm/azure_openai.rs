//! Azure OpenAI chat completions client (streaming only).
//!
//! POST {endpoint}/openai/deployments/{deployment}/chat/completions?api-version={v} with
//! `stream: true`; the response is SSE `data:` events ending with `data: [DONE]`.

use crate::config::UpstreamSettings;
use crate::llm::sse::{SseDecoder, SseEvent};
use crate::llm::{ChatMessage, ChunkStream, LlmBackend, LlmError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Client for one Azure OpenAI deployment. Cheap to clone.
#[derive(Clone)]
pub struct AzureOpenAiClient {
    settings: UpstreamSettings,
    client: reqwest::Client,
}

impl AzureOpenAiClient {
    pub fn new(settings: UpstreamSettings) -> Result<Self, LlmError> {
        // request_timeout bounds connect and response headers; body stalls hit the idle timeout
        let client = reqwest::Client::builder()
            .connect_timeout(settings.request_timeout)
            .build()?;
        Ok(Self { settings, client })
    }

    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.settings.endpoint, self.settings.deployment, self.settings.api_version
        )
    }
}

#[async_trait]
impl LlmBackend for AzureOpenAiClient {
    async fn chat_stream(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream, LlmError> {
        let url = self.completions_url();
        let body = ChatRequest {
            model: &self.settings.deployment,
            messages: &messages,
            stream: true,
        };
        let request = self
            .client
            .post(&url)
            .header("api-key", &self.settings.api_key)
            .json(&body)
            .send();
        let res = tokio::time::timeout(self.settings.request_timeout, request)
            .await
            .map_err(|_| LlmError::Timeout(self.settings.request_timeout))??;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }
        let bytes = res.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();
        Ok(fragments(bytes, self.settings.chunk_timeout))
    }
}

struct FragmentState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    idle_timeout: Duration,
    finished: bool,
}

impl FragmentState {
    fn accept(&mut self, ev: SseEvent) {
        if self.finished {
            return;
        }
        match ev {
            SseEvent::Done => self.finished = true,
            SseEvent::Data(data) => match parse_fragment(&data) {
                Ok(Some(text)) => self.pending.push_back(Ok(text)),
                Ok(None) => {}
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                }
            },
        }
    }
}

/// Turn an SSE body into ordered content fragments. The stream stops after `[DONE]`, at the end
/// of the body, or right after yielding the first error.
fn fragments(
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    idle_timeout: Duration,
) -> ChunkStream {
    let state = FragmentState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        idle_timeout,
        finished: false,
    };
    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match tokio::time::timeout(st.idle_timeout, st.body.next()).await {
                Err(_) => {
                    st.finished = true;
                    return Some((Err(LlmError::Timeout(st.idle_timeout)), st));
                }
                Ok(Some(Ok(bytes))) => {
                    for ev in st.decoder.push(&bytes) {
                        st.accept(ev);
                    }
                }
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(LlmError::Request(e)), st));
                }
                Ok(None) => {
                    if let Some(ev) = st.decoder.finish() {
                        st.accept(ev);
                    }
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Content delta of one streamed chunk. `None` for chunks that carry no text (role preamble,
/// content-filter results, finish_reason).
fn parse_fragment(data: &str) -> Result<Option<String>, LlmError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| LlmError::Malformed(e.to_string()))?;
    if let Some(err) = chunk.error {
        return Err(LlmError::Stream(err.to_string()));
    }
    Ok(chunk
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty()))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
