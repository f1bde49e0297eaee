use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{sort_by_size, ChatRequest, FragmentStream, ModelClient, ModelInfo, NdjsonDecoder};
use crate::error::{ChatError, Result};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Deserialize)]
struct ChatChunkMessage {
    #[serde(default)]
    content: String,
}

/// One line of a streamed `/api/chat` response
#[derive(Deserialize)]
struct ChatChunk {
    message: Option<ChatChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<ModelInfo>,
}

/// What one decoded line contributes to the fragment stream
enum LineOutcome {
    Fragment(String),
    /// Last fragment; anything after it is ignored
    Final(String),
    Skip,
    Done,
}

fn decode_line(line: &str) -> Result<LineOutcome> {
    let chunk: ChatChunk = serde_json::from_str(line)?;
    if let Some(error) = chunk.error {
        return Err(ChatError::Model(error));
    }
    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    Ok(match (content.is_empty(), chunk.done) {
        (false, false) => LineOutcome::Fragment(content),
        (false, true) => LineOutcome::Final(content),
        (true, true) => LineOutcome::Done,
        (true, false) => LineOutcome::Skip,
    })
}

/// Turn a body of NDJSON chunks into content fragments.
///
/// The stream ends after the `done` line, the first error line or the first
/// transport error. A trailing line without a newline is still decoded.
fn fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    let state = (Box::pin(body), NdjsonDecoder::new(), VecDeque::new(), false);

    futures_util::stream::unfold(
        state,
        |(mut body, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (body, decoder, pending, done)));
                }
                if done {
                    return None;
                }

                let lines = match body.next().await {
                    Some(Ok(chunk)) => decoder.push(chunk.as_ref()),
                    Some(Err(e)) => {
                        done = true;
                        pending.push_back(Err(e.into()));
                        continue;
                    }
                    None => {
                        done = true;
                        decoder.finish().into_iter().collect()
                    }
                };

                for line in lines {
                    match decode_line(&line) {
                        Ok(LineOutcome::Fragment(text)) => pending.push_back(Ok(text)),
                        Ok(LineOutcome::Skip) => {}
                        Ok(LineOutcome::Final(text)) => {
                            pending.push_back(Ok(text));
                            done = true;
                            break;
                        }
                        Ok(LineOutcome::Done) => {
                            done = true;
                            break;
                        }
                        Err(e) => {
                            done = true;
                            pending.push_back(Err(e));
                            break;
                        }
                    }
                }
            }
        },
    )
    .boxed()
}

/// Accept `host:port`, `http://host:port` or with a trailing slash
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_OLLAMA_URL.to_string()
    } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, model = %request.model, messages = request.messages.len(), "chat request");

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(fragments(response.bytes_stream()))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let mut models = response.json::<OllamaModelsResponse>().await?.models;
        sort_by_size(&mut models);
        Ok(models)
    }
}
