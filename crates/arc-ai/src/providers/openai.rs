//! OpenAI-compatible Chat Completions streaming client

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Error, Result},
    providers::{CompletionClient, DeltaStream},
    types::Turn,
};

/// Default idle window between stream events
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Full URL of the chat completions endpoint
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub idle_timeout: Duration,
}

/// Streaming client for any endpoint speaking the OpenAI chat completions
/// wire format
pub struct OpenAICompatProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl OpenAICompatProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            return Err(Error::InvalidConfig("api_url is empty".into()));
        }
        if config.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model is empty".into()));
        }
        if config.api_key.is_empty() {
            return Err(Error::InvalidApiKey);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_request(&self, turns: &[Turn]) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: turns
                .iter()
                .map(|t| ChatMessage {
                    role: t.role.as_str(),
                    content: t.content.clone(),
                })
                .collect(),
            stream: true,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatProvider {
    async fn stream(&self, turns: &[Turn]) -> Result<DeltaStream> {
        let request = self.build_request(turns);
        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            "Starting completion stream"
        );

        let request_builder = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .header("content-type", "application/json")
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(
            event_source,
            self.config.idle_timeout,
        )))
    }
}

fn create_stream(
    mut event_source: EventSource,
    idle_timeout: Duration,
) -> impl futures::Stream<Item = Result<String>> {
    stream! {
        loop {
            let event = match tokio::time::timeout(idle_timeout, event_source.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    event_source.close();
                    yield Err(Error::Timeout(idle_timeout));
                    return;
                }
            };

            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match parse_delta(&msg.data) {
                        Ok(Some(delta)) => yield Ok(delta),
                        Ok(None) => {}
                        Err(e) => {
                            debug!(error = %e, data = %msg.data, "Skipping unparsable stream chunk");
                        }
                    }
                }
                // The server closed the connection; without this the event
                // source would reconnect and replay the request.
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    yield Err(Error::transport(status.as_u16(), body));
                    return;
                }
                Err(reqwest_eventsource::Error::Transport(e)) => {
                    event_source.close();
                    yield Err(Error::Http(e));
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield Err(Error::Sse(e.to_string()));
                    return;
                }
            }
        }

        event_source.close();
    }
}

/// Extract the content delta from one SSE data payload
fn parse_delta(data: &str) -> std::result::Result<Option<String>, serde_json::Error> {
    let chunk: StreamChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
