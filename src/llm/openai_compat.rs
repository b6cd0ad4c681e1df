//! Client for OpenAI-compatible HTTP servers (llama.cpp server, LM Studio,
//! vLLM, hosted inference endpoints).

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{GenerationService, TokenReceiver};
use super::types::{ChatMessage, SamplingParams};
use crate::core::errors::EmbeddingError;
use crate::rag::embedder::EmbeddingBackend;

#[derive(Clone)]
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            client,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> anyhow::Result<reqwest::Response> {
        let res = self
            .post(path)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {}{} failed", self.base_url, path))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", path, status, text));
        }
        Ok(res)
    }

    pub async fn chat(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> anyhow::Result<String> {
        let body = chat_body(model_id, messages, sampling, false);
        let payload: Value = self
            .post_json("/v1/chat/completions", &body)
            .await?
            .json()
            .await
            .context("invalid chat completion payload")?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("chat completion payload has no message content"))
    }

    pub async fn stream_chat(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> anyhow::Result<TokenReceiver> {
        let body = chat_body(model_id, messages, sampling, true);
        let res = self.post_json("/v1/chat/completions", &body).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for event in drain_sse_events(&mut buffer) {
                            match event {
                                SseEvent::Done => return,
                                SseEvent::Token(content) => {
                                    if tx.send(Ok(content)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("stream interrupted: {}", e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    pub async fn embed(&self, model_id: &str, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let payload: Value = self
            .post_json("/v1/embeddings", &body)
            .await?
            .json()
            .await
            .context("invalid embeddings payload")?;

        let data = payload["data"]
            .as_array()
            .ok_or_else(|| anyhow!("embeddings payload has no data array"))?;

        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (position, item) in data.iter().enumerate() {
            let index = item["index"].as_u64().map_or(position, |i| i as usize);
            let values = item["embedding"]
                .as_array()
                .ok_or_else(|| anyhow!("embedding {} is not an array", index))?;
            let vector: Vec<f32> = values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            indexed.push((index, vector));
        }
        indexed.sort_by_key(|(index, _)| *index);

        Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
    }
}

fn chat_body(model_id: &str, messages: &[ChatMessage], sampling: &SamplingParams, stream: bool) -> Value {
    let mut body = json!({
        "model": model_id,
        "messages": messages,
        "stream": stream,
        "temperature": sampling.temperature,
        "max_tokens": sampling.max_output_tokens,
    });
    if !sampling.stop_sequences.is_empty() {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stop".to_string(), json!(sampling.stop_sequences));
        }
    }
    body
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Token(String),
    Done,
}

/// Take every complete line out of `buffer` and decode the `data:` events.
/// An incomplete trailing line stays in the buffer.
fn drain_sse_events(buffer: &mut String) -> Vec<SseEvent> {
    let mut events = Vec::new();
    while let Some(newline) = buffer.find('\n') {
        let line: String = buffer.drain(..=newline).collect();
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            events.push(SseEvent::Done);
            break;
        }
        if let Ok(json) = serde_json::from_str::<Value>(data) {
            if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                if !content.is_empty() {
                    events.push(SseEvent::Token(content.to_string()));
                }
            }
        }
    }
    events
}

/// Chat model served over the OpenAI-compatible API.
pub struct OpenAiChat {
    client: OpenAiCompatClient,
    model_id: String,
    max_input_tokens: usize,
}

impl OpenAiChat {
    pub fn new(client: OpenAiCompatClient, model_id: impl Into<String>, max_input_tokens: usize) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            max_input_tokens,
        }
    }
}

#[async_trait]
impl GenerationService for OpenAiChat {
    fn name(&self) -> &str {
        &self.model_id
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> anyhow::Result<String> {
        self.client.chat(&self.model_id, messages, sampling).await
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> anyhow::Result<TokenReceiver> {
        self.client.stream_chat(&self.model_id, messages, sampling).await
    }
}

/// Embedding model served over the OpenAI-compatible API.
pub struct OpenAiEmbeddings {
    client: OpenAiCompatClient,
    model_id: String,
    dimension: usize,
    max_input_tokens: usize,
}

impl OpenAiEmbeddings {
    pub fn new(
        client: OpenAiCompatClient,
        model_id: impl Into<String>,
        dimension: usize,
        max_input_tokens: usize,
    ) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            dimension,
            max_input_tokens,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddings {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.client
            .embed(&self.model_id, texts)
            .await
            .map_err(|e| EmbeddingError::Backend(format!("{:#}", e)))
    }
}
