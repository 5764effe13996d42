#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use llm_relay::config::Config;
use llm_relay::transport::{ChatRequest, EmbedRequest, SpeakRequest, TranscribeRequest, Transport};
use llm_relay::{
    ClientError, ClientSession, ClientSessionBuilder, EmbedInput, MiddlewareChain, ProviderTag,
    ResponseEnvelope, ToolRegistry,
};
use serde_json::json;
use tokio::time::Instant;

/// Records every request and answers with scripted results, falling back to
/// echoing the prompt in the provider's response shape.
pub struct RecordingTransport {
    provider: ProviderTag,
    scripted: Mutex<VecDeque<Result<ResponseEnvelope, ClientError>>>,
    pub chats: Mutex<Vec<ChatRequest>>,
    pub embeds: Mutex<Vec<(Instant, EmbedRequest)>>,
    pub transcriptions: Mutex<Vec<TranscribeRequest>>,
    pub speeches: Mutex<Vec<SpeakRequest>>,
}

impl RecordingTransport {
    pub fn new(provider: ProviderTag) -> Arc<Self> {
        Arc::new(Self {
            provider,
            scripted: Mutex::new(VecDeque::new()),
            chats: Mutex::new(Vec::new()),
            embeds: Mutex::new(Vec::new()),
            transcriptions: Mutex::new(Vec::new()),
            speeches: Mutex::new(Vec::new()),
        })
    }

    /// Queues a result for the next call of any operation.
    pub fn script(&self, result: Result<ResponseEnvelope, ClientError>) {
        self.scripted.lock().expect("scripted").push_back(result);
    }

    pub fn chat_count(&self) -> usize {
        self.chats.lock().expect("chats").len()
    }

    pub fn last_chat(&self) -> ChatRequest {
        self.chats
            .lock()
            .expect("chats")
            .last()
            .cloned()
            .expect("at least one chat request")
    }

    fn next_scripted(&self) -> Option<Result<ResponseEnvelope, ClientError>> {
        self.scripted.lock().expect("scripted").pop_front()
    }

    fn text_envelope(&self, text: String) -> ResponseEnvelope {
        let value = match self.provider {
            ProviderTag::Anthropic => json!({"content": [{"type": "text", "text": text}]}),
            ProviderTag::Google => json!({
                "candidates": [{"content": {"parts": [{"text": text}]}}]
            }),
            _ => json!({"choices": [{"message": {"role": "assistant", "content": text}}]}),
        };
        ResponseEnvelope::new(value)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn chat(&self, request: ChatRequest) -> Result<ResponseEnvelope, ClientError> {
        let echo = format!("echo: {}", request.prompt);
        self.chats.lock().expect("chats").push(request);
        match self.next_scripted() {
            Some(result) => result,
            None => Ok(self.text_envelope(echo)),
        }
    }

    /// Each vector holds the length of its input text.
    async fn embed(&self, request: EmbedRequest) -> Result<ResponseEnvelope, ClientError> {
        let texts = match &request.input {
            EmbedInput::Single(text) => vec![text.clone()],
            EmbedInput::Batch(texts) => texts.clone(),
        };
        self.embeds
            .lock()
            .expect("embeds")
            .push((Instant::now(), request));
        if let Some(result) = self.next_scripted() {
            return result;
        }
        let data: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| json!({"index": index, "embedding": [text.len() as f64]}))
            .collect();
        Ok(ResponseEnvelope::new(json!({"object": "list", "data": data})))
    }

    async fn transcribe(
        &self,
        request: TranscribeRequest,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.transcriptions
            .lock()
            .expect("transcriptions")
            .push(request);
        match self.next_scripted() {
            Some(result) => result,
            None => Ok(ResponseEnvelope::new(json!({"text": "transcribed audio"}))),
        }
    }

    async fn speak(&self, request: SpeakRequest) -> Result<ResponseEnvelope, ClientError> {
        let bytes = request.text.len();
        self.speeches.lock().expect("speeches").push(request);
        match self.next_scripted() {
            Some(result) => result,
            None => Ok(ResponseEnvelope::new(json!({"audio_bytes": bytes}))),
        }
    }

    fn provider(&self) -> ProviderTag {
        self.provider
    }
}

/// Builder wired to fresh registry, chain and default config.
pub fn isolated_builder(
    model: &str,
    transport: Arc<RecordingTransport>,
) -> (ClientSessionBuilder, Arc<ToolRegistry>, Arc<MiddlewareChain>) {
    let tools = Arc::new(ToolRegistry::new());
    let chain = Arc::new(MiddlewareChain::new());
    let builder = ClientSession::builder(model)
        .config(Config::default())
        .tools(tools.clone())
        .middlewares(chain.clone())
        .transport(transport);
    (builder, tools, chain)
}
