//! Provider adapters: one wire dialect per upstream family.
//!
//! An adapter owns three translations: serialize the woven prompt into the
//! provider's request shape, parse one SSE data payload into
//! [`UpstreamChunk`]s, and parse a buffered response body. The OpenAI dialect
//! covers OpenAI itself, Ollama (whose OpenAI-compatible endpoint we use),
//! and OpenRouter (OpenAI wire plus attribution headers); Anthropic gets its
//! own message/event mapping.

use base64::Engine;
use serde_json::{Value, json};

use crate::{
    catalog::ModelDescriptor,
    chat::{ChatMessage, ChatRequest, Role, Usage},
    config::AdapterKind,
    error::GatewayError,
    ingest::extract::ExtractionKind,
    upstream::chunk::UpstreamChunk,
};

/// One base64 image attachment.
#[derive(Debug, Clone)]
pub struct ImagePart {
    pub media_type: String,
    pub data_b64: String,
}

impl ImagePart {
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            data_b64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Context derived from one referenced file, ready for weaving.
pub enum FileContext {
    /// Successful extraction woven as an additional system message.
    Text {
        name: String,
        kind: ExtractionKind,
        text: String,
    },
    /// Extraction failed; the chat proceeds with a placeholder.
    Placeholder { name: String, reason: String },
    /// Raw image handed to a vision-capable target.
    Image(ImagePart),
}

/// The normalized, file-woven prompt adapters serialize.
pub struct PromptRequest {
    pub messages: Vec<ChatMessage>,
    pub images: Vec<ImagePart>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

/// Weaves file contexts into the conversation.
///
/// Extraction text lands as system messages ahead of the conversation so the
/// model sees file content before the user's question; placeholders keep the
/// request alive when extraction failed.
pub fn weave(request: &ChatRequest, contexts: Vec<FileContext>) -> PromptRequest {
    let mut preamble = Vec::new();
    let mut images = Vec::new();

    for context in contexts {
        match context {
            FileContext::Text { name, kind, text } => {
                let kind = match kind {
                    ExtractionKind::Text => "text",
                    ExtractionKind::Table => "table",
                    ExtractionKind::ImageCaption => "image description",
                    ExtractionKind::Transcript => "audio transcript",
                    ExtractionKind::StructuredJson => "JSON document",
                };
                preamble.push(ChatMessage::new(
                    Role::System,
                    format!("Content of uploaded file \"{name}\" ({kind}):\n{text}"),
                ));
            }
            FileContext::Placeholder { name, reason } => {
                preamble.push(ChatMessage::new(
                    Role::System,
                    format!("[file {name}: extraction failed: {reason}]"),
                ));
            }
            FileContext::Image(part) => images.push(part),
        }
    }

    let mut messages = preamble;
    messages.extend(request.messages.iter().cloned());

    PromptRequest {
        messages,
        images,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stop: request.stop.clone(),
    }
}

/// Serialized request ready for the connection pool.
pub struct AdaptedRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Buffered provider response, normalized.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Usage,
}

/// One provider wire dialect.
pub trait ProviderAdapter: Send + Sync {
    /// Serializes the prompt for `model`, streaming or buffered.
    fn serialize(
        &self,
        prompt: &PromptRequest,
        model: &ModelDescriptor,
        stream: bool,
        api_key: Option<&str>,
    ) -> Result<AdaptedRequest, GatewayError>;

    /// Parses one SSE data payload into chunks.
    fn parse_chunk(&self, data: &str) -> Vec<UpstreamChunk>;

    /// Parses a buffered 2xx response body.
    fn parse_response(&self, body: &[u8]) -> Result<ProviderResponse, GatewayError>;

    /// Best-effort error message from a non-2xx body.
    fn error_message(&self, body: &[u8]) -> String {
        serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| "upstream request failed".to_string())
    }
}

/// Builds the adapter for a configured kind.
pub fn adapter_for(kind: AdapterKind) -> Box<dyn ProviderAdapter> {
    match kind {
        AdapterKind::Openai => Box::new(OpenAiAdapter { openrouter: false }),
        AdapterKind::Openrouter => Box::new(OpenAiAdapter { openrouter: true }),
        AdapterKind::Ollama => Box::new(OllamaAdapter),
        AdapterKind::Anthropic => Box::new(AnthropicAdapter),
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Serializes messages the OpenAI way; images become content parts on the
/// last user message.
fn openai_messages(prompt: &PromptRequest) -> Vec<Value> {
    let mut messages: Vec<Value> = prompt
        .messages
        .iter()
        .map(|m| json!({ "role": role_str(m.role), "content": m.content }))
        .collect();

    if !prompt.images.is_empty() {
        let last_user = prompt
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(messages.len().saturating_sub(1));
        let text = prompt.messages[last_user].content.clone();
        let mut parts = vec![json!({ "type": "text", "text": text })];
        for image in &prompt.images {
            parts.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", image.media_type, image.data_b64),
                },
            }));
        }
        messages[last_user] = json!({ "role": "user", "content": parts });
    }

    messages
}

fn openai_body(prompt: &PromptRequest, model: &ModelDescriptor, stream: bool) -> Value {
    let mut body = json!({
        "model": model.model_id,
        "messages": openai_messages(prompt),
        "stream": stream,
    });
    if let Some(t) = prompt.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(m) = prompt.max_tokens {
        body["max_tokens"] = json!(m);
    }
    if !prompt.stop.is_empty() {
        body["stop"] = json!(prompt.stop);
    }
    if stream {
        body["stream_options"] = json!({ "include_usage": true });
    }
    body
}

fn parse_openai_chunk(data: &str) -> Vec<UpstreamChunk> {
    if data.trim() == "[DONE]" {
        return vec![UpstreamChunk::Finish(None)];
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return vec![];
    };
    if let Some(error) = value.get("error") {
        return vec![UpstreamChunk::Error {
            code: error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("upstream-error")
                .to_string(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("stream error")
                .to_string(),
        }];
    }

    let mut chunks = Vec::new();
    if let Some(choice) = value.pointer("/choices/0") {
        if let Some(content) = choice.pointer("/delta/content").and_then(Value::as_str)
            && !content.is_empty()
        {
            chunks.push(UpstreamChunk::DeltaContent(content.to_string()));
        }
        if let Some(tool_calls) = choice.pointer("/delta/tool_calls")
            && !tool_calls.is_null()
        {
            chunks.push(UpstreamChunk::DeltaToolCall(tool_calls.to_string()));
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            chunks.push(UpstreamChunk::Finish(Some(reason.to_string())));
        }
    }
    if chunks.is_empty() {
        chunks.push(UpstreamChunk::Keepalive);
    }
    chunks
}

fn parse_openai_response(body: &[u8]) -> Result<ProviderResponse, GatewayError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| GatewayError::UpstreamError {
        provider: String::new(),
        message: format!("unparseable response: {e}"),
    })?;

    let content = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let finish_reason = value
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let usage = Usage {
        prompt_tokens: value
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        completion_tokens: value
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        total_tokens: value
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    };

    Ok(ProviderResponse {
        content,
        finish_reason,
        usage,
    })
}

/// OpenAI-compatible adapter; also speaks for OpenRouter.
pub struct OpenAiAdapter {
    openrouter: bool,
}

impl ProviderAdapter for OpenAiAdapter {
    fn serialize(
        &self,
        prompt: &PromptRequest,
        model: &ModelDescriptor,
        stream: bool,
        api_key: Option<&str>,
    ) -> Result<AdaptedRequest, GatewayError> {
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(key) = api_key {
            headers.push(("authorization".to_string(), format!("Bearer {key}")));
        }
        if self.openrouter {
            headers.push(("http-referer".to_string(), "https://modelgate.dev".to_string()));
            headers.push(("x-title".to_string(), "modelgate".to_string()));
        }
        if stream {
            headers.push(("accept".to_string(), "text/event-stream".to_string()));
        }

        Ok(AdaptedRequest {
            path: "/v1/chat/completions".to_string(),
            headers,
            body: serde_json::to_vec(&openai_body(prompt, model, stream)).map_err(|e| {
                GatewayError::Internal {
                    request_id: e.to_string(),
                }
            })?,
        })
    }

    fn parse_chunk(&self, data: &str) -> Vec<UpstreamChunk> {
        parse_openai_chunk(data)
    }

    fn parse_response(&self, body: &[u8]) -> Result<ProviderResponse, GatewayError> {
        parse_openai_response(body)
    }
}

/// Ollama's OpenAI-compatible endpoint: same wire, no auth.
pub struct OllamaAdapter;

impl ProviderAdapter for OllamaAdapter {
    fn serialize(
        &self,
        prompt: &PromptRequest,
        model: &ModelDescriptor,
        stream: bool,
        _api_key: Option<&str>,
    ) -> Result<AdaptedRequest, GatewayError> {
        OpenAiAdapter { openrouter: false }.serialize(prompt, model, stream, None)
    }

    fn parse_chunk(&self, data: &str) -> Vec<UpstreamChunk> {
        parse_openai_chunk(data)
    }

    fn parse_response(&self, body: &[u8]) -> Result<ProviderResponse, GatewayError> {
        parse_openai_response(body)
    }
}

/// Anthropic messages API adapter.
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn serialize(
        &self,
        prompt: &PromptRequest,
        model: &ModelDescriptor,
        stream: bool,
        api_key: Option<&str>,
    ) -> Result<AdaptedRequest, GatewayError> {
        // System messages collapse into the dedicated `system` field; the
        // conversation keeps only user/assistant turns.
        let system: Vec<&str> = prompt
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let mut messages: Vec<Value> = Vec::new();
        for message in prompt.messages.iter().filter(|m| m.role != Role::System) {
            messages.push(json!({
                "role": role_str(message.role),
                "content": message.content,
            }));
        }

        if !prompt.images.is_empty()
            && let Some(last_user) = messages
                .iter()
                .rposition(|m| m["role"] == "user")
        {
            let text = messages[last_user]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let mut parts: Vec<Value> = prompt
                .images
                .iter()
                .map(|image| {
                    json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type,
                            "data": image.data_b64,
                        },
                    })
                })
                .collect();
            parts.push(json!({ "type": "text", "text": text }));
            messages[last_user]["content"] = json!(parts);
        }

        let mut body = json!({
            "model": model.model_id,
            "max_tokens": prompt.max_tokens.unwrap_or(model.max_output_tokens),
            "messages": messages,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(t) = prompt.temperature {
            body["temperature"] = json!(t);
        }
        if !prompt.stop.is_empty() {
            body["stop_sequences"] = json!(prompt.stop);
        }

        let mut headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("anthropic-version".to_string(), "2023-06-01".to_string()),
        ];
        if let Some(key) = api_key {
            headers.push(("x-api-key".to_string(), key.to_string()));
        }
        if stream {
            headers.push(("accept".to_string(), "text/event-stream".to_string()));
        }

        Ok(AdaptedRequest {
            path: "/v1/messages".to_string(),
            headers,
            body: serde_json::to_vec(&body).map_err(|e| GatewayError::Internal {
                request_id: e.to_string(),
            })?,
        })
    }

    fn parse_chunk(&self, data: &str) -> Vec<UpstreamChunk> {
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return vec![];
        };

        match value.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => {
                match value.pointer("/delta/type").and_then(Value::as_str) {
                    Some("text_delta") => value
                        .pointer("/delta/text")
                        .and_then(Value::as_str)
                        .map(|t| vec![UpstreamChunk::DeltaContent(t.to_string())])
                        .unwrap_or_default(),
                    Some("input_json_delta") => value
                        .pointer("/delta/partial_json")
                        .and_then(Value::as_str)
                        .map(|t| vec![UpstreamChunk::DeltaToolCall(t.to_string())])
                        .unwrap_or_default(),
                    _ => vec![],
                }
            }
            Some("message_delta") => value
                .pointer("/delta/stop_reason")
                .and_then(Value::as_str)
                .map(|r| vec![UpstreamChunk::Finish(Some(r.to_string()))])
                .unwrap_or_default(),
            Some("message_stop") => vec![UpstreamChunk::Finish(None)],
            Some("ping") => vec![UpstreamChunk::Keepalive],
            Some("error") => vec![UpstreamChunk::Error {
                code: value
                    .pointer("/error/type")
                    .and_then(Value::as_str)
                    .unwrap_or("upstream-error")
                    .to_string(),
                message: value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string(),
            }],
            _ => vec![],
        }
    }

    fn parse_response(&self, body: &[u8]) -> Result<ProviderResponse, GatewayError> {
        let value: Value = serde_json::from_slice(body).map_err(|e| GatewayError::UpstreamError {
            provider: String::new(),
            message: format!("unparseable response: {e}"),
        })?;

        let content = value
            .pointer("/content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let input = value
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let output = value
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        Ok(ProviderResponse {
            content,
            finish_reason: value
                .pointer("/stop_reason")
                .and_then(Value::as_str)
                .map(str::to_owned),
            usage: Usage {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Capability, PricingTier, SpeedTier};

    fn model() -> ModelDescriptor {
        ModelDescriptor {
            provider_id: "p".to_string(),
            model_id: "m-1".to_string(),
            capabilities: [Capability::Text, Capability::Vision].into_iter().collect(),
            cost_per_1k_input: 0.001,
            cost_per_1k_output: 0.002,
            context_window: 128_000,
            max_output_tokens: 4_096,
            speed_tier: SpeedTier::Fast,
            pricing_tier: PricingTier::Standard,
        }
    }

    fn prompt(content: &str) -> PromptRequest {
        PromptRequest {
            messages: vec![ChatMessage::new(Role::User, content)],
            images: vec![],
            temperature: Some(0.2),
            max_tokens: Some(256),
            stop: vec![],
        }
    }

    #[test]
    fn openai_serialization_shape() {
        let adapted = OpenAiAdapter { openrouter: false }
            .serialize(&prompt("hi"), &model(), true, Some("sk-key"))
            .unwrap();
        assert_eq!(adapted.path, "/v1/chat/completions");
        assert!(
            adapted
                .headers
                .iter()
                .any(|(k, v)| k == "authorization" && v == "Bearer sk-key")
        );

        let body: Value = serde_json::from_slice(&adapted.body).unwrap();
        assert_eq!(body["model"], "m-1");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn openai_chunk_parsing() {
        let chunks = parse_openai_chunk(
            r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        );
        assert_eq!(chunks, vec![UpstreamChunk::DeltaContent("Hel".to_string())]);

        let done = parse_openai_chunk("[DONE]");
        assert_eq!(done, vec![UpstreamChunk::Finish(None)]);

        let finish =
            parse_openai_chunk(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#);
        assert_eq!(finish, vec![UpstreamChunk::Finish(Some("stop".to_string()))]);
    }

    #[test]
    fn openai_response_parsing() {
        let body = r#"{
            "choices": [{"index":0,"message":{"role":"assistant","content":"4"},"finish_reason":"stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13}
        }"#;
        let res = parse_openai_response(body.as_bytes()).unwrap();
        assert_eq!(res.content, "4");
        assert_eq!(res.finish_reason.as_deref(), Some("stop"));
        assert_eq!(res.usage.total_tokens, 13);
    }

    #[test]
    fn anthropic_serialization_moves_system_out() {
        let prompt = PromptRequest {
            messages: vec![
                ChatMessage::new(Role::System, "be terse"),
                ChatMessage::new(Role::User, "hi"),
            ],
            images: vec![],
            temperature: None,
            max_tokens: None,
            stop: vec!["END".to_string()],
        };
        let adapted = AnthropicAdapter
            .serialize(&prompt, &model(), false, Some("key"))
            .unwrap();
        assert_eq!(adapted.path, "/v1/messages");
        assert!(adapted.headers.iter().any(|(k, _)| k == "anthropic-version"));

        let body: Value = serde_json::from_slice(&adapted.body).unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], 4_096);
        assert_eq!(body["stop_sequences"][0], "END");
    }

    #[test]
    fn anthropic_image_parts() {
        let prompt = PromptRequest {
            messages: vec![ChatMessage::new(Role::User, "what is this?")],
            images: vec![ImagePart {
                media_type: "image/png".to_string(),
                data_b64: "QUJD".to_string(),
            }],
            temperature: None,
            max_tokens: Some(128),
            stop: vec![],
        };
        let adapted = AnthropicAdapter
            .serialize(&prompt, &model(), false, None)
            .unwrap();
        let body: Value = serde_json::from_slice(&adapted.body).unwrap();
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[1]["type"], "text");
    }

    #[test]
    fn anthropic_chunk_parsing() {
        let a = AnthropicAdapter;
        assert_eq!(
            a.parse_chunk(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#),
            vec![UpstreamChunk::DeltaContent("Hi".to_string())]
        );
        assert_eq!(
            a.parse_chunk(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":9}}"#),
            vec![UpstreamChunk::Finish(Some("end_turn".to_string()))]
        );
        assert_eq!(a.parse_chunk(r#"{"type":"ping"}"#), vec![UpstreamChunk::Keepalive]);
    }

    #[test]
    fn weave_places_extractions_before_conversation() {
        let request: ChatRequest = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "Summarize"}],
        }))
        .unwrap();
        let woven = weave(
            &request,
            vec![
                FileContext::Text {
                    name: "notes.txt".to_string(),
                    kind: ExtractionKind::Text,
                    text: "alpha beta".to_string(),
                },
                FileContext::Placeholder {
                    name: "broken.pdf".to_string(),
                    reason: "input is encrypted".to_string(),
                },
            ],
        );
        assert_eq!(woven.messages.len(), 3);
        assert_eq!(woven.messages[0].role, Role::System);
        assert!(woven.messages[0].content.contains("notes.txt"));
        assert!(
            woven.messages[1]
                .content
                .contains("[file broken.pdf: extraction failed: input is encrypted]")
        );
        assert_eq!(woven.messages[2].role, Role::User);
    }
}
