//! OpenAI-style chat wire types shared across the gateway.
//!
//! These types are the normalized request/response schema the gateway speaks
//! to clients and the provider adapters translate from. Unknown fields are
//! ignored on deserialization to preserve OpenAI wire compatibility; the
//! gateway never errors on a field it does not recognize.

use serde::{Deserialize, Serialize};

use crate::{catalog::Capability, error::GatewayError};

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Normalized chat completion request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// Ordered conversation; at least one message.
    pub messages: Vec<ChatMessage>,
    /// Referenced uploads, woven into the prompt as extractions.
    #[serde(default)]
    pub file_ids: Vec<String>,
    /// Model hint; `None` or `"auto"` routes by complexity.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Output token ceiling.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(default)]
    pub stop: Vec<String>,
    /// Whether the client wants an SSE stream.
    #[serde(default)]
    pub stream: bool,
    /// Explicit capability hints (e.g. force `vision`).
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl ChatRequest {
    /// Validates the request shape against the configured payload cap.
    pub fn validate(&self, payload_cap_bytes: usize) -> Result<(), GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::Validation {
                message: "messages must contain at least one entry".to_string(),
            });
        }

        let total: usize = self.messages.iter().map(|m| m.content.len()).sum();
        if total > payload_cap_bytes {
            return Err(GatewayError::PayloadTooLarge {
                limit_bytes: payload_cap_bytes as u64,
            });
        }

        for msg in &self.messages {
            if msg.content.contains('\0') {
                return Err(GatewayError::Validation {
                    message: "message content must not contain NUL".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Accumulated user-role content, the scorer's primary signal.
    pub fn user_content(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Token accounting mirrored from the provider, or estimated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Buffered (non-streaming) chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    /// Number of referenced files whose extraction succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_processed: Option<u32>,
}

impl ChatResponse {
    /// Builds a single-choice assistant response.
    pub fn assistant(id: String, created: u64, model: String, content: String) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::new(Role::Assistant, content),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::default(),
            files_processed: None,
        }
    }
}

/// Serializes one OpenAI-shaped streaming chunk.
pub fn chunk_json(
    id: &str,
    created: u64,
    model: &str,
    role: Option<Role>,
    content: Option<&str>,
    finish_reason: Option<&str>,
) -> String {
    let mut delta = serde_json::Map::new();
    if let Some(role) = role {
        delta.insert(
            "role".to_string(),
            serde_json::to_value(role).unwrap_or_default(),
        );
    }
    if let Some(content) = content {
        delta.insert("content".to_string(), content.into());
    }

    serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
    .to_string()
}

/// Serializes the mid-stream error frame sent before `[DONE]`.
pub fn error_chunk_json(code: &str, message: &str) -> String {
    serde_json::json!({
        "error": { "code": code, "message": message },
    })
    .to_string()
}

/// Seconds since the Unix epoch, the `created` field of responses.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_messages_fail_validation() {
        let req: ChatRequest = serde_json::from_str(r#"{ "messages": [] }"#).unwrap();
        let err = req.validate(1024).unwrap_err();
        assert_eq!(err.code(), "validation-error");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let req: ChatRequest = serde_json::from_str(
            r#"{
                "messages": [{"role": "user", "content": "2+2?"}],
                "logit_bias": {"50256": -100},
                "n": 1
            }"#,
        )
        .unwrap();
        assert!(req.validate(1024).is_ok());
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let req = ChatRequest {
            messages: vec![ChatMessage::new(Role::User, "x".repeat(2048))],
            file_ids: vec![],
            model: None,
            temperature: None,
            max_tokens: None,
            stop: vec![],
            stream: false,
            capabilities: vec![],
        };
        assert_eq!(req.validate(1024).unwrap_err().code(), "payload-too-large");
    }

    #[test]
    fn chunk_json_shape() {
        let chunk = chunk_json("c1", 123, "m", Some(Role::Assistant), Some("Hi"), None);
        let value: serde_json::Value = serde_json::from_str(&chunk).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "Hi");
        assert_eq!(value["choices"][0]["delta"]["role"], "assistant");
        assert!(value["choices"][0]["finish_reason"].is_null());
    }
}
