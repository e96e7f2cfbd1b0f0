//! Gemini wire types and conversion to/from core types.

use serde::{Deserialize, Serialize};

use colloquy_core::context::TurnContext;
use colloquy_core::errors::GatewayError;
use colloquy_core::event::Event;
use colloquy_core::messages::{Content, Part, Role};
use colloquy_core::AgentProfile;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// One SSE chunk of `streamGenerateContent`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<GeminiContent>,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub message: String,
}

const BLOCKING_FINISH_REASONS: &[&str] =
    &["SAFETY", "RECITATION", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

/// Build the request body for one turn.
pub fn build_request(profile: &AgentProfile, context: &TurnContext) -> GenerateContentRequest {
    let system_instruction = (!profile.instruction.is_empty()).then(|| GeminiContent {
        role: None,
        parts: vec![GeminiPart {
            text: Some(profile.instruction.clone()),
            ..Default::default()
        }],
    });

    let generation_config = (profile.temperature.is_some() || profile.max_output_tokens.is_some())
        .then(|| GenerationConfig {
            temperature: profile.temperature,
            max_output_tokens: profile.max_output_tokens,
        });

    GenerateContentRequest {
        contents: context.conversation().iter().map(to_gemini).collect(),
        system_instruction,
        generation_config,
    }
}

pub fn to_gemini(content: &Content) -> GeminiContent {
    let role = match content.role {
        Role::User => "user",
        Role::Model => "model",
    };
    let parts = content
        .parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => GeminiPart {
                text: Some(text.clone()),
                ..Default::default()
            },
            Part::FunctionCall { name, args } => GeminiPart {
                function_call: Some(FunctionCall {
                    name: name.clone(),
                    args: args.clone(),
                }),
                ..Default::default()
            },
            Part::InlineData { mime_type, data } => GeminiPart {
                inline_data: Some(InlineData {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                }),
                ..Default::default()
            },
        })
        .collect();

    GeminiContent {
        role: Some(role.to_string()),
        parts,
    }
}

/// Convert a Gemini content block. Thought parts and parts with no payload are dropped.
pub fn from_gemini(content: &GeminiContent) -> Content {
    let role = match content.role.as_deref() {
        Some("user") => Role::User,
        _ => Role::Model,
    };
    let parts = content
        .parts
        .iter()
        .filter(|p| p.thought != Some(true))
        .filter_map(|p| {
            if let Some(text) = &p.text {
                Some(Part::Text { text: text.clone() })
            } else if let Some(call) = &p.function_call {
                Some(Part::FunctionCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                })
            } else {
                p.inline_data.as_ref().map(|d| Part::InlineData {
                    mime_type: d.mime_type.clone(),
                    data: d.data.clone(),
                })
            }
        })
        .collect();
    Content { role, parts }
}

/// Turn one response chunk into an event, or the error it reports.
pub fn chunk_to_event(chunk: &GenerateContentResponse, author: &str) -> Result<Event, GatewayError> {
    if let Some(error) = &chunk.error {
        return Err(GatewayError::Api {
            code: error.code,
            message: error.message.clone(),
        });
    }
    if let Some(reason) = chunk.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
        return Err(GatewayError::Blocked(format!("prompt blocked: {reason}")));
    }

    let Some(candidate) = chunk.candidates.first() else {
        return Ok(Event::empty(author));
    };

    match &candidate.content {
        Some(content) => Ok(Event::from_content(author, Some(&from_gemini(content)))),
        None => match candidate.finish_reason.as_deref() {
            Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason) => {
                Err(GatewayError::Blocked(format!("response blocked: {reason}")))
            }
            _ => Ok(Event::empty(author)),
        },
    }
}
