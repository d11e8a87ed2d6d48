//! Gemini `generateContent` client with function calling.
//!
//! The agent advertises the five facade tools as function declarations and
//! runs a bounded tool-calling loop: each model turn may request tool
//! executions, whose results are appended as function responses until the
//! model answers with text only.

use super::{AgentError, RemediationAgent, INSTRUCTION};
use crate::config::AgentConfig;
use crate::tools::ToolFacade;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Upper bound on model turns per remediation attempt.
const MAX_TOOL_TURNS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part {
                text: Some(text.into()),
                ..Part::default()
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: SystemInstruction<'a>,
    contents: &'a [Content],
    tools: [ToolDeclarations; 1],
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize)]
struct FunctionDeclaration {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

pub struct GeminiAgent {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    tools: Arc<ToolFacade>,
}

impl GeminiAgent {
    #[must_use]
    pub fn new(config: &AgentConfig, tools: Arc<ToolFacade>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: GEMINI_API_BASE.to_string(),
            tools,
        }
    }

    /// Point the client at a different endpoint (tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn generate(&self, contents: &[Content]) -> Result<Content, AgentError> {
        let request = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: [TextPart { text: INSTRUCTION }],
            },
            contents,
            tools: [ToolDeclarations {
                function_declarations: declarations(),
            }],
        };

        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map_or(body, |parsed| parsed.error.message);
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or(AgentError::EmptyResponse)
    }
}

#[async_trait]
impl RemediationAgent for GeminiAgent {
    async fn run(&self, prompt: &str) -> Result<String, AgentError> {
        if self.api_key.is_empty() {
            return Err(AgentError::MissingApiKey);
        }

        let mut contents = vec![Content::user_text(prompt)];

        for turn in 0..MAX_TOOL_TURNS {
            let content = self.generate(&contents).await?;
            let calls = function_calls_of(&content);
            let text = text_of(&content);
            contents.push(content);

            if calls.is_empty() {
                info!(turns = turn + 1, "agent finished");
                return Ok(text);
            }

            let mut response_parts = Vec::with_capacity(calls.len());
            for call in calls {
                debug!(tool = %call.name, "agent tool call");
                let outcome = match self.tools.invoke(&call.name, &call.args).await {
                    Ok(output) => output,
                    Err(err) => {
                        // Surface the failure to the model instead of
                        // aborting; it may choose a different tool.
                        warn!(tool = %call.name, error = %err, "tool call failed");
                        format!("Error: {err}")
                    }
                };
                response_parts.push(Part {
                    function_response: Some(FunctionResponse {
                        name: call.name,
                        response: json!({ "result": outcome }),
                    }),
                    ..Part::default()
                });
            }
            contents.push(Content {
                role: "user".to_string(),
                parts: response_parts,
            });
        }

        Err(AgentError::ToolLoopExceeded(MAX_TOOL_TURNS))
    }
}

fn text_of(content: &Content) -> String {
    content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("")
}

fn function_calls_of(content: &Content) -> Vec<FunctionCall> {
    content
        .parts
        .iter()
        .filter_map(|p| p.function_call.clone())
        .collect()
}

fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: "get_pod_logs",
            description: "Fetch the log tail of a pod.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string" },
                    "name": { "type": "string" },
                    "tail": { "type": "integer", "description": "Number of lines, default 50" }
                },
                "required": ["namespace", "name"]
            }),
        },
        FunctionDeclaration {
            name: "describe_resource",
            description: "Condensed status of a Pod, Deployment, or Job.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "kind": { "type": "string", "enum": ["Pod", "Deployment", "Job"] },
                    "name": { "type": "string" },
                    "namespace": { "type": "string" }
                },
                "required": ["kind", "name", "namespace"]
            }),
        },
        FunctionDeclaration {
            name: "patch_deployment",
            description: "Apply a patch to a deployment. Patch type is strategic, merge, or json (default strategic).",
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "namespace": { "type": "string" },
                    "type": { "type": "string", "enum": ["strategic", "merge", "json"] },
                    "data": { "type": "string", "description": "Patch body as JSON" }
                },
                "required": ["name", "namespace", "data"]
            }),
        },
        FunctionDeclaration {
            name: "scale_deployment",
            description: "Set the desired replica count of a deployment.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "namespace": { "type": "string" },
                    "replicas": { "type": "integer" }
                },
                "required": ["name", "namespace", "replicas"]
            }),
        },
        FunctionDeclaration {
            name: "delete_pod",
            description: "Delete a pod so its owning controller recreates it.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "namespace": { "type": "string" }
                },
                "required": ["name", "namespace"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_match_the_facade_tool_set() {
        let declared: Vec<&str> = declarations().iter().map(|d| d.name).collect();
        assert_eq!(declared, ToolFacade::tool_names());
    }

    #[test]
    fn request_serializes_with_camel_case_fields() {
        let contents = vec![Content::user_text("fix it")];
        let request = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: [TextPart { text: INSTRUCTION }],
            },
            contents: &contents,
            tools: [ToolDeclarations {
                function_declarations: declarations(),
            }],
        };

        let wire = serde_json::to_value(&request).expect("serialize");
        assert!(wire.get("systemInstruction").is_some());
        assert!(wire["tools"][0].get("functionDeclarations").is_some());
        assert_eq!(wire["contents"][0]["role"], "user");
        assert_eq!(wire["contents"][0]["parts"][0]["text"], "fix it");
    }

    #[test]
    fn function_calls_parse_from_wire_response() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Scaling up." },
                        { "functionCall": { "name": "scale_deployment",
                            "args": { "name": "web", "namespace": "prod", "replicas": 3 } } }
                    ]
                }
            }]
        });

        let parsed: GenerateResponse = serde_json::from_value(body).expect("parse");
        let content = parsed.candidates[0].content.as_ref().expect("content");

        assert_eq!(text_of(content), "Scaling up.");
        let calls = function_calls_of(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "scale_deployment");
        assert_eq!(calls[0].args["replicas"], 3);
    }

    #[test]
    fn text_only_response_has_no_calls() {
        let content = Content {
            role: "model".to_string(),
            parts: vec![Part {
                text: Some("Root cause: OOM. Increased memory limit.".to_string()),
                ..Part::default()
            }],
        };
        assert!(function_calls_of(&content).is_empty());
        assert_eq!(text_of(&content), "Root cause: OOM. Increased memory limit.");
    }

    #[test]
    fn function_response_round_trips() {
        let part = Part {
            function_response: Some(FunctionResponse {
                name: "delete_pod".to_string(),
                response: json!({ "result": "Deleted pod prod/web-1" }),
            }),
            ..Part::default()
        };
        let wire = serde_json::to_value(&part).expect("serialize");
        assert_eq!(wire["functionResponse"]["name"], "delete_pod");
        assert!(wire.get("text").is_none());
    }
}
