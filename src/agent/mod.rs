//! Remediation agent boundary.
//!
//! The orchestrator only depends on the `RemediationAgent` contract; the
//! production implementation is the Gemini client in [`gemini`].

pub mod gemini;

pub use gemini::GeminiAgent;

use async_trait::async_trait;
use thiserror::Error;

/// System instruction handed to the model at construction time.
pub const INSTRUCTION: &str = "You are AMOS, an expert Site Reliability Engineer (SRE) agent.
Your goal is to analyze Kubernetes faults and fix them autonomously.
You have access to tools to inspect resources (logs, describe) and modify them (patch, scale, delete).
1. Analyze the issue provided in the context.
2. Use 'describe_resource' or 'get_pod_logs' if you need more info (diagnose).
3. Once confident, use modification tools to fix the issue (remediate).
4. If you fix it, briefly explain what you did.
5. If you cannot fix it, explain why.
Do not prompt the user for input. You must act autonomously.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent API key is not configured")]
    MissingApiKey,
    #[error("agent request failed: {0}")]
    Http(String),
    #[error("agent API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("agent returned an empty response")]
    EmptyResponse,
    #[error("agent exceeded {0} tool-calling turns")]
    ToolLoopExceeded(usize),
}

/// Contract the orchestrator imposes on the agent: one prompt in, one
/// textual summary out. Tool access is wired in at construction.
#[async_trait]
pub trait RemediationAgent: Send + Sync {
    async fn run(&self, prompt: &str) -> Result<String, AgentError>;
}
