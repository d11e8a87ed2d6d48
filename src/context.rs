//! Diagnostic brief generation for the remediation agent.

use crate::fault::{Fault, FaultKind};
use crate::tools::{ToolError, ToolFacade, DEFAULT_LOG_TAIL};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

/// Maximum characters of log tail included in the brief.
const MAX_LOG_CHARS: usize = 2_000;

const INSTRUCTIONS: &str = "Analyze the above context. Determine the root cause of the failure. \
Suggest and EXECUTE a remediation plan using the available tools. \
Do not hallucinate tools. If you fix it, verify the fix if possible.";

/// Where the generator collects status and logs from. The tool facade is the
/// production source; tests substitute a stub.
#[async_trait]
pub trait DiagnosticSource: Send + Sync {
    async fn describe(
        &self,
        kind: FaultKind,
        namespace: &str,
        name: &str,
    ) -> Result<String, ToolError>;

    /// Log tail for the faulting workload (own logs for a Pod, first backing
    /// pod's logs for a Deployment or Job).
    async fn logs(
        &self,
        kind: FaultKind,
        namespace: &str,
        name: &str,
        tail: i64,
    ) -> Result<String, ToolError>;
}

#[async_trait]
impl DiagnosticSource for ToolFacade {
    async fn describe(
        &self,
        kind: FaultKind,
        namespace: &str,
        name: &str,
    ) -> Result<String, ToolError> {
        self.describe_resource(kind, name, namespace).await
    }

    async fn logs(
        &self,
        kind: FaultKind,
        namespace: &str,
        name: &str,
        tail: i64,
    ) -> Result<String, ToolError> {
        self.workload_logs(kind, namespace, name, tail).await
    }
}

pub struct ContextGenerator {
    source: Arc<dyn DiagnosticSource>,
}

impl ContextGenerator {
    #[must_use]
    pub fn new(source: Arc<dyn DiagnosticSource>) -> Self {
        Self { source }
    }

    /// Render the markdown brief. Failed subcollectors degrade to one-line
    /// markers; the brief itself is always produced.
    pub async fn generate(&self, fault: &Fault) -> String {
        let mut brief = String::new();

        let _ = writeln!(brief, "# Detection Context\n");
        let _ = writeln!(brief, "- **Resource**: {}/{}", fault.namespace, fault.name);
        let _ = writeln!(brief, "- **Kind**: {}", fault.kind);
        let _ = writeln!(brief, "- **Fault**: {}", fault.reason);
        let _ = writeln!(brief, "- **Message**: {}", fault.message);
        let _ = writeln!(
            brief,
            "- **Time**: {}\n",
            fault.detected_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let _ = writeln!(brief, "## Diagnostic Data\n");

        match self
            .source
            .describe(fault.kind, &fault.namespace, &fault.name)
            .await
        {
            Ok(description) => {
                let _ = writeln!(brief, "### Resource Status");
                let _ = writeln!(brief, "```yaml");
                let _ = writeln!(brief, "{}", description.trim_end());
                let _ = writeln!(brief, "```\n");
            }
            Err(err) => {
                let _ = writeln!(brief, "> Failed to describe resource: {err}\n");
            }
        }

        let logs_heading = match fault.kind {
            FaultKind::Pod => "Pod Logs",
            FaultKind::Deployment | FaultKind::Job => "Recent Pod Logs",
        };
        match self
            .source
            .logs(fault.kind, &fault.namespace, &fault.name, DEFAULT_LOG_TAIL)
            .await
        {
            Ok(logs) => {
                let _ = writeln!(brief, "### {logs_heading} (last {DEFAULT_LOG_TAIL} lines)");
                let _ = writeln!(brief, "```");
                let _ = writeln!(brief, "{}", tail_truncate(logs.trim_end(), MAX_LOG_CHARS));
                let _ = writeln!(brief, "```");
            }
            Err(err) => {
                let _ = writeln!(brief, "> Failed to retrieve logs: {err}");
            }
        }

        let _ = writeln!(brief, "\n## Instructions");
        brief.push_str(INSTRUCTIONS);

        brief
    }
}

/// Keep the last `limit` characters, marking the cut.
fn tail_truncate(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let mut result: String = text.chars().skip(total - limit).collect();
    result.push_str("\n... (truncated)");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultReason, RawFault};
    use std::sync::Mutex;

    struct StubSource {
        describe: Result<String, String>,
        logs: Result<String, String>,
        requested_tails: Mutex<Vec<i64>>,
    }

    impl StubSource {
        fn new(describe: Result<&str, &str>, logs: Result<&str, &str>) -> Self {
            Self {
                describe: describe.map(str::to_string).map_err(str::to_string),
                logs: logs.map(str::to_string).map_err(str::to_string),
                requested_tails: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DiagnosticSource for StubSource {
        async fn describe(
            &self,
            _kind: FaultKind,
            _namespace: &str,
            _name: &str,
        ) -> Result<String, ToolError> {
            self.describe
                .clone()
                .map_err(ToolError::InvalidArgument)
        }

        async fn logs(
            &self,
            _kind: FaultKind,
            _namespace: &str,
            _name: &str,
            tail: i64,
        ) -> Result<String, ToolError> {
            self.requested_tails.lock().unwrap().push(tail);
            self.logs.clone().map_err(ToolError::InvalidArgument)
        }
    }

    fn pod_fault() -> Fault {
        Fault::from_raw(RawFault::new(
            FaultKind::Pod,
            "default",
            "api-7",
            FaultReason::CrashLoopBackOff,
            "back-off 5m",
        ))
    }

    #[tokio::test]
    async fn brief_contains_header_status_logs_and_instructions() {
        let source = Arc::new(StubSource::new(
            Ok("Pod: default/api-7\nPhase: Running"),
            Ok("line1\nline2"),
        ));
        let generator = ContextGenerator::new(source.clone());

        let brief = generator.generate(&pod_fault()).await;

        assert!(brief.starts_with("# Detection Context"));
        assert!(brief.contains("- **Resource**: default/api-7"));
        assert!(brief.contains("- **Fault**: CrashLoopBackOff"));
        assert!(brief.contains("### Resource Status"));
        assert!(brief.contains("Phase: Running"));
        assert!(brief.contains("### Pod Logs (last 50 lines)"));
        assert!(brief.contains("line2"));
        assert!(brief.ends_with(INSTRUCTIONS));
        assert_eq!(*source.requested_tails.lock().unwrap(), vec![50]);
    }

    #[tokio::test]
    async fn deployment_fault_gets_recent_pod_logs_section() {
        let source = Arc::new(StubSource::new(Ok("status"), Ok("logs")));
        let generator = ContextGenerator::new(source);

        let fault = Fault::from_raw(RawFault::new(
            FaultKind::Deployment,
            "prod",
            "web",
            FaultReason::DeploymentStuck,
            "stuck",
        ));
        let brief = generator.generate(&fault).await;
        assert!(brief.contains("### Recent Pod Logs (last 50 lines)"));
    }

    #[tokio::test]
    async fn failed_describe_degrades_to_marker() {
        let source = Arc::new(StubSource::new(Err("connection refused"), Ok("logs")));
        let generator = ContextGenerator::new(source);

        let brief = generator.generate(&pod_fault()).await;
        assert!(brief.contains("> Failed to describe resource: invalid argument: connection refused"));
        assert!(!brief.contains("### Resource Status"));
        // The rest of the brief is still produced.
        assert!(brief.contains("### Pod Logs"));
        assert!(brief.ends_with(INSTRUCTIONS));
    }

    #[tokio::test]
    async fn failed_logs_degrade_to_marker() {
        let source = Arc::new(StubSource::new(Ok("status"), Err("stream error")));
        let generator = ContextGenerator::new(source);

        let brief = generator.generate(&pod_fault()).await;
        assert!(brief.contains("> Failed to retrieve logs: invalid argument: stream error"));
        assert!(brief.ends_with(INSTRUCTIONS));
    }

    #[tokio::test]
    async fn oversized_logs_keep_exactly_the_tail() {
        let logs = format!("{}{}", "x".repeat(600), "y".repeat(2_000));
        let source = Arc::new(StubSource::new(Ok("status"), Ok(&logs)));
        let generator = ContextGenerator::new(source);

        let brief = generator.generate(&pod_fault()).await;
        // All 2 000 tail characters survive, none of the head does.
        assert!(brief.contains(&"y".repeat(2_000)));
        assert!(!brief.contains('x'));
        assert!(brief.contains("... (truncated)"));
    }

    #[test]
    fn tail_truncate_preserves_exactly_the_last_limit_chars() {
        let text = format!("{}{}", "a".repeat(100), "b".repeat(50));
        let truncated = tail_truncate(&text, 50);
        assert_eq!(truncated, format!("{}\n... (truncated)", "b".repeat(50)));

        assert_eq!(tail_truncate("short", 50), "short");
    }
}
