//! Shell exec tool — runs commands through the process session manager.
//!
//! Three modes:
//! - *foreground*: bounded wait; the process is killed on timeout
//! - *background* (`background: true`): returns `{session id, pid}` at once
//! - *auto-yield* (`yield_ms`): waits briefly, then backgrounds with a tail
//!
//! Guards run before every execution: a regex deny list for destructive
//! patterns, and (when workspace-restricted) rejection of absolute paths
//! escaping the working directory. The approval policy layer then decides
//! allow / block / ask-the-operator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sharpbot_core::config::schema::ExecConfig;

use super::base::{optional_bool, optional_i64, optional_string, require_string, Tool};
use crate::approval::{evaluate_policy, ApprovalManager, ApprovalOutcome, PolicyAction};
use crate::process::ProcessSessionManager;

/// Maximum output length before truncation (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Tail size returned when auto-yield backgrounds a command.
const YIELD_TAIL_CHARS: usize = 2_000;

/// Destructive command patterns that are always blocked.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

// ─────────────────────────────────────────────
// ExecTool
// ─────────────────────────────────────────────

/// Execute shell commands with guard, approval, and session support.
pub struct ExecTool {
    /// Default working directory for commands.
    working_dir: PathBuf,
    /// Policy and timeout configuration.
    config: ExecConfig,
    /// If true, block commands that reference paths outside `working_dir`.
    restrict_to_workspace: bool,
    /// Compiled deny regexes (built once at construction).
    deny_regexes: Vec<Regex>,
    /// Background process sessions.
    sessions: Arc<ProcessSessionManager>,
    /// Operator approval layer.
    approval: Arc<ApprovalManager>,
    /// Outer cancellation (linked into approval waits).
    cancel: CancellationToken,
}

impl ExecTool {
    /// Create a new exec tool.
    pub fn new(
        working_dir: PathBuf,
        config: ExecConfig,
        restrict_to_workspace: bool,
        sessions: Arc<ProcessSessionManager>,
        approval: Arc<ApprovalManager>,
        cancel: CancellationToken,
    ) -> Self {
        let deny_regexes: Vec<Regex> = DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        Self {
            working_dir,
            config,
            restrict_to_workspace,
            deny_regexes,
            sessions,
            approval,
            cancel,
        }
    }

    /// Check if a command is safe to execute. Returns an error message if blocked.
    fn guard_command(&self, command: &str, cwd: &str) -> Option<String> {
        let lower = command.to_lowercase();

        for re in &self.deny_regexes {
            if re.is_match(&lower) {
                warn!(command = command, "command blocked by safety guard");
                return Some(
                    "Error: Command blocked by safety guard (dangerous pattern detected)".into(),
                );
            }
        }

        if self.restrict_to_workspace {
            if command.contains("../") || command.contains("..\\") {
                return Some(
                    "Error: Command blocked — path traversal (../) not allowed in restricted mode"
                        .into(),
                );
            }

            let cwd_path = PathBuf::from(cwd);
            if let Ok(re) = Regex::new(r#"(?:/[^\s"']+|[A-Za-z]:\\[^\s"']+)"#) {
                for cap in re.find_iter(command) {
                    let p = PathBuf::from(cap.as_str());
                    let resolved = if p.exists() {
                        p.canonicalize().unwrap_or(p)
                    } else {
                        p
                    };
                    if !resolved.starts_with(&cwd_path) {
                        return Some(format!(
                            "Error: Command references path '{}' outside workspace",
                            cap.as_str()
                        ));
                    }
                }
            }
        }

        None
    }

    /// Apply the approval policy. Returns an error message when refused.
    async fn check_policy(&self, command: &str) -> Option<String> {
        let executable = resolve_executable(command);
        let allowlisted = self.approval.is_allowlisted(&executable);

        match evaluate_policy(
            self.config.security,
            self.config.ask,
            self.config.fallback,
            allowlisted,
        ) {
            PolicyAction::Allow => None,
            PolicyAction::Block => {
                Some("Error: Command blocked by exec policy".into())
            }
            PolicyAction::Ask => {
                match self
                    .approval
                    .request(command, &executable, &self.cancel)
                    .await
                {
                    ApprovalOutcome::Allowed => None,
                    ApprovalOutcome::Denied => {
                        Some("Error: Command denied by operator".into())
                    }
                    ApprovalOutcome::TimedOut => Some(
                        "Error: Approval request timed out; command not executed".into(),
                    ),
                }
            }
        }
    }

    /// Collect final output from a finished session.
    fn collect_output(session: &crate::process::ProcessSession) -> String {
        let output = session.full_output();
        let code = session.exit_code().unwrap_or(-1);

        let mut combined = if output.trim().is_empty() {
            "(no output)".to_string()
        } else {
            output
        };

        if code != 0 {
            combined.push_str(&format!("\nExit code: {code}"));
        }

        if combined.len() > MAX_OUTPUT_LEN {
            let remaining = combined.len() - MAX_OUTPUT_LEN;
            let mut cut = MAX_OUTPUT_LEN;
            while cut < combined.len() && !combined.is_char_boundary(cut) {
                cut += 1;
            }
            combined.truncate(cut);
            combined.push_str(&format!("\n... (truncated, {remaining} more chars)"));
        }

        combined
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Long-running commands can be \
         backgrounded: pass background=true for an immediate session handle, or yield_ms \
         to wait briefly before backgrounding. Use the process tool to manage sessions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory (defaults to workspace root)"
                },
                "background": {
                    "type": "boolean",
                    "description": "Run in the background and return a session handle immediately"
                },
                "yield_ms": {
                    "type": "integer",
                    "description": "Wait up to this many milliseconds, then background if still running"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Foreground timeout in seconds (overrides the default)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let cwd = optional_string(&params, "working_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.working_dir.clone());
        let background = optional_bool(&params, "background");
        let yield_ms = optional_i64(&params, "yield_ms").filter(|&ms| ms > 0);
        let timeout_secs =
            optional_i64(&params, "timeout").map_or(self.config.timeout, |t| t.max(1) as u64);

        // Guards run before every execution
        if let Some(err) = self.guard_command(&command, &cwd.to_string_lossy()) {
            return Ok(err);
        }

        // Approval policy layer
        if let Some(err) = self.check_policy(&command).await {
            return Ok(err);
        }

        info!(command = %command, cwd = %cwd.display(), "executing shell command");

        let session = self.sessions.start_session(&command, &cwd).await?;

        // Explicit background: hand back the session immediately
        if background {
            return Ok(format!(
                "Started in background. Session ID: {}, PID: {}",
                session.id,
                session.pid.map_or("?".to_string(), |p| p.to_string())
            ));
        }

        // Auto-yield: wait briefly, then background with a tail of output
        if let Some(ms) = yield_ms {
            if session.wait_for_exit(Duration::from_millis(ms as u64)).await {
                let output = Self::collect_output(&session);
                self.sessions.remove(&session.id).await;
                return Ok(output);
            }
            let tail = session.get_tail(YIELD_TAIL_CHARS);
            return Ok(format!(
                "Command still running. Session ID: {}, PID: {}\n\
                 Use the process tool to poll or kill it.\n\
                 --- output so far ---\n{tail}",
                session.id,
                session.pid.map_or("?".to_string(), |p| p.to_string())
            ));
        }

        // Foreground: bounded wait, kill on timeout
        if session
            .wait_for_exit(Duration::from_secs(timeout_secs))
            .await
        {
            let output = Self::collect_output(&session);
            self.sessions.remove(&session.id).await;
            Ok(output)
        } else {
            session.kill();
            self.sessions.remove(&session.id).await;
            Ok(format!("Error: Command timed out after {timeout_secs} seconds"))
        }
    }
}

// ─────────────────────────────────────────────
// Executable resolution
// ─────────────────────────────────────────────

/// Resolve the executable behind a command line to an absolute path when
/// possible (first shell word, searched on PATH with OS-specific executable
/// extensions). Falls back to the bare token.
pub fn resolve_executable(command: &str) -> String {
    let token = command
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c| c == '"' || c == '\'');

    if token.is_empty() {
        return String::new();
    }

    // Already a path
    if token.contains('/') || token.contains('\\') {
        let p = PathBuf::from(token);
        return p
            .canonicalize()
            .map(|c| c.to_string_lossy().to_string())
            .unwrap_or_else(|_| token.to_string());
    }

    let extensions: &[&str] = if cfg!(target_os = "windows") {
        &["", ".exe", ".cmd", ".bat"]
    } else {
        &[""]
    };

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for ext in extensions {
                let candidate = dir.join(format!("{token}{ext}"));
                if candidate.is_file() {
                    return candidate
                        .canonicalize()
                        .map(|c| c.to_string_lossy().to_string())
                        .unwrap_or_else(|_| candidate.to_string_lossy().to_string());
                }
            }
        }
    }

    token.to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
