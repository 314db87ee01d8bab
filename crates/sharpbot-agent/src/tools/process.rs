//! Process tool — manage background sessions started by the exec tool.
//!
//! Actions: `list | poll | log | write | kill | clear | remove`.
//! `poll` returns only output accumulated since the previous poll.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{optional_bool, optional_i64, require_string, Tool};
use crate::process::ProcessSessionManager;

/// Default line count for the `log` action.
const DEFAULT_LOG_LIMIT: usize = 100;

/// Default tail size shown in listings.
const LIST_TAIL_CHARS: usize = 120;

pub struct ProcessTool {
    sessions: Arc<ProcessSessionManager>,
}

impl ProcessTool {
    pub fn new(sessions: Arc<ProcessSessionManager>) -> Self {
        Self { sessions }
    }

    async fn action_list(&self) -> String {
        let sessions = self.sessions.list().await;
        if sessions.is_empty() {
            return "No process sessions.".into();
        }

        let mut lines = Vec::new();
        for s in sessions {
            let status = match s.exit_code() {
                Some(code) => format!("exited ({code})"),
                None => "running".into(),
            };
            let tail = s.get_tail(LIST_TAIL_CHARS).replace('\n', " ");
            lines.push(format!(
                "{} [{}] {} — {}\n  last output: {}",
                s.id,
                status,
                s.name,
                s.command,
                if tail.is_empty() { "(none)" } else { &tail }
            ));
        }
        lines.join("\n")
    }

    async fn require_session(
        &self,
        params: &HashMap<String, Value>,
    ) -> anyhow::Result<Arc<crate::process::ProcessSession>> {
        let id = require_string(params, "session_id")?;
        self.sessions
            .get(&id)
            .await
            .ok_or_else(|| anyhow::anyhow!("No such session: {id}"))
    }
}

#[async_trait]
impl Tool for ProcessTool {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Manage background process sessions started by exec: list them, poll new output, \
         read the log, write to stdin, kill, clear finished sessions, or remove one."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"],
                    "description": "What to do"
                },
                "session_id": {
                    "type": "string",
                    "description": "Target session (required for poll/log/write/kill/remove)"
                },
                "data": {
                    "type": "string",
                    "description": "Data for the write action"
                },
                "eof": {
                    "type": "boolean",
                    "description": "Close stdin after writing"
                },
                "offset": {
                    "type": "integer",
                    "description": "Log line offset; negative counts from the end"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum log lines to return (default 100)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;

        match action.as_str() {
            "list" => Ok(self.action_list().await),
            "poll" => {
                let session = self.require_session(&params).await?;
                let output = session.poll_new_output();
                let status = match session.exit_code() {
                    Some(code) => format!(" (exited: {code})"),
                    None => String::new(),
                };
                if output.is_empty() {
                    Ok(format!("(no new output){status}"))
                } else {
                    Ok(format!("{output}{status}"))
                }
            }
            "log" => {
                let session = self.require_session(&params).await?;
                let offset = optional_i64(&params, "offset").unwrap_or(0);
                let limit =
                    optional_i64(&params, "limit").map_or(DEFAULT_LOG_LIMIT, |l| l.max(1) as usize);
                let log = session.get_log(offset, limit);
                if log.is_empty() {
                    Ok("(empty log)".into())
                } else {
                    Ok(log)
                }
            }
            "write" => {
                let session = self.require_session(&params).await?;
                let data = require_string(&params, "data")?;
                let eof = optional_bool(&params, "eof");
                session.write_stdin(&data, eof).await?;
                Ok(format!("Wrote {} bytes to session {}", data.len(), session.id))
            }
            "kill" => {
                let session = self.require_session(&params).await?;
                session.kill();
                Ok(format!("Kill signal sent to session {}", session.id))
            }
            "clear" => {
                let cleared = self.sessions.clear_finished().await;
                Ok(format!("Cleared {cleared} finished session(s)"))
            }
            "remove" => {
                let id = require_string(&params, "session_id")?;
                if self.sessions.remove(&id).await {
                    Ok(format!("Removed session {id}"))
                } else {
                    anyhow::bail!("No such session: {id}")
                }
            }
            other => anyhow::bail!("Unknown action: {other}"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_tool() -> (ProcessTool, Arc<ProcessSessionManager>) {
        let sessions = Arc::new(ProcessSessionManager::default());
        (ProcessTool::new(sessions.clone()), sessions)
    }

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_list_empty() {
        let (tool, _) = make_tool();
        let result = tool
            .execute(params(&[("action", json!("list"))]))
            .await
            .unwrap();
        assert_eq!(result, "No process sessions.");
    }

    #[tokio::test]
    async fn test_list_shows_session() {
        let (tool, sessions) = make_tool();
        let dir = tempfile::tempdir().unwrap();
        let session = sessions.start_session("sleep 30", dir.path()).await.unwrap();

        let result = tool
            .execute(params(&[("action", json!("list"))]))
            .await
            .unwrap();
        assert!(result.contains(&session.id));
        assert!(result.contains("running"));

        session.kill();
    }

    #[tokio::test]
    async fn test_poll_returns_incremental_output() {
        let (tool, sessions) = make_tool();
        let dir = tempfile::tempdir().unwrap();
        let session = sessions
            .start_session("echo first-chunk", dir.path())
            .await
            .unwrap();
        session.wait_for_exit(Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = tool
            .execute(params(&[
                ("action", json!("poll")),
                ("session_id", json!(session.id)),
            ]))
            .await
            .unwrap();
        assert!(first.contains("first-chunk"));

        let second = tool
            .execute(params(&[
                ("action", json!("poll")),
                ("session_id", json!(session.id)),
            ]))
            .await
            .unwrap();
        assert!(second.contains("no new output"));
    }

    #[tokio::test]
    async fn test_log_action() {
        let (tool, sessions) = make_tool();
        let dir = tempfile::tempdir().unwrap();
        let session = sessions
            .start_session("printf 'a\\nb\\nc\\n'", dir.path())
            .await
            .unwrap();
        session.wait_for_exit(Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = tool
            .execute(params(&[
                ("action", json!("log")),
                ("session_id", json!(session.id)),
                ("offset", json!(-2)),
            ]))
            .await
            .unwrap();
        assert_eq!(result, "b\nc");
    }

    #[tokio::test]
    async fn test_kill_and_remove() {
        let (tool, sessions) = make_tool();
        let dir = tempfile::tempdir().unwrap();
        let session = sessions.start_session("sleep 30", dir.path()).await.unwrap();

        let result = tool
            .execute(params(&[
                ("action", json!("kill")),
                ("session_id", json!(session.id)),
            ]))
            .await
            .unwrap();
        assert!(result.contains("Kill signal sent"));
        assert!(session.wait_for_exit(Duration::from_secs(5)).await);

        let result = tool
            .execute(params(&[
                ("action", json!("remove")),
                ("session_id", json!(session.id)),
            ]))
            .await
            .unwrap();
        assert!(result.contains("Removed"));
        assert!(sessions.get(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_action() {
        let (tool, sessions) = make_tool();
        let dir = tempfile::tempdir().unwrap();
        let session = sessions.start_session("true", dir.path()).await.unwrap();
        session.wait_for_exit(Duration::from_secs(5)).await;

        let result = tool
            .execute(params(&[("action", json!("clear"))]))
            .await
            .unwrap();
        assert!(result.contains("Cleared 1"));
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let (tool, _) = make_tool();
        let result = tool
            .execute(params(&[
                ("action", json!("poll")),
                ("session_id", json!("nope")),
            ]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_action_errors() {
        let (tool, _) = make_tool();
        let result = tool
            .execute(params(&[("action", json!("explode"))]))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_tool_definition() {
        let (tool, _) = make_tool();
        let def = tool.to_definition();
        assert_eq!(def.function.name, "process");
    }
}
