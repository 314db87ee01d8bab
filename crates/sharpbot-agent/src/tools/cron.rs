//! Cron tool — add, list, and remove scheduled jobs.
//!
//! Talks to the external cron service. Holds a `(channel, chat_id)` context
//! set by the agent loop so delivered job results default to the current
//! conversation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use sharpbot_cron::{CronPayload, CronSchedule, CronService};

use super::base::{optional_bool, optional_i64, optional_string, require_string, Tool};

pub struct CronTool {
    service: Arc<CronService>,
    /// Default delivery target, set per turn by the agent loop.
    context: Mutex<(String, String)>,
}

impl CronTool {
    pub fn new(service: Arc<CronService>) -> Self {
        Self {
            service,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    /// Set the current context (called by the agent loop per turn).
    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }

    fn parse_schedule(params: &HashMap<String, Value>) -> anyhow::Result<CronSchedule> {
        if let Some(expr) = optional_string(params, "cron") {
            return Ok(CronSchedule::cron(expr));
        }
        if let Some(seconds) = optional_i64(params, "every_seconds") {
            if seconds <= 0 {
                anyhow::bail!("every_seconds must be positive");
            }
            return Ok(CronSchedule::every(seconds * 1000));
        }
        if let Some(at_ms) = optional_i64(params, "at_ms") {
            return Ok(CronSchedule::at(at_ms));
        }
        anyhow::bail!("Schedule required: provide cron, every_seconds, or at_ms")
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Manage scheduled jobs: add a recurring or one-shot job that sends a prompt to \
         the agent, list existing jobs, or remove one. Job results can be delivered to \
         the current conversation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove"],
                    "description": "What to do"
                },
                "name": {
                    "type": "string",
                    "description": "Job name (for add)"
                },
                "message": {
                    "type": "string",
                    "description": "Prompt the agent receives when the job fires (for add)"
                },
                "cron": {
                    "type": "string",
                    "description": "Cron expression schedule (for add)"
                },
                "every_seconds": {
                    "type": "integer",
                    "description": "Interval schedule in seconds (for add)"
                },
                "at_ms": {
                    "type": "integer",
                    "description": "One-shot schedule, Unix epoch milliseconds (for add)"
                },
                "deliver": {
                    "type": "boolean",
                    "description": "Deliver the job result to the current conversation"
                },
                "job_id": {
                    "type": "string",
                    "description": "Job id (for remove)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;

        match action.as_str() {
            "add" => {
                let name = require_string(&params, "name")?;
                let message = require_string(&params, "message")?;
                let schedule = Self::parse_schedule(&params)?;
                let deliver = optional_bool(&params, "deliver");

                let ctx = self.context.lock().await;
                let payload = CronPayload {
                    message,
                    deliver,
                    channel: deliver.then(|| ctx.0.clone()),
                    to: deliver.then(|| ctx.1.clone()),
                };
                drop(ctx);

                let job = self.service.add_job(&name, schedule, payload).await?;
                Ok(format!("Scheduled job '{}' (id: {})", job.name, job.id))
            }
            "list" => {
                let jobs = self.service.list_jobs().await;
                if jobs.is_empty() {
                    return Ok("No scheduled jobs.".into());
                }
                let lines: Vec<String> = jobs
                    .iter()
                    .map(|j| {
                        format!(
                            "{} [{}] {} — next run: {}",
                            j.id,
                            if j.enabled { "on" } else { "off" },
                            j.name,
                            j.state
                                .next_run_at_ms
                                .map_or("unscheduled".to_string(), |ms| ms.to_string())
                        )
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
            "remove" => {
                let id = require_string(&params, "job_id")?;
                if self.service.remove_job(&id).await? {
                    Ok(format!("Removed job {id}"))
                } else {
                    anyhow::bail!("No such job: {id}")
                }
            }
            other => anyhow::bail!("Unknown action: {other}"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
