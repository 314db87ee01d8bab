//! load_skill tool — progressive skill loading.
//!
//! The system prompt lists available skills by name and description only;
//! the agent calls this tool to pull in a skill's full instructions.
//! Unavailable skills are refused with their stored reason.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_string, Tool};
use crate::skills::SkillsLoader;

pub struct LoadSkillTool {
    skills: Arc<SkillsLoader>,
}

impl LoadSkillTool {
    pub fn new(skills: Arc<SkillsLoader>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for LoadSkillTool {
    fn name(&self) -> &str {
        "load_skill"
    }

    fn description(&self) -> &str {
        "Load the full instructions of an available skill by name. The system prompt \
         lists which skills exist; call this before using one that is not already active."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the skill to load (case-insensitive)"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let name = require_string(&params, "name")?;

        let status = self
            .skills
            .skill_status(&name)
            .ok_or_else(|| anyhow::anyhow!("Unknown skill: {name}"))?;

        if !status.available {
            anyhow::bail!(
                "Skill '{}' is unavailable: {}",
                status.name,
                status.reason.as_deref().unwrap_or("requirements not met")
            );
        }

        let content = self
            .skills
            .load_skill_content(&name)
            .ok_or_else(|| anyhow::anyhow!("Failed to read skill: {name}"))?;

        Ok(format!("## Skill: {}\n\n{}", status.name, content))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
