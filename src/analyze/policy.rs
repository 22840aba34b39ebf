// src/analyze/policy.rs
use std::path::Path;

use crate::monitor::Snapshot;

/// Built-in analyst-voice instruction, used when no policy file is configured.
pub const DEFAULT_SYSTEM_POLICY: &str = "You are a professional onchain data analyst specializing in Base L2.
You analyze ecosystem data and identify the single most interesting insight.
Your analysis style: data-driven, no hype, written for a smart reader.

RULES for tweetDraft:
- Must include at least one specific number/metric
- No hype words or emoji
- No generic questions like \"what do you think?\"
- Keep it under 260 chars to leave room for links
- One insight per post. Specific > vague.";

const RESPONSE_SCHEMA: &str = r#"Analyze this data and return ONLY a valid JSON object (no markdown, no code fences):
{
  "category": "tvl|whale|trend|anomaly|bridge|protocol|stablecoin|chain",
  "summary": "One-line finding (< 100 chars)",
  "fullAnalysis": "2-3 sentence detailed analysis",
  "tweetDraft": "Ready-to-post text (< 260 chars)",
  "confidence": 1-10
}"#;

/// Instruction text sent alongside the data. Kept as configuration, not code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPolicy {
    pub system: String,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_POLICY.to_string(),
        }
    }
}

impl PromptPolicy {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let system = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading policy {}: {e}", path.display()))?;
        let system = system.trim().to_string();
        if system.is_empty() {
            anyhow::bail!("policy file {} is empty", path.display());
        }
        Ok(Self { system })
    }

    /// Load from `path` when given, else the built-in default.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn user_message(
        &self,
        current: &Snapshot,
        previous: Option<&Snapshot>,
    ) -> serde_json::Result<String> {
        let current_json = serde_json::to_string_pretty(current)?;
        let history = match previous {
            Some(p) => format!(
                "Previous snapshot (for comparison):\n{}",
                serde_json::to_string_pretty(p)?
            ),
            None => "No previous snapshot available (first run).".to_string(),
        };
        Ok(format!(
            "Here is the current ecosystem snapshot:\n{current_json}\n\n{history}\n\n{RESPONSE_SCHEMA}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn first_run_message_mentions_missing_history() {
        let policy = PromptPolicy::default();
        let msg = policy.user_message(&Snapshot::new(Utc::now()), None).unwrap();
        assert!(msg.contains("first run"));
        assert!(msg.contains("\"confidence\": 1-10"));
    }

    #[test]
    fn policy_file_overrides_default() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "  be terse  \n").unwrap();
        let p = PromptPolicy::load(Some(tmp.path())).unwrap();
        assert_eq!(p.system, "be terse");
    }
}
