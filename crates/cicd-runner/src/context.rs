//! Context assembly — project rules, skill prompt, and chunked diffs.
//!
//! Every chunk is self-contained: it re-includes the project rules and the
//! substituted skill prompt so the agent never depends on cross-chunk
//! memory. Output is byte-for-byte deterministic for identical input.

use crate::chunk::{self, Chunk, ChunkPlan};
use crate::diff::{self, estimate_tokens, FileDiff, IgnoreRules};
use cicd_core::error::Result;
use cicd_core::types::DiffSource;
use cicd_skills::manifest::placeholder_pattern;
use cicd_skills::Skill;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Workspace-root instruction files, first match wins.
const RULES_FILES: &[&str] = &["CLAUDE.md", "AGENTS.md"];

const MISSING_VALUE: &str = "not provided";

#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    pub max_chunk_tokens: usize,
    pub diff_context: u32,
    pub exclude: Vec<String>,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            max_chunk_tokens: cicd_core::config::DEFAULT_MAX_CHUNK_TOKENS,
            diff_context: 3,
            exclude: Vec::new(),
        }
    }
}

pub struct ContextAssembler {
    workspace: PathBuf,
    options: AssemblerOptions,
    rules: IgnoreRules,
}

impl ContextAssembler {
    pub fn new(workspace: impl Into<PathBuf>, options: AssemblerOptions) -> Result<Self> {
        let rules = IgnoreRules::new(&options.exclude)?;
        Ok(Self {
            workspace: workspace.into(),
            options,
            rules,
        })
    }

    /// Assemble the chunk sequence for one dispatch. Returns an empty vector
    /// when the diff has no reviewable files.
    pub async fn assemble(
        &self,
        skill: &Skill,
        inputs: &BTreeMap<String, serde_json::Value>,
        source: &DiffSource,
    ) -> Result<Vec<Chunk>> {
        let diffs = diff::enumerate(
            &self.workspace,
            source,
            self.options.diff_context,
            &self.rules,
        )
        .await?;
        Ok(self.assemble_from_diffs(skill, inputs, &diffs))
    }

    /// Assembly from pre-enumerated diffs; pure and deterministic.
    pub fn assemble_from_diffs(
        &self,
        skill: &Skill,
        inputs: &BTreeMap<String, serde_json::Value>,
        diffs: &[FileDiff],
    ) -> Vec<Chunk> {
        let reviewable: Vec<FileDiff> = diffs
            .iter()
            .filter(|d| d.is_reviewable())
            .cloned()
            .collect();
        if reviewable.is_empty() {
            return Vec::new();
        }

        let project_rules = self.load_project_rules();
        let prompt = substitute_placeholders(skill.prompt(), skill, inputs);

        // The fixed scaffolding rides along in every chunk; files only get
        // the remaining budget.
        let overhead = estimate_tokens(&self.render(
            0,
            1,
            project_rules.as_deref(),
            &prompt,
            &ChunkPlan::default(),
        ));
        let budget = self
            .options
            .max_chunk_tokens
            .saturating_sub(overhead)
            .max(64);

        let plans = chunk::pack(&reviewable, budget);
        let total = plans.len();
        debug!(
            files = reviewable.len(),
            chunks = total,
            budget,
            "context assembled"
        );

        plans
            .into_iter()
            .enumerate()
            .map(|(index, plan)| {
                let truncated = plan.parts.iter().any(|p| p.is_truncated());
                let text = self.render(index, total, project_rules.as_deref(), &prompt, &plan);
                Chunk {
                    index,
                    total,
                    estimated_tokens: estimate_tokens(&text),
                    text,
                    truncated,
                }
            })
            .collect()
    }

    fn load_project_rules(&self) -> Option<String> {
        for name in RULES_FILES {
            let path = self.workspace.join(name);
            if let Ok(contents) = std::fs::read_to_string(&path) {
                if !contents.trim().is_empty() {
                    return Some(contents.trim_end().to_string());
                }
            }
        }
        None
    }

    /// Fixed assembly order: chunk header, project rules, skill prompt,
    /// concatenated diffs.
    fn render(
        &self,
        index: usize,
        total: usize,
        project_rules: Option<&str>,
        prompt: &str,
        plan: &ChunkPlan,
    ) -> String {
        let mut out = String::new();
        out.push_str(&format!("Context Chunk {}/{}\n\n", index + 1, total));

        if let Some(rules) = project_rules {
            out.push_str("## Project Rules\n\n");
            out.push_str(rules);
            out.push_str("\n\n");
        }

        out.push_str("## Skill Instructions\n\n");
        out.push_str(prompt.trim_end());
        out.push_str("\n\n## Changed Files\n\n");

        for part in &plan.parts {
            match part.part {
                Some((i, n)) => {
                    out.push_str(&format!("### {} (part {}/{}, truncated)\n\n", part.path, i, n))
                }
                None => out.push_str(&format!("### {}\n\n", part.path)),
            }
            out.push_str("```diff\n");
            out.push_str(&part.text);
            if !part.text.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n\n");
        }
        out
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{{name}}` occurrence, matching input names
/// case-insensitively so `{{focus}}` and `{{FOCUS}}` both substitute.
/// Unresolved placeholders become `<name not provided>`.
pub fn substitute_placeholders(
    prompt: &str,
    skill: &Skill,
    inputs: &BTreeMap<String, serde_json::Value>,
) -> String {
    let mut values: BTreeMap<String, String> = BTreeMap::new();
    for spec in skill.inputs() {
        if let Some(value) = inputs.get(&spec.name) {
            values.insert(spec.name.to_lowercase(), value_to_string(value));
        }
    }
    placeholder_pattern()
        .replace_all(prompt, |caps: &regex::Captures<'_>| {
            let key = caps[1].to_lowercase();
            values
                .get(&key)
                .cloned()
                .unwrap_or_else(|| format!("<{key} {MISSING_VALUE}>"))
        })
        .into_owned()
}
