//! Skill manifest — the frontmatter block of a skill's markdown file.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;

/// `^[a-z0-9]+(-[a-z0-9]+)*$` — lowercase kebab-case, no leading, trailing,
/// or consecutive hyphens.
pub fn name_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("name regex"))
}

/// Placeholder occurrences in a prompt body: `{{name}}`.
pub fn placeholder_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"\{\{\s*([A-Za-z0-9_-]+)\s*\}\}").expect("placeholder regex")
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub options: SkillOptions,
    #[serde(default)]
    pub tools: ToolPolicy,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SkillOptions {
    /// Sampling temperature, 0..=2.
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff, 0..=1.
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u64>,
    pub reasoning_budget_tokens: Option<u64>,
    /// Per-invocation timeout override, duration string.
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolPolicy {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Int,
    Float,
    Bool,
    Array,
    Object,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether a JSON value is compatible with this declared type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl SkillManifest {
    /// Validate the manifest against a prompt body. Returns the first
    /// violation as a message.
    pub fn validate(&self, prompt: &str) -> Result<(), String> {
        if !name_pattern().is_match(&self.name) {
            return Err(format!(
                "name `{}` is not lowercase kebab-case",
                self.name
            ));
        }
        if self.version.trim().is_empty() {
            return Err("version must not be empty".into());
        }
        if let Some(t) = self.options.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(format!("options.temperature {t} outside 0..2"));
            }
        }
        if let Some(p) = self.options.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("options.top_p {p} outside 0..1"));
            }
        }

        let mut seen = HashSet::new();
        for input in &self.inputs {
            if input.name.trim().is_empty() {
                return Err("input name must not be empty".into());
            }
            if !seen.insert(input.name.to_lowercase()) {
                return Err(format!("duplicate input `{}`", input.name));
            }
            if let Some(ref default) = input.default {
                if !input.input_type.accepts(default) {
                    return Err(format!(
                        "default for `{}` is not a {}",
                        input.name,
                        input.input_type.as_str()
                    ));
                }
            }
        }

        // Every placeholder must reference a declared input.
        let declared: HashSet<String> =
            self.inputs.iter().map(|i| i.name.to_lowercase()).collect();
        for cap in placeholder_pattern().captures_iter(prompt) {
            let name = cap[1].to_lowercase();
            if !declared.contains(&name) {
                return Err(format!("prompt references undeclared input `{{{{{name}}}}}`"));
            }
        }

        Ok(())
    }
}

/// Split a markdown document into its frontmatter YAML fragment and body.
///
/// The document must start with a `---` line; the fragment runs to the next
/// `---` line. Returns `None` when either delimiter is missing.
pub fn split_frontmatter(document: &str) -> Option<(&str, &str)> {
    let rest = document.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    // Find the closing delimiter at start of line.
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}
