//! A loaded, immutable skill and its input resolution.

use crate::manifest::{InputSpec, SkillManifest, SkillOptions, ToolPolicy};
use cicd_core::error::{Error, Result};
use std::collections::BTreeMap;

/// A reusable unit of instruction: manifest metadata plus the prompt
/// template. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Skill {
    manifest: SkillManifest,
    prompt: String,
}

impl Skill {
    pub(crate) fn new(manifest: SkillManifest, prompt: String) -> Self {
        Self { manifest, prompt }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn description(&self) -> Option<&str> {
        self.manifest.description.as_deref()
    }

    pub fn options(&self) -> &SkillOptions {
        &self.manifest.options
    }

    pub fn tools(&self) -> &ToolPolicy {
        &self.manifest.tools
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.manifest.inputs
    }

    /// Markdown prompt body with `{{name}}` placeholders.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Build the effective input map: defaults first, then provided values.
    ///
    /// Fails with `invalid_input` when a provided key is undeclared, a
    /// provided value has the wrong type, or a required input ends up absent.
    pub fn resolve_inputs(
        &self,
        provided: &BTreeMap<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let mut resolved = BTreeMap::new();
        for input in &self.manifest.inputs {
            if let Some(ref default) = input.default {
                resolved.insert(input.name.clone(), default.clone());
            }
        }

        for (key, value) in provided {
            let spec = self
                .manifest
                .inputs
                .iter()
                .find(|i| i.name == *key)
                .ok_or_else(|| {
                    Error::invalid_input(format!(
                        "skill `{}` has no input `{key}`",
                        self.manifest.name
                    ))
                })?;
            if !spec.input_type.accepts(value) {
                return Err(Error::invalid_input(format!(
                    "input `{key}` expects {}, got {}",
                    spec.input_type.as_str(),
                    json_kind(value)
                )));
            }
            resolved.insert(key.clone(), value.clone());
        }

        for input in &self.manifest.inputs {
            if input.required && !resolved.contains_key(&input.name) {
                return Err(Error::invalid_input(format!(
                    "required input `{}` missing for skill `{}`",
                    input.name, self.manifest.name
                )));
            }
        }

        Ok(resolved)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
