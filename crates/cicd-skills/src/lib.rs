//! cicd-skills - Skill manifests, loading, and the skill registry
//!
//! A skill is a directory containing a frontmatter-prefixed markdown file:
//!
//! ```text
//! skills/code-review/skill.md
//!   ---
//!   name: code-review
//!   version: 1.2.0
//!   options:
//!     temperature: 0.2
//!   inputs:
//!     - name: focus
//!       type: string
//!       default: all
//!   ---
//!   Review the following changes, focusing on {{focus}}.
//! ```

pub mod loader;
pub mod manifest;
pub mod registry;
pub mod skill;

pub use loader::{LoadError, LoadOutcome, SkillLoader};
pub use manifest::{InputSpec, InputType, SkillManifest, SkillOptions, ToolPolicy};
pub use registry::SkillRegistry;
pub use skill::Skill;
