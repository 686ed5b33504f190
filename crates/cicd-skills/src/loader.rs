//! Skill discovery and loading from disk.
//!
//! Layout: each skill is a directory whose name equals the skill's declared
//! name, containing `skill.md` (or `<dir-name>.md`) with a YAML frontmatter
//! block.

use crate::manifest::{split_frontmatter, SkillManifest};
use crate::skill::Skill;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid_frontmatter: {0}")]
    InvalidFrontmatter(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("skill `{declared}` does not match directory `{directory}`")]
    NameMismatch { declared: String, directory: String },

    #[error("no skill markdown in {}", .0.display())]
    MissingDocument(PathBuf),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a discovery pass: loaded skills alongside non-fatal per-skill
/// failures. One broken skill never aborts discovery.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub skills: Vec<Skill>,
    pub errors: Vec<(PathBuf, LoadError)>,
}

#[derive(Debug, Clone, Default)]
pub struct SkillLoader {
    roots: Vec<PathBuf>,
}

impl SkillLoader {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    /// Load one skill directory.
    pub fn load_dir(dir: &Path) -> Result<Skill, LoadError> {
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let document = Self::find_document(dir, &dir_name)?;
        let text = std::fs::read_to_string(&document)?;

        let (yaml, body) = split_frontmatter(&text).ok_or_else(|| {
            LoadError::InvalidFrontmatter(format!(
                "{}: missing `---` frontmatter block",
                document.display()
            ))
        })?;
        let manifest: SkillManifest = serde_yaml::from_str(yaml)
            .map_err(|e| LoadError::InvalidFrontmatter(format!("{}: {e}", document.display())))?;

        let prompt = body.trim_start_matches('\n').to_string();
        manifest
            .validate(&prompt)
            .map_err(LoadError::InvalidManifest)?;

        if manifest.name != dir_name {
            return Err(LoadError::NameMismatch {
                declared: manifest.name,
                directory: dir_name,
            });
        }

        debug!(skill = %manifest.name, version = %manifest.version, "skill loaded");
        Ok(Skill::new(manifest, prompt))
    }

    /// Scan every configured root. Immediate children that are directories
    /// are treated as skill candidates.
    pub fn discover(&self) -> LoadOutcome {
        let mut outcome = LoadOutcome::default();
        for root in &self.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "skill root missing, skipping");
                continue;
            }
            for entry in WalkDir::new(root)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_dir())
            {
                match Self::load_dir(entry.path()) {
                    Ok(skill) => outcome.skills.push(skill),
                    Err(e) => {
                        warn!(dir = %entry.path().display(), error = %e, "skill failed to load");
                        outcome.errors.push((entry.path().to_path_buf(), e));
                    }
                }
            }
        }
        outcome
    }

    fn find_document(dir: &Path, dir_name: &str) -> Result<PathBuf, LoadError> {
        let preferred = dir.join("skill.md");
        if preferred.is_file() {
            return Ok(preferred);
        }
        let named = dir.join(format!("{dir_name}.md"));
        if named.is_file() {
            return Ok(named);
        }
        Err(LoadError::MissingDocument(dir.to_path_buf()))
    }
}
