//! Diff enumeration and pruning.
//!
//! Changed files come from git (working copy or a commit pair). Each file is
//! classified before any of it can reach a chunk: lockfile globs, vendored
//! directory prefixes, binary extensions, a binary-content heuristic, and a
//! 1 MiB size cap all mark a file ignored. Ignored files are removed from
//! consideration entirely.

use cicd_core::error::{Error, Result};
use cicd_core::types::DiffSource;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

pub const MAX_FILE_BYTES: usize = 1024 * 1024;

/// Lockfiles and other generated single files.
const IGNORE_GLOBS: &[&str] = &[
    "*.lock",
    "go.sum",
    "yarn.lock",
    "pnpm-lock.yaml",
    "package-lock.json",
    "composer.lock",
    "Gemfile.lock",
    "*.min.js",
    "*.min.css",
];

/// Vendored and build-output trees.
const IGNORE_PREFIXES: &[&str] = &[
    "vendor/",
    "node_modules/",
    "dist/",
    "build/",
    "target/",
    ".idea/",
    ".vscode/",
    ".git/",
];

/// Binary file extensions.
const IGNORE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "bmp", "webp", "exe", "so", "dll", "dylib", "a", "o",
    "bin", "zip", "tar", "gz", "bz2", "xz", "7z", "pdf", "woff", "woff2", "ttf", "otf", "eot",
    "mp3", "mp4", "avi", "mov", "jar", "class", "wasm", "pyc",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Text,
    Binary,
    Ignored,
}

/// One file's change set.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub bytes: usize,
    pub estimated_tokens: usize,
    pub patch: String,
    pub class: FileClass,
}

impl FileDiff {
    pub fn is_reviewable(&self) -> bool {
        self.class == FileClass::Text
    }
}

/// `chars / 4 ≈ tokens`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Compiled ignore rules: built-ins plus config-supplied extra globs.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    globs: GlobSet,
    extra: GlobSet,
}

impl IgnoreRules {
    pub fn new(extra_globs: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in IGNORE_GLOBS {
            builder.add(Glob::new(pattern).map_err(|e| Error::invalid_input(e.to_string()))?);
        }
        let globs = builder
            .build()
            .map_err(|e| Error::invalid_input(e.to_string()))?;

        let mut builder = GlobSetBuilder::new();
        for pattern in extra_globs {
            builder.add(
                Glob::new(pattern)
                    .map_err(|e| Error::invalid_input(format!("exclude `{pattern}`: {e}")))?,
            );
        }
        let extra = builder
            .build()
            .map_err(|e| Error::invalid_input(e.to_string()))?;

        Ok(Self { globs, extra })
    }

    /// Classify a file by path and patch content.
    pub fn classify(&self, path: &str, patch: &str) -> FileClass {
        let normalized = path.replace('\\', "/");

        if IGNORE_PREFIXES
            .iter()
            .any(|prefix| normalized.starts_with(prefix) || normalized.contains(&format!("/{prefix}")))
        {
            return FileClass::Ignored;
        }

        let file_name = Path::new(&normalized)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.globs.is_match(&file_name) || self.globs.is_match(&normalized) {
            return FileClass::Ignored;
        }
        if self.extra.is_match(&file_name) || self.extra.is_match(&normalized) {
            return FileClass::Ignored;
        }

        if let Some(ext) = Path::new(&normalized).extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if IGNORE_EXTENSIONS.contains(&ext.as_str()) {
                return FileClass::Binary;
            }
        }

        if patch.len() > MAX_FILE_BYTES {
            return FileClass::Ignored;
        }

        // Content heuristic: git's own marker, or raw NUL bytes in the patch.
        if patch.contains("Binary files ") || patch.contains("GIT binary patch") {
            return FileClass::Binary;
        }
        if patch.bytes().any(|b| b == 0) {
            return FileClass::Binary;
        }

        FileClass::Text
    }
}

/// Split a unified diff into per-file sections. Pure; the git subprocess and
/// platform-provided diffs both feed through here.
pub fn split_unified_diff(diff: &str) -> Vec<(String, String)> {
    let mut files = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current_body = String::new();

    for line in diff.lines() {
        if let Some(header) = line.strip_prefix("diff --git ") {
            if let Some(path) = current_path.take() {
                files.push((path, std::mem::take(&mut current_body)));
            }
            current_path = Some(parse_git_header_path(header));
        }
        if current_path.is_some() {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if let Some(path) = current_path.take() {
        files.push((path, current_body));
    }
    files
}

/// `a/src/main.rs b/src/main.rs` → `src/main.rs` (the post-image side).
fn parse_git_header_path(header: &str) -> String {
    header
        .rsplit(' ')
        .next()
        .map(|side| side.strip_prefix("b/").unwrap_or(side))
        .unwrap_or(header)
        .to_string()
}

/// Enumerate changed files from source control, classified and estimated.
pub async fn enumerate(
    workspace: &Path,
    source: &DiffSource,
    context_lines: u32,
    rules: &IgnoreRules,
) -> Result<Vec<FileDiff>> {
    let mut args: Vec<String> = vec![
        "diff".into(),
        "--no-color".into(),
        format!("-U{context_lines}"),
    ];
    match source {
        DiffSource::WorkingTree { staged } => {
            if *staged {
                args.push("--cached".into());
            }
        }
        DiffSource::Commits { base, head } => {
            args.push(format!("{base}..{head}"));
        }
    }

    let output = Command::new("git")
        .args(&args)
        .current_dir(workspace)
        .output()
        .await
        .map_err(|e| Error::Unknown(format!("git diff: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::workspace_invalid(format!(
            "git diff failed: {}",
            stderr.trim()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout).to_string();
    Ok(from_diff_text(&text, rules))
}

/// Classify and estimate every file section of a unified diff.
pub fn from_diff_text(diff: &str, rules: &IgnoreRules) -> Vec<FileDiff> {
    let mut diffs: Vec<FileDiff> = split_unified_diff(diff)
        .into_iter()
        .map(|(path, patch)| {
            let class = rules.classify(&path, &patch);
            let estimated_tokens = estimate_tokens(&patch);
            FileDiff {
                bytes: patch.len(),
                estimated_tokens,
                path,
                patch,
                class,
            }
        })
        .collect();
    // Deterministic base ordering before any packing decisions.
    diffs.sort_by(|a, b| a.path.cmp(&b.path));
    let pruned = diffs.iter().filter(|d| !d.is_reviewable()).count();
    if pruned > 0 {
        debug!(total = diffs.len(), pruned, "diff enumeration pruned files");
    }
    diffs
}
