//! Chunk planning — descending first-fit bin packing under a token budget.
//!
//! Surviving files are sorted by `(estimated_tokens desc, path asc)` and
//! walked in order: a file goes into the current chunk when it fits,
//! otherwise the chunk is sealed and a new one starts. A single file over
//! the budget is split at hunk boundaries, then line boundaries, each part
//! flagged for a truncation header.

use crate::diff::{estimate_tokens, FileDiff};

/// A file's contribution to one chunk. `part` is set when the file had to be
/// split: `(index, total)`, 1-based.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub path: String,
    pub text: String,
    pub tokens: usize,
    pub part: Option<(usize, usize)>,
}

impl FilePart {
    pub fn is_truncated(&self) -> bool {
        self.part.is_some()
    }
}

/// Planned contents of one chunk, before rendering.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlan {
    pub parts: Vec<FilePart>,
    pub tokens: usize,
}

/// Rendered chunk ready for one agent invocation.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based sequence index.
    pub index: usize,
    pub total: usize,
    pub text: String,
    pub estimated_tokens: usize,
    /// Contains at least one split file part.
    pub truncated: bool,
}

/// Pack reviewable diffs into plans bounded by `budget` tokens.
pub fn pack(files: &[FileDiff], budget: usize) -> Vec<ChunkPlan> {
    let budget = budget.max(1);
    let mut sorted: Vec<&FileDiff> = files.iter().collect();
    sorted.sort_by(|a, b| {
        b.estimated_tokens
            .cmp(&a.estimated_tokens)
            .then_with(|| a.path.cmp(&b.path))
    });

    let mut plans: Vec<ChunkPlan> = Vec::new();
    let mut current = ChunkPlan::default();

    let push_part = |plans: &mut Vec<ChunkPlan>, current: &mut ChunkPlan, part: FilePart| {
        if !current.parts.is_empty() && current.tokens + part.tokens > budget {
            plans.push(std::mem::take(current));
        }
        current.tokens += part.tokens;
        current.parts.push(part);
    };

    for file in sorted {
        if file.estimated_tokens > budget {
            for part in split_file(file, budget) {
                push_part(&mut plans, &mut current, part);
            }
        } else {
            push_part(
                &mut plans,
                &mut current,
                FilePart {
                    path: file.path.clone(),
                    text: file.patch.clone(),
                    tokens: file.estimated_tokens,
                    part: None,
                },
            );
        }
    }
    if !current.parts.is_empty() {
        plans.push(current);
    }
    plans
}

/// Split an oversized file at hunk boundaries first, line boundaries second.
fn split_file(file: &FileDiff, budget: usize) -> Vec<FilePart> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for segment in hunks(&file.patch) {
        let segment_tokens = estimate_tokens(&segment);
        if segment_tokens > budget {
            // A single hunk over budget: flush, then split it by lines.
            if !current.is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            sections.extend(split_lines(&segment, budget));
            continue;
        }
        if !current.is_empty() && estimate_tokens(&current) + segment_tokens > budget {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(&segment);
    }
    if !current.is_empty() {
        sections.push(current);
    }

    let total = sections.len().max(1);
    sections
        .into_iter()
        .enumerate()
        .map(|(i, text)| FilePart {
            path: file.path.clone(),
            tokens: estimate_tokens(&text),
            text,
            part: Some((i + 1, total)),
        })
        .collect()
}

/// Segment a patch into its file header and `@@` hunks, each segment keeping
/// its trailing newlines.
fn hunks(patch: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in patch.split_inclusive('\n') {
        if line.starts_with("@@") && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn split_lines(text: &str, budget: usize) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if !current.is_empty() && estimate_tokens(&current) + estimate_tokens(line) > budget {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FileClass;

    fn file(path: &str, tokens: usize) -> FileDiff {
        // 4 chars per token
        let patch = "x".repeat(tokens * 4);
        FileDiff {
            path: path.into(),
            bytes: patch.len(),
            estimated_tokens: tokens,
            patch,
            class: FileClass::Text,
        }
    }

    #[test]
    fn everything_fits_in_one_chunk() {
        let files = vec![file("a.rs", 100), file("b.rs", 200)];
        let plans = pack(&files, 1_000);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].parts.len(), 2);
        // Descending token order
        assert_eq!(plans[0].parts[0].path, "b.rs");
    }

    #[test]
    fn overflow_seals_chunk() {
        let files = vec![file("a.rs", 600), file("b.rs", 600)];
        let plans = pack(&files, 1_000);
        assert_eq!(plans.len(), 2);
        for plan in &plans {
            assert!(plan.tokens <= 1_000);
        }
    }

    #[test]
    fn sort_is_deterministic_on_ties() {
        let files = vec![file("zeta.rs", 100), file("alpha.rs", 100)];
        let plans = pack(&files, 1_000);
        assert_eq!(plans[0].parts[0].path, "alpha.rs");
        assert_eq!(plans[0].parts[1].path, "zeta.rs");
    }

    #[test]
    fn oversized_file_splits_at_hunks() {
        let mut patch = String::from("diff --git a/big.rs b/big.rs\n--- a/big.rs\n+++ b/big.rs\n");
        for h in 0..4 {
            patch.push_str(&format!("@@ -{h},10 +{h},10 @@\n"));
            for _ in 0..10 {
                patch.push_str("+aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n");
            }
        }
        let tokens = estimate_tokens(&patch);
        let fd = FileDiff {
            path: "big.rs".into(),
            bytes: patch.len(),
            estimated_tokens: tokens,
            patch,
            class: FileClass::Text,
        };
        // Budget forces at least two parts
        let plans = pack(std::slice::from_ref(&fd), tokens / 2);
        let parts: Vec<&FilePart> = plans.iter().flat_map(|p| &p.parts).collect();
        assert!(parts.len() >= 2);
        let (_, total) = parts[0].part.unwrap();
        assert_eq!(total, parts.len());
        for part in &parts {
            assert!(part.is_truncated());
            assert!(part.text.len() > 0);
        }
        // Nothing lost in the split
        let rejoined: String = parts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(estimate_tokens(&rejoined), tokens);
    }

    #[test]
    fn giant_single_hunk_splits_at_lines() {
        let mut patch = String::from("@@ -1,100 +1,100 @@\n");
        for _ in 0..100 {
            patch.push_str("+bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n");
        }
        let tokens = estimate_tokens(&patch);
        let fd = FileDiff {
            path: "hunk.rs".into(),
            bytes: patch.len(),
            estimated_tokens: tokens,
            patch,
            class: FileClass::Text,
        };
        let budget = tokens / 3;
        let plans = pack(std::slice::from_ref(&fd), budget);
        let parts: Vec<&FilePart> = plans.iter().flat_map(|p| &p.parts).collect();
        assert!(parts.len() >= 3);
        for part in &parts {
            assert!(part.tokens <= budget, "{} > {budget}", part.tokens);
        }
    }

    #[test]
    fn empty_input_gives_no_chunks() {
        assert!(pack(&[], 1_000).is_empty());
    }
}
