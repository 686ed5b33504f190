//! Tests for cicd-skills: discovery from disk, registry behavior, input
//! resolution

use cicd_core::ErrorCode;
use cicd_skills::{SkillLoader, SkillRegistry};
use std::collections::BTreeMap;
use std::path::Path;

fn write_skill(root: &Path, dir: &str, contents: &str) {
    let skill_dir = root.join(dir);
    std::fs::create_dir_all(&skill_dir).unwrap();
    std::fs::write(skill_dir.join("skill.md"), contents).unwrap();
}

const CODE_REVIEW: &str = r#"---
name: code-review
version: 1.2.0
description: Review a diff for defects
options:
  temperature: 0.2
  timeout: 3m
tools:
  allow: ["Read", "Grep"]
inputs:
  - name: focus
    type: string
    default: all
  - name: max-findings
    type: int
    required: true
---
Review the changes below. Focus: {{focus}}. Report at most {{max-findings}} findings.
"#;

// ===========================================================================
// Discovery → registry → resolution, end to end
// ===========================================================================

#[test]
fn discover_register_resolve() {
    let tmp = tempfile::tempdir().unwrap();
    write_skill(tmp.path(), "code-review", CODE_REVIEW);

    let registry = SkillRegistry::new();
    let outcome = registry.load_from(&SkillLoader::new([tmp.path().to_path_buf()]));
    assert!(outcome.errors.is_empty());
    assert_eq!(registry.list(), vec!["code-review"]);

    let skill = registry.get("code-review").unwrap();
    assert_eq!(skill.version(), "1.2.0");
    assert_eq!(skill.options().temperature, Some(0.2));
    assert_eq!(skill.tools().allow, vec!["Read", "Grep"]);

    let provided = BTreeMap::from([("max-findings".to_string(), serde_json::json!(20))]);
    let resolved = skill.resolve_inputs(&provided).unwrap();
    assert_eq!(resolved["focus"], serde_json::json!("all"));
    assert_eq!(resolved["max-findings"], serde_json::json!(20));
}

// ===========================================================================
// P12: resolve_inputs fails iff required missing or unknown present
// ===========================================================================

#[test]
fn resolution_error_conditions_are_exact() {
    let tmp = tempfile::tempdir().unwrap();
    write_skill(tmp.path(), "code-review", CODE_REVIEW);
    let skill = SkillLoader::load_dir(&tmp.path().join("code-review")).unwrap();

    // Required missing → invalid_input
    let err = skill.resolve_inputs(&BTreeMap::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);

    // Unknown present → invalid_input
    let provided = BTreeMap::from([
        ("max-findings".to_string(), serde_json::json!(5)),
        ("mystery".to_string(), serde_json::json!(true)),
    ]);
    let err = skill.resolve_inputs(&provided).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);

    // Exactly the declared set → ok
    let provided = BTreeMap::from([
        ("focus".to_string(), serde_json::json!("security")),
        ("max-findings".to_string(), serde_json::json!(5)),
    ]);
    assert!(skill.resolve_inputs(&provided).is_ok());
}

// ===========================================================================
// Broken neighbours never abort discovery
// ===========================================================================

#[test]
fn one_bad_skill_does_not_poison_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    write_skill(tmp.path(), "code-review", CODE_REVIEW);
    write_skill(tmp.path(), "Bad_Name", "---\nname: Bad_Name\nversion: '1'\n---\nx\n");
    write_skill(tmp.path(), "empty", "");

    let registry = SkillRegistry::new();
    let outcome = registry.load_from(&SkillLoader::new([tmp.path().to_path_buf()]));
    assert_eq!(outcome.skills.len(), 1);
    assert_eq!(outcome.errors.len(), 2);
    assert!(registry.contains("code-review"));
}
