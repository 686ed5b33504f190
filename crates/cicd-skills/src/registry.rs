//! Thread-safe skill registry.
//!
//! Reads dominate (every dispatch resolves a skill), so the map sits behind
//! a `RwLock`: shared `get`/`list`, exclusive `register`/`unregister`/`clear`.

use crate::loader::{LoadOutcome, SkillLoader};
use crate::skill::Skill;
use cicd_core::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<Skill>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill. Replaces any existing skill with the same name.
    pub fn register(&self, skill: Skill) {
        let name = skill.name().to_string();
        self.skills
            .write()
            .expect("skill registry poisoned")
            .insert(name, Arc::new(skill));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.skills
            .write()
            .expect("skill registry poisoned")
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Result<Arc<Skill>> {
        self.skills
            .read()
            .expect("skill registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SkillNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills
            .read()
            .expect("skill registry poisoned")
            .contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .skills
            .read()
            .expect("skill registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.skills.read().expect("skill registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.skills
            .write()
            .expect("skill registry poisoned")
            .clear();
    }

    /// Run a discovery pass and register everything it finds. Per-skill
    /// failures come back in the outcome; they never abort the load.
    pub fn load_from(&self, loader: &SkillLoader) -> LoadOutcome {
        let outcome = loader.discover();
        for skill in &outcome.skills {
            self.register(skill.clone());
        }
        info!(
            loaded = outcome.skills.len(),
            failed = outcome.errors.len(),
            "skill discovery complete"
        );
        outcome
    }
}
