// Language registry: the static table of per-language execution recipes

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;

use crate::types::Language;

/// Immutable per-language description of how to compile and run a submission.
///
/// Commands are argument-token vectors handed verbatim to the container
/// driver. All file names are relative to the fixed in-container working
/// directory (`/work`), which is the bind-mounted host job directory.
#[derive(Debug, Clone, Serialize)]
pub struct LanguageRecipe {
    pub language: Language,
    pub image: String,
    /// Name the submitted source is written to inside the working directory
    pub source_filename: String,
    /// Present only for compiled languages; runs before `run_command`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
    pub run_timeout_ms: u64,
    pub compile_timeout_ms: u64,
    pub memory_limit_mib: u64,
    pub cpu_quota: f64,
}

impl LanguageRecipe {
    pub fn requires_compilation(&self) -> bool {
        self.compile_command.is_some()
    }
}

/// Process-wide read-only recipe table, built once at startup.
/// Lookup is constant-time; unknown identifiers are rejected at the API edge.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    recipes: HashMap<Language, LanguageRecipe>,
}

fn tokens(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl LanguageRegistry {
    /// The built-in recipe table.
    ///
    /// Java follows a fixed source convention: the file is always
    /// `Main.java` and the entry point is the `Main` class, so the run
    /// command is fully determined without inspecting the source.
    pub fn builtin() -> Self {
        let mut recipes = HashMap::new();

        for recipe in [
            LanguageRecipe {
                language: Language::Python3,
                image: "python:3.11-slim".to_string(),
                source_filename: "solution.py".to_string(),
                compile_command: None,
                run_command: tokens(&["python3", "solution.py"]),
                run_timeout_ms: 5_000,
                compile_timeout_ms: 15_000,
                memory_limit_mib: 256,
                cpu_quota: 1.0,
            },
            LanguageRecipe {
                language: Language::Javascript,
                image: "node:20-slim".to_string(),
                source_filename: "solution.js".to_string(),
                compile_command: None,
                run_command: tokens(&["node", "solution.js"]),
                run_timeout_ms: 5_000,
                compile_timeout_ms: 15_000,
                memory_limit_mib: 256,
                cpu_quota: 1.0,
            },
            LanguageRecipe {
                language: Language::Java,
                image: "eclipse-temurin:21-jdk".to_string(),
                source_filename: "Main.java".to_string(),
                compile_command: Some(tokens(&["javac", "Main.java"])),
                run_command: tokens(&["java", "-cp", ".", "Main"]),
                run_timeout_ms: 10_000,
                compile_timeout_ms: 15_000,
                memory_limit_mib: 512,
                cpu_quota: 1.0,
            },
            LanguageRecipe {
                language: Language::Cpp,
                image: "gcc:13".to_string(),
                source_filename: "solution.cpp".to_string(),
                compile_command: Some(tokens(&[
                    "g++",
                    "-O2",
                    "-std=c++17",
                    "-o",
                    "solution",
                    "solution.cpp",
                ])),
                run_command: tokens(&["./solution"]),
                run_timeout_ms: 5_000,
                compile_timeout_ms: 15_000,
                memory_limit_mib: 256,
                cpu_quota: 1.0,
            },
            LanguageRecipe {
                language: Language::C,
                image: "gcc:13".to_string(),
                source_filename: "solution.c".to_string(),
                compile_command: Some(tokens(&[
                    "gcc",
                    "-O2",
                    "-std=c17",
                    "-o",
                    "solution",
                    "solution.c",
                ])),
                run_command: tokens(&["./solution"]),
                run_timeout_ms: 5_000,
                compile_timeout_ms: 15_000,
                memory_limit_mib: 256,
                cpu_quota: 1.0,
            },
        ] {
            recipes.insert(recipe.language, recipe);
        }

        Self { recipes }
    }

    /// Get the recipe for a specific language
    pub fn get(&self, language: Language) -> Result<&LanguageRecipe> {
        self.recipes
            .get(&language)
            .ok_or_else(|| anyhow!("no recipe registered for language: {}", language))
    }

    /// List all registered languages
    pub fn list(&self) -> Vec<&LanguageRecipe> {
        let mut all: Vec<&LanguageRecipe> = self.recipes.values().collect();
        all.sort_by_key(|r| r.language.as_str());
        all
    }
}
