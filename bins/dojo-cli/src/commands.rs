// CLI commands for running and grading solutions
use anyhow::{bail, Context, Result};
use dojo_common::config::Config;
use dojo_common::memory::{MemoryStore, Seed};
use dojo_common::types::{Problem, User, ValidateRequest};
use dojo_grader::config::LanguageConfigManager;
use dojo_grader::Validator;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// User id for local grading runs
const LOCAL_USER_ID: i64 = 1;

fn read_source(file: &Path) -> Result<String> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("Failed to read source file {}", file.display()))?;
    if source.trim().is_empty() {
        bail!("Source file {} is empty", file.display());
    }
    Ok(source)
}

/// Parse a problem definition; optional catalogue fields may be omitted.
pub fn load_problem(path: &Path) -> Result<Problem> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read problem file {}", path.display()))?;
    let mut value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse problem file {}", path.display()))?;

    let Some(object) = value.as_object_mut() else {
        bail!("Problem file {} must contain a JSON object", path.display());
    };
    // Catalogue bookkeeping that a standalone problem file may leave out
    object.entry("topicId").or_insert(serde_json::json!(0));
    object.entry("pointsAwarded").or_insert(serde_json::json!(0));

    let problem: Problem =
        serde_json::from_value(value).context("Problem definition is incomplete")?;
    if problem.reference_solution.trim().is_empty() {
        bail!("Problem {} has an empty referenceSolution", problem.id);
    }
    Ok(problem)
}

/// Execute `file` once; returns the process exit code for the CLI.
pub async fn run_file(
    config: &Config,
    language: &str,
    file: &Path,
    timeout_ms: Option<u64>,
) -> Result<i32> {
    let source = read_source(file)?;
    let mut config = config.clone();
    if let Some(timeout_ms) = timeout_ms {
        config.run_timeout_ms = timeout_ms;
    }

    let validator = Validator::from_config(&config, Arc::new(MemoryStore::new()))?;
    let result = validator.run(&source, language).await;

    if result.success {
        println!("{}", result.output);
        Ok(0)
    } else {
        eprintln!("{}", result.output);
        Ok(result.exit_code.filter(|c| *c != 0).unwrap_or(1))
    }
}

/// Grade `file` against the problem in `problem_path` and print the
/// verdict as JSON. Exit code 0 means correct.
pub async fn check_file(
    config: &Config,
    problem_path: &Path,
    file: &Path,
    language: &str,
) -> Result<i32> {
    let problem = load_problem(problem_path)?;
    let source = read_source(file)?;
    let problem_id = problem.id;

    let store = Arc::new(MemoryStore::from_seed(Seed {
        problems: vec![problem],
        users: vec![User {
            id: LOCAL_USER_ID,
            name: "local".to_string(),
            points: 0,
            level: 1,
        }],
        ..Default::default()
    }));
    let validator = Validator::from_config(config, store)?;

    let result = validator
        .validate(&ValidateRequest {
            user_id: LOCAL_USER_ID,
            problem_id,
            code: source,
            language: language.to_string(),
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.is_correct { 0 } else { 1 })
}

pub fn list_languages(config: &Config) -> Result<i32> {
    let manager = LanguageConfigManager::load_or_builtin(&config.languages_path)?;
    for name in manager.list_languages() {
        if let Some(language) = manager.get(&name) {
            println!("{:<10} {}", name, language.commands.join(" | "));
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_problem_fills_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("problem.json");
        fs::write(
            &path,
            r#"{"id": 7, "title": "Suma", "referenceSolution": "print(2 + 2)"}"#,
        )
        .unwrap();

        let problem = load_problem(&path).unwrap();
        assert_eq!(problem.id, 7);
        assert_eq!(problem.reference_solution, "print(2 + 2)");
        assert!(!problem.locked);
        assert_eq!(problem.points_awarded, 0);
    }

    #[test]
    fn test_load_problem_requires_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("problem.json");
        fs::write(&path, r#"{"id": 7, "title": "Suma", "referenceSolution": "  "}"#).unwrap();
        assert!(load_problem(&path).is_err());

        fs::write(&path, "[1, 2]").unwrap();
        assert!(load_problem(&path).is_err());
    }

    #[test]
    fn test_read_source_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.py");
        fs::write(&path, "\n\n").unwrap();
        assert!(read_source(&path).is_err());
    }
}
