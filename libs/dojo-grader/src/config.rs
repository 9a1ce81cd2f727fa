// Language configuration management for the grader
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// How a language's source gets from a file to running code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageKind {
    /// Interpreter invoked directly on the artifact
    Interpreted,
    /// A toolchain that builds and runs a script file in one invocation
    CompiledScript,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub kind: LanguageKind,
    /// Candidate binaries, probed in order; the first that answers `--version` wins
    pub commands: Vec<String>,
    /// Argument template; `{file}` is replaced with the artifact path
    pub args: Vec<String>,
    pub file_name: String,
    pub comment_prefix: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Container image used under docker isolation
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f32,
}

fn default_memory_limit_mb() -> u32 {
    256
}

fn default_cpu_limit() -> f32 {
    0.5
}

impl LanguageConfig {
    pub fn args_for(&self, file: &str) -> Vec<String> {
        self.args.iter().map(|a| a.replace("{file}", file)).collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("Failed to read languages.json")?;

        let languages_json: LanguagesJson =
            serde_json::from_str(&content).context("Failed to parse languages.json")?;

        if languages_json.languages.is_empty() {
            bail!("No languages configured in {}", config_path.display());
        }

        let mut manager = Self {
            configs: HashMap::new(),
        };
        for lang in languages_json.languages {
            if lang.commands.is_empty() {
                bail!("Language '{}' has no commands configured", lang.name);
            }
            manager = manager.with_language(lang);
        }

        Ok(manager)
    }

    /// Load from `config_path`, falling back to the built-in set when the file is absent
    pub fn load_or_builtin(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let manager = Self::load(config_path)?;
            info!(path = %config_path.display(), "Loaded language configuration");
            Ok(manager)
        } else {
            warn!(
                path = %config_path.display(),
                "Language config not found, using built-in defaults"
            );
            Ok(Self::builtin())
        }
    }

    /// Python (interpreted) and C# (compiled script via `dotnet run`)
    pub fn builtin() -> Self {
        let python = LanguageConfig {
            name: "python".to_string(),
            kind: LanguageKind::Interpreted,
            commands: vec!["python".to_string(), "python3".to_string()],
            args: vec!["-u".to_string(), "{file}".to_string()],
            file_name: "main.py".to_string(),
            comment_prefix: "#".to_string(),
            env: BTreeMap::from([("PYTHONIOENCODING".to_string(), "utf-8".to_string())]),
            image: Some("python:3.12-slim".to_string()),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
        };
        let csharp = LanguageConfig {
            name: "csharp".to_string(),
            kind: LanguageKind::CompiledScript,
            commands: vec!["dotnet".to_string()],
            args: vec!["run".to_string(), "{file}".to_string()],
            file_name: "Program.cs".to_string(),
            comment_prefix: "//".to_string(),
            env: BTreeMap::from([
                ("DOTNET_CLI_TELEMETRY_OPTOUT".to_string(), "1".to_string()),
                ("DOTNET_NOLOGO".to_string(), "1".to_string()),
            ]),
            image: Some("mcr.microsoft.com/dotnet/sdk:10.0".to_string()),
            memory_limit_mb: 1024,
            cpu_limit: 1.0,
        };

        Self {
            configs: HashMap::new(),
        }
        .with_language(python)
        .with_language(csharp)
    }

    /// Register (or replace) a language
    pub fn with_language(mut self, config: LanguageConfig) -> Self {
        self.configs.insert(config.name.to_lowercase(), config);
        self
    }

    /// Get configuration for a language tag (case-insensitive)
    pub fn get(&self, tag: &str) -> Option<&LanguageConfig> {
        self.configs.get(&tag.trim().to_lowercase())
    }

    /// List all supported languages, sorted
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}
