/// Execution Engine - Runs One Source Blob
///
/// **Core Responsibility:**
/// Turn `(source, language tag, timeout)` into an [`ExecutionResult`].
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (artifact, interpreter choice, isolation)
/// - Engine does NOT compare outputs or decide correctness
/// - Engine never returns an error: launch failures, timeouts, non-zero
///   exits and stderr all become a `success=false` result
///
/// **Artifact discipline:**
/// Each run gets its own uniquely named temp directory holding the source
/// file. The directory is a [`tempfile::TempDir`], so it is removed when the
/// run's scope ends on every path, including early returns and panics.

use crate::config::{LanguageConfig, LanguageConfigManager, LanguageKind};
use crate::messages::Messages;
use crate::normalizer::{clean_error_text, normalize};
use crate::sandbox::{Isolation, LaunchSpec, RawOutcome};
use dojo_common::types::ExecutionResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Safety limit to keep pathological submissions off the disk
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Scoped on-disk copy of one submission
pub struct Artifact {
    dir: TempDir,
    file: PathBuf,
}

impl Artifact {
    pub async fn create(root: &Path, file_name: &str, source: &str) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("dojo-{}-", uuid::Uuid::new_v4().simple()))
            .tempdir_in(root)?;
        let file = dir.path().join(file_name);
        tokio::fs::write(&file, source).await?;
        Ok(Self { dir, file })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

pub struct CodeRunner {
    languages: Arc<LanguageConfigManager>,
    isolation: Isolation,
    temp_root: PathBuf,
    messages: Messages,
    /// language name -> interpreter binary that answered the probe
    resolved: Mutex<HashMap<String, String>>,
}

impl CodeRunner {
    pub fn new(
        languages: Arc<LanguageConfigManager>,
        isolation: Isolation,
        temp_root: PathBuf,
        messages: Messages,
    ) -> Self {
        if matches!(isolation, Isolation::Host) {
            warn!("Code runs unsandboxed on the host; do not expose to untrusted tenants");
        }
        Self {
            languages,
            isolation,
            temp_root,
            messages,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn languages(&self) -> &LanguageConfigManager {
        &self.languages
    }

    pub fn isolation(&self) -> &Isolation {
        &self.isolation
    }

    /// Execute `source` as `language` under a hard wall-clock limit
    #[instrument(skip(self, source), fields(language = %language, source_size = source.len()))]
    pub async fn execute(&self, source: &str, language: &str, timeout_ms: u64) -> ExecutionResult {
        let Some(config) = self.languages.get(language) else {
            return ExecutionResult::failure(
                self.messages
                    .unsupported_language(language, &self.languages.list_languages()),
            );
        };

        if source.len() > MAX_SOURCE_CODE_BYTES {
            return ExecutionResult::failure(self.messages.source_too_large(MAX_SOURCE_CODE_BYTES));
        }

        let program = match self.resolve_program(config).await {
            Some(program) => program,
            None => {
                return ExecutionResult::failure(self.messages.interpreter_missing(&config.commands))
            }
        };

        let artifact = match Artifact::create(&self.temp_root, &config.file_name, source).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(error = %e, "Failed to materialize source artifact");
                return ExecutionResult::failure(format!("Failed to prepare source file: {}", e));
            }
        };

        let target = self
            .isolation
            .artifact_path_for(artifact.file(), &config.file_name);
        let spec = LaunchSpec {
            program,
            args: config.args_for(&target),
            env: config.env.clone(),
        };
        debug!(program = %spec.program, args = ?spec.args, "Launching");

        let start = Instant::now();
        let outcome = self
            .isolation
            .launch(&spec, artifact.dir(), config, timeout_ms)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = self.interpret(outcome, artifact.file(), timeout_ms, duration_ms);
        info!(
            success = result.success,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            duration_ms,
            "Execution finished"
        );
        // artifact dropped here, directory removed
        result
    }

    /// Map a raw process outcome to the grading-facing result
    fn interpret(
        &self,
        outcome: RawOutcome,
        artifact_file: &Path,
        timeout_ms: u64,
        duration_ms: u64,
    ) -> ExecutionResult {
        if let Some(error) = outcome.launch_error {
            return ExecutionResult {
                duration_ms,
                ..ExecutionResult::failure(clean_error_text(&error, artifact_file))
            };
        }

        if outcome.timed_out {
            return ExecutionResult {
                success: false,
                output: self.messages.timeout(timeout_ms),
                exit_code: None,
                timed_out: true,
                duration_ms,
            };
        }

        let stderr = clean_error_text(&outcome.stderr, artifact_file);
        let failed = outcome.exit_code != Some(0) || !stderr.is_empty();
        let output = if !failed {
            outcome.stdout
        } else if !stderr.is_empty() {
            stderr
        } else {
            // Non-zero exit without stderr: whatever was printed is the best clue
            clean_error_text(&normalize(&outcome.stdout), artifact_file)
        };

        ExecutionResult {
            success: !failed,
            output,
            exit_code: outcome.exit_code,
            timed_out: false,
            duration_ms,
        }
    }

    /// Pick the binary for a language.
    ///
    /// Interpreted languages on the host probe each candidate with
    /// `--version` and use the first that exits zero; the answer is cached
    /// for the life of the runner. Everything else uses the first candidate.
    async fn resolve_program(&self, config: &LanguageConfig) -> Option<String> {
        let first = config.commands.first()?.clone();
        if config.kind != LanguageKind::Interpreted
            || !self.isolation.probes_host_binaries()
            || config.commands.len() == 1
        {
            return Some(first);
        }

        if let Some(cached) = self.cached_program(&config.name) {
            return Some(cached);
        }

        for candidate in &config.commands {
            if probe(candidate).await {
                info!(language = %config.name, program = %candidate, "Resolved interpreter");
                self.resolved
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(config.name.clone(), candidate.clone());
                return Some(candidate.clone());
            }
            debug!(program = %candidate, "Interpreter probe failed, trying next");
        }

        warn!(language = %config.name, tried = ?config.commands, "No interpreter answered");
        None
    }

    fn cached_program(&self, language: &str) -> Option<String> {
        self.resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(language)
            .cloned()
    }
}

async fn probe(program: &str) -> bool {
    let status = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, status).await,
        Ok(Ok(status)) if status.success()
    )
}
