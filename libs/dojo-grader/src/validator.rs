/// Submission Validator - High-Level Orchestration
///
/// **Responsibility:**
/// Coordinate the engine, normalizer, similarity fallback and ledger to
/// produce a verdict for one submission.
///
/// **Flow:**
/// 1. Reject bad ids, empty code and unsupported languages before any work
/// 2. Load the problem (diagnostic message with the catalogue size if absent)
/// 3. Run the submission; a failed run is an incorrect attempt
/// 4. Run the reference; if it fails, judge by similarity to the reference source
/// 5. Compare normalized outputs, with the similarity check as a safety net
/// 6. Record the attempt (best-effort; errors are logged and dropped)
///
/// `validate` never returns an error: every failure becomes an
/// `is_correct=false` result with a message.

use crate::achievements::{default_rules, Achievements};
use crate::config::LanguageConfigManager;
use crate::engine::CodeRunner;
use crate::ledger::{Ledger, LedgerError};
use crate::messages::{Locale, Messages};
use crate::normalizer::normalize;
use crate::sandbox::Isolation;
use crate::similarity::looks_equivalent;
use anyhow::Context;
use dojo_common::config::{Config, DEFAULT_RUN_TIMEOUT_MS, DEFAULT_VALIDATE_TIMEOUT_MS};
use dojo_common::store::{ProblemStore, Store};
use dojo_common::types::{ExecutionResult, Problem, ValidateRequest, ValidationResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct GraderSettings {
    /// Limit per process when comparing against the reference
    pub validate_timeout_ms: u64,
    /// Limit for the interactive "run" operation
    pub run_timeout_ms: u64,
    pub locale: Locale,
}

impl GraderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            validate_timeout_ms: config.validate_timeout_ms,
            run_timeout_ms: config.run_timeout_ms,
            locale: Locale::from_tag(&config.locale),
        }
    }
}

impl Default for GraderSettings {
    fn default() -> Self {
        Self {
            validate_timeout_ms: DEFAULT_VALIDATE_TIMEOUT_MS,
            run_timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            locale: Locale::default(),
        }
    }
}

pub struct Validator {
    store: Arc<dyn Store>,
    runner: CodeRunner,
    ledger: Ledger,
    achievements: Achievements,
    settings: GraderSettings,
    messages: Messages,
}

impl Validator {
    pub fn new(
        store: Arc<dyn Store>,
        runner: CodeRunner,
        achievements: Achievements,
        settings: GraderSettings,
    ) -> Self {
        let ledger = Ledger::new(store.clone());
        Self {
            store,
            runner,
            ledger,
            achievements,
            settings,
            messages: Messages::new(settings.locale),
        }
    }

    /// Wire languages, isolation and the default achievement rules from
    /// service configuration.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let languages = LanguageConfigManager::load_or_builtin(&config.languages_path)?;
        info!(languages = ?languages.list_languages(), "Languages available");

        let isolation = Isolation::from_name(&config.isolation)
            .with_context(|| format!("Failed to set up '{}' isolation", config.isolation))?;
        info!(isolation = isolation.name(), "Isolation policy selected");

        let settings = GraderSettings::from_config(config);
        let runner = CodeRunner::new(
            Arc::new(languages),
            isolation,
            config.temp_dir.clone(),
            Messages::new(settings.locale),
        );
        let achievements = Achievements::new(store.clone(), default_rules());
        Ok(Self::new(store, runner, achievements, settings))
    }

    pub fn runner(&self) -> &CodeRunner {
        &self.runner
    }

    pub fn settings(&self) -> &GraderSettings {
        &self.settings
    }

    /// Grade one submission. Never fails; see module docs.
    #[instrument(
        skip(self, request),
        fields(
            user_id = request.user_id,
            problem_id = request.problem_id,
            language = %request.language,
        )
    )]
    pub async fn validate(&self, request: &ValidateRequest) -> ValidationResult {
        if request.problem_id <= 0 {
            return ValidationResult::failure(self.messages.invalid_problem_id(request.problem_id));
        }
        if request.code.trim().is_empty() {
            return ValidationResult::failure(self.messages.empty_code());
        }
        if self.runner.languages().get(&request.language).is_none() {
            return ValidationResult::failure(self.messages.unsupported_language(
                &request.language,
                &self.runner.languages().list_languages(),
            ));
        }

        let start = Instant::now();
        match self.grade(request).await {
            Ok(result) => {
                info!(
                    is_correct = result.is_correct,
                    points = result.points_awarded,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Validation finished"
                );
                result
            }
            Err(e) => {
                error!(error = %e, "Validation failed unexpectedly");
                ValidationResult::failure(self.messages.internal_error(&format!("{:#}", e)))
            }
        }
    }

    /// Interactive run of a snippet, no grading and no persistence
    #[instrument(skip(self, code), fields(language = %language))]
    pub async fn run(&self, code: &str, language: &str) -> ExecutionResult {
        if code.trim().is_empty() {
            return ExecutionResult::failure(self.messages.empty_code());
        }
        let mut result = self
            .runner
            .execute(code, language, self.settings.run_timeout_ms)
            .await;
        result.output = normalize(&result.output);
        result
    }

    async fn grade(&self, request: &ValidateRequest) -> anyhow::Result<ValidationResult> {
        let Some(problem) = self.store.problem(request.problem_id).await? else {
            let total = self.store.problem_count().await?;
            warn!(total, "Problem not found");
            return Ok(ValidationResult::failure(
                self.messages.problem_not_found(request.problem_id, total),
            ));
        };

        let timeout_ms = self.settings.validate_timeout_ms;
        let comment_prefix = self
            .runner
            .languages()
            .get(&request.language)
            .map(|c| c.comment_prefix.clone())
            .unwrap_or_default();

        let user_run = self
            .runner
            .execute(&request.code, &request.language, timeout_ms)
            .await;
        if !user_run.success {
            debug!(timed_out = user_run.timed_out, "Submission failed to run");
            self.record(request, &problem, false).await;
            return Ok(ValidationResult {
                is_correct: false,
                message: self.messages.execution_error(&user_run.output),
                points_awarded: 0,
                user_output: Some(user_run.output),
                expected_output: None,
            });
        }
        let user_output = normalize(&user_run.output);

        let reference_run = self
            .runner
            .execute(&problem.reference_solution, &request.language, timeout_ms)
            .await;
        if !reference_run.success {
            // A broken reference is a catalogue bug, not the learner's fault
            warn!(
                problem_id = problem.id,
                error = %reference_run.output,
                "Reference solution failed to run, falling back to similarity"
            );
            let is_correct =
                looks_equivalent(&request.code, &problem.reference_solution, &comment_prefix);
            self.record(request, &problem, is_correct).await;

            let verdict = if is_correct {
                self.messages.correct()
            } else {
                self.messages.incorrect()
            };
            return Ok(ValidationResult {
                is_correct,
                message: format!("{} {}", verdict, self.messages.heuristic_note()),
                points_awarded: if is_correct { problem.points_awarded } else { 0 },
                user_output: Some(user_output),
                expected_output: Some(self.messages.reference_unavailable()),
            });
        }
        let expected_output = normalize(&reference_run.output);

        let mut is_correct = user_output == expected_output;
        if !is_correct
            && looks_equivalent(&request.code, &problem.reference_solution, &comment_prefix)
        {
            info!("Output mismatch accepted by similarity fallback");
            is_correct = true;
        }

        self.record(request, &problem, is_correct).await;

        Ok(ValidationResult {
            is_correct,
            message: if is_correct {
                self.messages.correct()
            } else {
                self.messages.incorrect()
            },
            points_awarded: if is_correct { problem.points_awarded } else { 0 },
            user_output: Some(user_output),
            expected_output: Some(expected_output),
        })
    }

    /// Best-effort persistence; a grading result must reach the caller
    /// even when storage is degraded.
    async fn record(&self, request: &ValidateRequest, problem: &Problem, is_correct: bool) {
        let outcome = self
            .ledger
            .record_attempt(
                request.user_id,
                problem.id,
                &request.code,
                is_correct,
                problem.points_awarded,
            )
            .await;

        match outcome {
            Ok(outcome) => {
                debug!(
                    attempts = outcome.record.attempts,
                    completed = outcome.record.completed,
                    "Progress recorded"
                );
                if outcome.newly_completed {
                    if let Err(e) = self.achievements.evaluate(request.user_id).await {
                        warn!(error = %e, "Achievement evaluation failed");
                    }
                }
            }
            Err(LedgerError::MissingReference { entity, id }) => {
                warn!(entity, id, "Progress not recorded: reference vanished");
            }
            Err(e) => {
                error!(error = %e, "Progress not recorded");
            }
        }
    }
}
