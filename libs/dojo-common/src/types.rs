use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ProblemId = i64;
pub type TopicId = i64;

/// A single coding exercise. Read-only from the grader's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: ProblemId,
    pub topic_id: TopicId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub example: String,
    /// Free-text tier label ("Fácil", "Intermedio", ...)
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub starter_code: String,
    pub reference_solution: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub locked: bool,
    pub points_awarded: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    /// Level a user must be on for this topic's problems to be offered
    pub level: i32,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default = "default_level")]
    pub level: i32,
}

fn default_level() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Durable state of one learner's relationship to one problem.
///
/// At most one record exists per `(user_id, problem_id)`. `completed` and
/// `score` only ever move forward; `attempts` only increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: i64,
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub completed: bool,
    pub score: i64,
    pub attempts: u32,
    pub last_submitted_code: String,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// Untouched record for a pair: no attempts yet.
    pub fn new(user_id: UserId, problem_id: ProblemId) -> Self {
        Self {
            id: 0,
            user_id,
            problem_id,
            completed: false,
            score: 0,
            attempts: 0,
            last_submitted_code: String::new(),
            completed_at: None,
        }
    }

    /// Record for the first attempt on a pair. The id is assigned by the store.
    pub fn first_attempt(
        user_id: UserId,
        problem_id: ProblemId,
        code: &str,
        is_correct: bool,
        points_awarded: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            problem_id,
            completed: is_correct,
            score: if is_correct { points_awarded } else { 0 },
            attempts: 1,
            last_submitted_code: code.to_string(),
            completed_at: is_correct.then_some(now),
        }
    }
}

/// Outcome of running one source blob. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// A result for a run that never produced a process exit.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            exit_code: None,
            timed_out: false,
            duration_ms: 0,
        }
    }
}

/// Grading verdict returned to the caller of the validation entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_correct: bool,
    pub message: String,
    pub points_awarded: i64,
    pub user_output: Option<String>,
    pub expected_output: Option<String>,
}

impl ValidationResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_correct: false,
            message: message.into(),
            points_awarded: 0,
            user_output: None,
            expected_output: None,
        }
    }
}

pub const DEFAULT_LANGUAGE: &str = "python";

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_request_defaults_language() {
        let req: ValidateRequest =
            serde_json::from_str(r#"{"userId":1,"problemId":2,"code":"print(1)"}"#).unwrap();
        assert_eq!(req.language, "python");
        assert_eq!(req.problem_id, 2);
    }

    #[test]
    fn test_validation_result_wire_format() {
        let result = ValidationResult::failure("nope");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isCorrect"], false);
        assert_eq!(json["pointsAwarded"], 0);
        assert!(json["expectedOutput"].is_null());
    }

    #[test]
    fn test_first_attempt_failed_has_no_completion() {
        let record = ProgressRecord::first_attempt(1, 2, "x", false, 10, Utc::now());
        assert!(!record.completed);
        assert_eq!(record.score, 0);
        assert_eq!(record.attempts, 1);
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_first_attempt_correct_scores() {
        let now = Utc::now();
        let record = ProgressRecord::first_attempt(1, 2, "x", true, 10, now);
        assert!(record.completed);
        assert_eq!(record.score, 10);
        assert_eq!(record.completed_at, Some(now));
    }
}
