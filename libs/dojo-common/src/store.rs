//! Collaborator interfaces the grader reads from and writes to.
//!
//! Problems, users and achievements are owned elsewhere; the grader only
//! issues request/response calls against them. Progress records are owned by
//! the ledger but still live behind [`ProgressStore`] so the backing storage
//! can be swapped (in-memory for tests and the CLI, Redis for the service).

use crate::types::{
    Achievement, Problem, ProblemId, ProgressRecord, Topic, TopicId, User, UserId,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced row is gone (user deleted between lookup and write, ...)
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored payload is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of an insert-if-absent on the `(user, problem)` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(ProgressRecord),
    /// Someone else created the record first; carries the stored one.
    AlreadyExists(ProgressRecord),
}

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn problem(&self, id: ProblemId) -> StoreResult<Option<Problem>>;
    async fn problem_count(&self) -> StoreResult<u64>;
    async fn problems_by_topic(&self, topic_id: TopicId) -> StoreResult<Vec<Problem>>;
    async fn topics_by_level(&self, level: i32) -> StoreResult<Vec<Topic>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user(&self, id: UserId) -> StoreResult<Option<User>>;
    /// Add `delta` to the user's cumulative points and return the updated user.
    async fn add_points(&self, id: UserId, delta: i64) -> StoreResult<User>;
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn find_progress(
        &self,
        user_id: UserId,
        problem_id: ProblemId,
    ) -> StoreResult<Option<ProgressRecord>>;
    /// Insert unless a record for the same pair already exists.
    async fn insert_progress(&self, record: ProgressRecord) -> StoreResult<InsertOutcome>;
    /// Replace the stored record only if it still has `expected_attempts`,
    /// crediting `award` points to the user in the same atomic step.
    /// Returns `false` when another writer got there first.
    async fn commit_progress(
        &self,
        expected_attempts: u32,
        record: &ProgressRecord,
        award: i64,
    ) -> StoreResult<bool>;
    async fn progress_for_user(&self, user_id: UserId) -> StoreResult<Vec<ProgressRecord>>;
}

#[async_trait]
pub trait AchievementStore: Send + Sync {
    async fn achievement_by_name(&self, name: &str) -> StoreResult<Option<Achievement>>;
    async fn has_achievement(&self, user_id: UserId, achievement_id: i64) -> StoreResult<bool>;
    async fn grant_achievement(&self, user_id: UserId, achievement_id: i64) -> StoreResult<()>;
}

/// Everything the grader needs from storage behind one object.
pub trait Store: ProblemStore + UserStore + ProgressStore + AchievementStore {}

impl<T> Store for T where T: ProblemStore + UserStore + ProgressStore + AchievementStore {}
