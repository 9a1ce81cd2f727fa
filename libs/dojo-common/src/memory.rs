// In-process store used by tests, the CLI and single-node deployments
// without Redis.

use crate::store::{
    AchievementStore, InsertOutcome, ProblemStore, ProgressStore, StoreError, StoreResult,
    UserStore,
};
use crate::types::{
    Achievement, Problem, ProblemId, ProgressRecord, Topic, TopicId, User, UserId,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;

/// Initial catalogue contents, loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Seed {
    pub topics: Vec<Topic>,
    pub problems: Vec<Problem>,
    pub users: Vec<User>,
    pub achievements: Vec<Achievement>,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))
    }
}

#[derive(Default)]
struct Inner {
    topics: BTreeMap<TopicId, Topic>,
    problems: BTreeMap<ProblemId, Problem>,
    users: HashMap<UserId, User>,
    achievements: Vec<Achievement>,
    granted: HashSet<(UserId, i64)>,
    progress: HashMap<(UserId, ProblemId), ProgressRecord>,
    next_progress_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let inner = Inner {
            topics: seed.topics.into_iter().map(|t| (t.id, t)).collect(),
            problems: seed.problems.into_iter().map(|p| (p.id, p)).collect(),
            users: seed.users.into_iter().map(|u| (u.id, u)).collect(),
            achievements: seed.achievements,
            next_progress_id: 1,
            ..Default::default()
        };
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub async fn remove_user(&self, id: UserId) -> Option<User> {
        self.inner.write().await.users.remove(&id)
    }

    pub async fn progress_count(&self) -> usize {
        self.inner.read().await.progress.len()
    }
}

impl Inner {
    fn check_references(&self, user_id: UserId, problem_id: ProblemId) -> StoreResult<()> {
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::NotFound { entity: "user", id: user_id });
        }
        if !self.problems.contains_key(&problem_id) {
            return Err(StoreError::NotFound { entity: "problem", id: problem_id });
        }
        Ok(())
    }
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn problem(&self, id: ProblemId) -> StoreResult<Option<Problem>> {
        Ok(self.inner.read().await.problems.get(&id).cloned())
    }

    async fn problem_count(&self) -> StoreResult<u64> {
        Ok(self.inner.read().await.problems.len() as u64)
    }

    async fn problems_by_topic(&self, topic_id: TopicId) -> StoreResult<Vec<Problem>> {
        let inner = self.inner.read().await;
        let mut problems: Vec<Problem> = inner
            .problems
            .values()
            .filter(|p| p.topic_id == topic_id)
            .cloned()
            .collect();
        problems.sort_by_key(|p| p.order);
        Ok(problems)
    }

    async fn topics_by_level(&self, level: i32) -> StoreResult<Vec<Topic>> {
        let inner = self.inner.read().await;
        let mut topics: Vec<Topic> = inner
            .topics
            .values()
            .filter(|t| t.level == level)
            .cloned()
            .collect();
        topics.sort_by_key(|t| t.order);
        Ok(topics)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn add_points(&self, id: UserId, delta: i64) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "user", id })?;
        user.points += delta;
        Ok(user.clone())
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn find_progress(
        &self,
        user_id: UserId,
        problem_id: ProblemId,
    ) -> StoreResult<Option<ProgressRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .progress
            .get(&(user_id, problem_id))
            .cloned())
    }

    async fn insert_progress(&self, mut record: ProgressRecord) -> StoreResult<InsertOutcome> {
        let mut inner = self.inner.write().await;
        inner.check_references(record.user_id, record.problem_id)?;

        let key = (record.user_id, record.problem_id);
        if let Some(existing) = inner.progress.get(&key) {
            return Ok(InsertOutcome::AlreadyExists(existing.clone()));
        }

        record.id = inner.next_progress_id.max(1);
        inner.next_progress_id = record.id + 1;
        inner.progress.insert(key, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn commit_progress(
        &self,
        expected_attempts: u32,
        record: &ProgressRecord,
        award: i64,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        inner.check_references(record.user_id, record.problem_id)?;
        let slot = inner
            .progress
            .get_mut(&(record.user_id, record.problem_id))
            .ok_or(StoreError::NotFound { entity: "progress", id: record.id })?;
        if slot.attempts != expected_attempts {
            return Ok(false);
        }
        *slot = record.clone();

        if award != 0 {
            if let Some(user) = inner.users.get_mut(&record.user_id) {
                user.points += award;
            }
        }
        Ok(true)
    }

    async fn progress_for_user(&self, user_id: UserId) -> StoreResult<Vec<ProgressRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<ProgressRecord> = inner
            .progress
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.problem_id);
        Ok(records)
    }
}

#[async_trait]
impl AchievementStore for MemoryStore {
    async fn achievement_by_name(&self, name: &str) -> StoreResult<Option<Achievement>> {
        Ok(self
            .inner
            .read()
            .await
            .achievements
            .iter()
            .find(|a| a.name == name)
            .cloned())
    }

    async fn has_achievement(&self, user_id: UserId, achievement_id: i64) -> StoreResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .granted
            .contains(&(user_id, achievement_id)))
    }

    async fn grant_achievement(&self, user_id: UserId, achievement_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::NotFound { entity: "user", id: user_id });
        }
        inner.granted.insert((user_id, achievement_id));
        Ok(())
    }
}
