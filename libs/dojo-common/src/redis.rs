use crate::memory::Seed;
use crate::store::{
    AchievementStore, InsertOutcome, ProblemStore, ProgressStore, StoreError, StoreResult,
    UserStore,
};
use crate::types::{
    Achievement, Problem, ProblemId, ProgressRecord, Topic, TopicId, User, UserId,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Redis key layout - defines only naming, not runtime logic.
/// Keeps the API and the seeding tools from drifting apart.

pub const KEY_PREFIX: &str = "dojo";

pub fn problem_key(id: ProblemId) -> String {
    format!("{}:problem:{}", KEY_PREFIX, id)
}

/// Set of every problem id, used for counting
pub fn problem_index_key() -> String {
    format!("{}:problems", KEY_PREFIX)
}

pub fn topic_key(id: TopicId) -> String {
    format!("{}:topic:{}", KEY_PREFIX, id)
}

pub fn topic_problems_key(topic_id: TopicId) -> String {
    format!("{}:topic:{}:problems", KEY_PREFIX, topic_id)
}

pub fn level_topics_key(level: i32) -> String {
    format!("{}:level:{}:topics", KEY_PREFIX, level)
}

pub fn user_key(id: UserId) -> String {
    format!("{}:user:{}", KEY_PREFIX, id)
}

/// Points live in their own counter so increments are a single INCRBY
pub fn user_points_key(id: UserId) -> String {
    format!("{}:user:{}:points", KEY_PREFIX, id)
}

pub fn progress_key(user_id: UserId, problem_id: ProblemId) -> String {
    format!("{}:progress:{}:{}", KEY_PREFIX, user_id, problem_id)
}

pub fn user_progress_index_key(user_id: UserId) -> String {
    format!("{}:user:{}:progress", KEY_PREFIX, user_id)
}

pub fn progress_sequence_key() -> String {
    format!("{}:progress:next_id", KEY_PREFIX)
}

pub fn achievement_key(name: &str) -> String {
    format!("{}:achievement:{}", KEY_PREFIX, name)
}

pub fn user_achievements_key(user_id: UserId) -> String {
    format!("{}:user:{}:achievements", KEY_PREFIX, user_id)
}

/// Compare-and-set on `attempts` plus the points credit, in one server-side step.
/// KEYS: user, problem, progress, user points. ARGV: expected attempts, record, award.
const COMMIT_PROGRESS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
if redis.call('EXISTS', KEYS[2]) == 0 then return -2 end
local current = redis.call('GET', KEYS[3])
if not current then return -3 end
if tonumber(cjson.decode(current)['attempts']) ~= tonumber(ARGV[1]) then return 0 end
redis.call('SET', KEYS[3], ARGV[2])
local award = tonumber(ARGV[3])
if award ~= 0 then redis.call('INCRBY', KEYS[4], award) end
return 1
"#;

/// Store backed by a shared Redis instance. Records are JSON strings.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value)?;
        let _: () = conn.set(key, payload).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    /// Write a seed catalogue. Existing keys are overwritten.
    pub async fn load_seed(&self, seed: &Seed) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        for topic in &seed.topics {
            self.set_json(&topic_key(topic.id), topic).await?;
            let _: () = conn.sadd(level_topics_key(topic.level), topic.id).await?;
        }
        for problem in &seed.problems {
            self.set_json(&problem_key(problem.id), problem).await?;
            let _: () = conn.sadd(problem_index_key(), problem.id).await?;
            let _: () = conn
                .sadd(topic_problems_key(problem.topic_id), problem.id)
                .await?;
        }
        for user in &seed.users {
            self.set_json(&user_key(user.id), user).await?;
            let _: () = conn.set(user_points_key(user.id), user.points).await?;
        }
        for achievement in &seed.achievements {
            self.set_json(&achievement_key(&achievement.name), achievement)
                .await?;
        }
        debug!(
            topics = seed.topics.len(),
            problems = seed.problems.len(),
            users = seed.users.len(),
            "Seed written to Redis"
        );
        Ok(())
    }

    async fn check_references(&self, user_id: UserId, problem_id: ProblemId) -> StoreResult<()> {
        if !self.exists(&user_key(user_id)).await? {
            return Err(StoreError::NotFound { entity: "user", id: user_id });
        }
        if !self.exists(&problem_key(problem_id)).await? {
            return Err(StoreError::NotFound { entity: "problem", id: problem_id });
        }
        Ok(())
    }
}

#[async_trait]
impl ProblemStore for RedisStore {
    async fn problem(&self, id: ProblemId) -> StoreResult<Option<Problem>> {
        self.get_json(&problem_key(id)).await
    }

    async fn problem_count(&self) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.scard(problem_index_key()).await?)
    }

    async fn problems_by_topic(&self, topic_id: TopicId) -> StoreResult<Vec<Problem>> {
        let mut conn = self.conn.clone();
        let ids: Vec<ProblemId> = conn.smembers(topic_problems_key(topic_id)).await?;
        let mut problems = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(problem) = self.problem(id).await? {
                problems.push(problem);
            }
        }
        problems.sort_by_key(|p| p.order);
        Ok(problems)
    }

    async fn topics_by_level(&self, level: i32) -> StoreResult<Vec<Topic>> {
        let mut conn = self.conn.clone();
        let ids: Vec<TopicId> = conn.smembers(level_topics_key(level)).await?;
        let mut topics = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(topic) = self.get_json::<Topic>(&topic_key(id)).await? {
                topics.push(topic);
            }
        }
        topics.sort_by_key(|t| t.order);
        Ok(topics)
    }
}

#[async_trait]
impl UserStore for RedisStore {
    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        let Some(mut user) = self.get_json::<User>(&user_key(id)).await? else {
            return Ok(None);
        };
        let mut conn = self.conn.clone();
        let points: Option<i64> = conn.get(user_points_key(id)).await?;
        if let Some(points) = points {
            user.points = points;
        }
        Ok(Some(user))
    }

    async fn add_points(&self, id: UserId, delta: i64) -> StoreResult<User> {
        let mut user = self
            .get_json::<User>(&user_key(id))
            .await?
            .ok_or(StoreError::NotFound { entity: "user", id })?;
        let mut conn = self.conn.clone();
        user.points = conn.incr(user_points_key(id), delta).await?;
        Ok(user)
    }
}

#[async_trait]
impl ProgressStore for RedisStore {
    async fn find_progress(
        &self,
        user_id: UserId,
        problem_id: ProblemId,
    ) -> StoreResult<Option<ProgressRecord>> {
        self.get_json(&progress_key(user_id, problem_id)).await
    }

    async fn insert_progress(&self, mut record: ProgressRecord) -> StoreResult<InsertOutcome> {
        self.check_references(record.user_id, record.problem_id)
            .await?;

        let mut conn = self.conn.clone();
        let key = progress_key(record.user_id, record.problem_id);
        record.id = conn.incr(progress_sequence_key(), 1).await?;
        let payload = serde_json::to_string(&record)?;

        // SET NX makes the insert itself single-winner across processes
        let created: bool = conn.set_nx(&key, payload).await?;
        if !created {
            warn!(key = %key, "Progress insert lost to a concurrent writer");
            let existing = self
                .find_progress(record.user_id, record.problem_id)
                .await?
                .ok_or_else(|| StoreError::Backend(format!("{} vanished after SET NX", key)))?;
            return Ok(InsertOutcome::AlreadyExists(existing));
        }

        let _: () = conn
            .sadd(user_progress_index_key(record.user_id), record.problem_id)
            .await?;
        Ok(InsertOutcome::Inserted(record))
    }

    async fn commit_progress(
        &self,
        expected_attempts: u32,
        record: &ProgressRecord,
        award: i64,
    ) -> StoreResult<bool> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let status: i64 = redis::Script::new(COMMIT_PROGRESS_SCRIPT)
            .key(user_key(record.user_id))
            .key(problem_key(record.problem_id))
            .key(progress_key(record.user_id, record.problem_id))
            .key(user_points_key(record.user_id))
            .arg(expected_attempts)
            .arg(payload)
            .arg(award)
            .invoke_async(&mut conn)
            .await?;

        match status {
            1 => Ok(true),
            0 => {
                debug!(
                    user_id = record.user_id,
                    problem_id = record.problem_id,
                    "Progress commit lost to a concurrent writer"
                );
                Ok(false)
            }
            -1 => Err(StoreError::NotFound { entity: "user", id: record.user_id }),
            -2 => Err(StoreError::NotFound { entity: "problem", id: record.problem_id }),
            -3 => Err(StoreError::NotFound { entity: "progress", id: record.id }),
            other => Err(StoreError::Backend(format!(
                "unexpected commit status {}",
                other
            ))),
        }
    }

    async fn progress_for_user(&self, user_id: UserId) -> StoreResult<Vec<ProgressRecord>> {
        let mut conn = self.conn.clone();
        let problem_ids: Vec<ProblemId> = conn.smembers(user_progress_index_key(user_id)).await?;
        let mut records = Vec::with_capacity(problem_ids.len());
        for problem_id in problem_ids {
            if let Some(record) = self.find_progress(user_id, problem_id).await? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.problem_id);
        Ok(records)
    }
}

#[async_trait]
impl AchievementStore for RedisStore {
    async fn achievement_by_name(&self, name: &str) -> StoreResult<Option<Achievement>> {
        self.get_json(&achievement_key(name)).await
    }

    async fn has_achievement(&self, user_id: UserId, achievement_id: i64) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn
            .sismember(user_achievements_key(user_id), achievement_id)
            .await?)
    }

    async fn grant_achievement(&self, user_id: UserId, achievement_id: i64) -> StoreResult<()> {
        if !self.exists(&user_key(user_id)).await? {
            return Err(StoreError::NotFound { entity: "user", id: user_id });
        }
        let mut conn = self.conn.clone();
        let _: () = conn
            .sadd(user_achievements_key(user_id), achievement_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_key_is_per_pair() {
        assert_eq!(progress_key(3, 14), "dojo:progress:3:14");
        assert_ne!(progress_key(3, 14), progress_key(14, 3));
    }

    #[test]
    fn test_user_keys_share_prefix() {
        assert_eq!(user_key(5), "dojo:user:5");
        assert!(user_points_key(5).starts_with(&user_key(5)));
        assert!(user_achievements_key(5).starts_with(&user_key(5)));
    }

    #[test]
    fn test_catalogue_keys() {
        assert_eq!(problem_key(1), "dojo:problem:1");
        assert_eq!(topic_problems_key(2), "dojo:topic:2:problems");
        assert_eq!(level_topics_key(3), "dojo:level:3:topics");
        assert_eq!(achievement_key("Primer paso"), "dojo:achievement:Primer paso");
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis
    async fn test_progress_insert_and_commit_single_winner() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let seed = Seed {
            problems: vec![Problem {
                id: 900_001,
                topic_id: 1,
                title: "t".into(),
                description: String::new(),
                example: String::new(),
                difficulty: String::new(),
                starter_code: String::new(),
                reference_solution: "print(1)".into(),
                order: 1,
                locked: false,
                points_awarded: 5,
            }],
            users: vec![User { id: 900_001, name: "redis".into(), points: 0, level: 1 }],
            ..Default::default()
        };
        store.load_seed(&seed).await.unwrap();
        let mut conn = store.conn.clone();
        let _: () = conn.del(progress_key(900_001, 900_001)).await.unwrap();

        let record = ProgressRecord::first_attempt(900_001, 900_001, "x", false, 5, chrono::Utc::now());
        let first = store.insert_progress(record.clone()).await.unwrap();
        let second = store.insert_progress(record).await.unwrap();
        let InsertOutcome::Inserted(stored) = first else {
            panic!("first insert should succeed");
        };
        assert!(matches!(second, InsertOutcome::AlreadyExists(_)));

        let before = store.user(900_001).await.unwrap().unwrap().points;
        let mut next = stored.clone();
        next.attempts = 2;
        next.completed = true;
        assert!(store.commit_progress(1, &next, 5).await.unwrap());
        assert!(!store.commit_progress(1, &next, 5).await.unwrap());
        let after = store.user(900_001).await.unwrap().unwrap().points;
        assert_eq!(after - before, 5);
    }
}
