//! Achievement rules evaluated after a learner completes a problem.

use dojo_common::store::{AchievementStore, ProgressStore, Store, StoreResult, UserStore};
use dojo_common::types::UserId;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    FirstCompletion,
    CompletedAtLeast(usize),
    PointsAtLeast(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementRule {
    /// Must match an achievement name in the achievement store
    pub name: String,
    pub condition: Condition,
}

impl AchievementRule {
    pub fn new(name: &str, condition: Condition) -> Self {
        Self {
            name: name.to_string(),
            condition,
        }
    }
}

pub fn default_rules() -> Vec<AchievementRule> {
    vec![
        AchievementRule::new("Primer paso", Condition::FirstCompletion),
        AchievementRule::new("Constancia", Condition::CompletedAtLeast(5)),
        AchievementRule::new("Veterano", Condition::CompletedAtLeast(25)),
        AchievementRule::new("Centenario", Condition::PointsAtLeast(100)),
    ]
}

pub struct Achievements {
    store: Arc<dyn Store>,
    rules: Vec<AchievementRule>,
}

impl Achievements {
    pub fn new(store: Arc<dyn Store>, rules: Vec<AchievementRule>) -> Self {
        Self { store, rules }
    }

    /// Grant every rule the user now satisfies and does not hold yet.
    /// Returns the names granted by this call.
    pub async fn evaluate(&self, user_id: UserId) -> StoreResult<Vec<String>> {
        let Some(user) = self.store.user(user_id).await? else {
            return Ok(Vec::new());
        };
        let completed = self
            .store
            .progress_for_user(user_id)
            .await?
            .iter()
            .filter(|r| r.completed)
            .count();

        let mut granted = Vec::new();
        for rule in &self.rules {
            let satisfied = match rule.condition {
                Condition::FirstCompletion => completed >= 1,
                Condition::CompletedAtLeast(n) => completed >= n,
                Condition::PointsAtLeast(n) => user.points >= n,
            };
            if !satisfied {
                continue;
            }

            let Some(achievement) = self.store.achievement_by_name(&rule.name).await? else {
                debug!(name = %rule.name, "Achievement not defined in store, skipping");
                continue;
            };
            if self.store.has_achievement(user_id, achievement.id).await? {
                continue;
            }

            self.store.grant_achievement(user_id, achievement.id).await?;
            info!(user_id, achievement = %achievement.name, "Achievement granted");
            granted.push(achievement.name);
        }

        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dojo_common::memory::{MemoryStore, Seed};
    use dojo_common::types::{Achievement, Problem, ProgressRecord, User};

    fn problem(id: i64) -> Problem {
        Problem {
            id,
            topic_id: 1,
            title: format!("P{}", id),
            description: String::new(),
            example: String::new(),
            difficulty: String::new(),
            starter_code: String::new(),
            reference_solution: "print(1)".into(),
            order: id as i32,
            locked: false,
            points_awarded: 60,
        }
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::from_seed(Seed {
            problems: vec![problem(1), problem(2)],
            users: vec![User { id: 1, name: "ana".into(), points: 0, level: 1 }],
            achievements: vec![
                Achievement { id: 1, name: "Primer paso".into(), description: String::new() },
                Achievement { id: 2, name: "Centenario".into(), description: String::new() },
            ],
            ..Default::default()
        }))
    }

    async fn complete(store: &MemoryStore, problem_id: i64) {
        let record = ProgressRecord::first_attempt(1, problem_id, "x", true, 60, chrono::Utc::now());
        store.insert_progress(record).await.unwrap();
        store.add_points(1, 60).await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_before_first_completion() {
        let store = store();
        let achievements = Achievements::new(store.clone(), default_rules());
        assert!(achievements.evaluate(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grants_are_not_repeated() {
        let store = store();
        let achievements = Achievements::new(store.clone(), default_rules());

        complete(&store, 1).await;
        assert_eq!(achievements.evaluate(1).await.unwrap(), vec!["Primer paso"]);

        complete(&store, 2).await;
        // 120 points, two completions
        assert_eq!(achievements.evaluate(1).await.unwrap(), vec!["Centenario"]);
        assert!(achievements.evaluate(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_grants_nothing() {
        let store = store();
        let achievements = Achievements::new(store, default_rules());
        assert!(achievements.evaluate(42).await.unwrap().is_empty());
    }
}
