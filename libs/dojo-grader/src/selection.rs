//! Random problem selection for a learner's current level.

use dojo_common::store::{ProblemStore, ProgressStore, Store, StoreResult, UserStore};
use dojo_common::types::{Problem, UserId};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

/// Pick a problem for `user_id`.
///
/// Candidates are the problems of every topic on the user's level. Locked
/// and already-completed problems are excluded; when that leaves nothing,
/// completed ones are allowed again so the learner can keep practising.
/// `Ok(None)` means the user is unknown or the level has no unlocked problems.
pub async fn pick_random_problem<R: Rng + ?Sized>(
    store: &dyn Store,
    user_id: UserId,
    rng: &mut R,
) -> StoreResult<Option<Problem>> {
    let Some(user) = store.user(user_id).await? else {
        return Ok(None);
    };

    let mut candidates = Vec::new();
    for topic in store.topics_by_level(user.level).await? {
        candidates.extend(
            store
                .problems_by_topic(topic.id)
                .await?
                .into_iter()
                .filter(|p| !p.locked),
        );
    }

    let completed: HashSet<i64> = store
        .progress_for_user(user_id)
        .await?
        .into_iter()
        .filter(|r| r.completed)
        .map(|r| r.problem_id)
        .collect();

    let fresh: Vec<&Problem> = candidates
        .iter()
        .filter(|p| !completed.contains(&p.id))
        .collect();

    let choice = if fresh.is_empty() {
        debug!(user_id, level = user.level, "No unsolved problems left, allowing repeats");
        candidates.choose(rng)
    } else {
        fresh.choose(rng).copied()
    };

    Ok(choice.cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dojo_common::memory::{MemoryStore, Seed};
    use dojo_common::types::{ProgressRecord, Topic, User};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn problem(id: i64, topic_id: i64, locked: bool) -> Problem {
        Problem {
            id,
            topic_id,
            title: format!("P{}", id),
            description: String::new(),
            example: String::new(),
            difficulty: String::new(),
            starter_code: String::new(),
            reference_solution: "print(1)".into(),
            order: id as i32,
            locked,
            points_awarded: 5,
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::from_seed(Seed {
            topics: vec![
                Topic { id: 1, name: "Variables".into(), level: 1, order: 1 },
                Topic { id: 2, name: "Bucles".into(), level: 2, order: 1 },
            ],
            problems: vec![
                problem(1, 1, false),
                problem(2, 1, false),
                problem(3, 1, true),
                problem(4, 2, false),
            ],
            users: vec![User { id: 1, name: "ana".into(), points: 0, level: 1 }],
            ..Default::default()
        })
    }

    async fn complete(store: &MemoryStore, problem_id: i64) {
        let record = ProgressRecord::first_attempt(1, problem_id, "x", true, 5, chrono::Utc::now());
        store.insert_progress(record).await.unwrap();
    }

    #[tokio::test]
    async fn test_only_unlocked_problems_of_user_level() {
        let store = store();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let problem = pick_random_problem(&store, 1, &mut rng).await.unwrap().unwrap();
            assert!(problem.id == 1 || problem.id == 2, "got {}", problem.id);
        }
    }

    #[tokio::test]
    async fn test_completed_problems_are_skipped() {
        let store = store();
        complete(&store, 1).await;
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let problem = pick_random_problem(&store, 1, &mut rng).await.unwrap().unwrap();
            assert_eq!(problem.id, 2);
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_repeats_when_all_done() {
        let store = store();
        complete(&store, 1).await;
        complete(&store, 2).await;
        let mut rng = StdRng::seed_from_u64(7);
        let problem = pick_random_problem(&store, 1, &mut rng).await.unwrap().unwrap();
        assert!(problem.id == 1 || problem.id == 2);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let store = store();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(pick_random_problem(&store, 9, &mut rng).await.unwrap().is_none());
    }
}
