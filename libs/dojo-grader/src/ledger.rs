//! Progress ledger: attempts, completion and score per `(user, problem)`.
//!
//! Invariants kept here:
//! - at most one record per pair;
//! - `completed` never goes back to false, `score` is set once;
//! - `attempts` increments on every recorded attempt;
//! - the user's cumulative points grow by `points_awarded` exactly once per
//!   pair, on the first transition to completed.
//!
//! Every write is a compare-and-set on `attempts` that also credits the
//! points ([`ProgressStore::commit_progress`]), so completion and award land
//! together or not at all, and writers in other processes cannot both win.
//! The per-pair lock only keeps attempts from the same process from
//! spinning on each other.

use chrono::Utc;
use dojo_common::store::{InsertOutcome, ProgressStore, StoreError};
use dojo_common::types::{ProblemId, ProgressRecord, UserId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Conditional writes lost in a row before giving up on an attempt
const MAX_COMMIT_RETRIES: u32 = 8;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// User or problem disappeared between lookup and write
    #[error("referenced {entity} {id} no longer exists")]
    MissingReference { entity: &'static str, id: i64 },
    #[error("progress for user {user_id} on problem {problem_id} kept changing, gave up after {retries} retries")]
    Conflict {
        user_id: UserId,
        problem_id: ProblemId,
        retries: u32,
    },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => LedgerError::MissingReference { entity, id },
            other => LedgerError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub record: ProgressRecord,
    /// True only for the attempt that first completed the problem
    pub newly_completed: bool,
}

/// Lazily created async mutex per key
struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

/// Above this many idle entries the map is swept on the next acquire
const LOCK_SWEEP_THRESHOLD: usize = 1024;

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            if locks.len() > LOCK_SWEEP_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Ledger {
    progress: Arc<dyn ProgressStore>,
    pair_locks: KeyedLocks<(UserId, ProblemId)>,
}

impl Ledger {
    pub fn new(progress: Arc<dyn ProgressStore>) -> Self {
        Self {
            progress,
            pair_locks: KeyedLocks::new(),
        }
    }

    /// Record one graded attempt: get-or-create the pair's record, then
    /// commit the advanced record against the attempts count it was read at.
    #[instrument(skip(self, code))]
    pub async fn record_attempt(
        &self,
        user_id: UserId,
        problem_id: ProblemId,
        code: &str,
        is_correct: bool,
        points_awarded: i64,
    ) -> Result<AttemptOutcome, LedgerError> {
        let _pair = self.pair_locks.acquire((user_id, problem_id)).await;

        for retry in 0..=MAX_COMMIT_RETRIES {
            if retry > 0 {
                debug!(retry, "Progress changed underneath, retrying");
            }
            let current = self.current(user_id, problem_id).await?;
            let expected = current.attempts;
            let outcome = advance(current, code, is_correct, points_awarded);
            let award = if outcome.newly_completed { points_awarded } else { 0 };

            if self
                .progress
                .commit_progress(expected, &outcome.record, award)
                .await?
            {
                if outcome.newly_completed {
                    info!(user_id, points = award, "Points awarded");
                }
                return Ok(outcome);
            }
        }

        warn!(user_id, problem_id, "Progress commit kept conflicting");
        Err(LedgerError::Conflict {
            user_id,
            problem_id,
            retries: MAX_COMMIT_RETRIES,
        })
    }

    async fn current(
        &self,
        user_id: UserId,
        problem_id: ProblemId,
    ) -> Result<ProgressRecord, LedgerError> {
        if let Some(record) = self.progress.find_progress(user_id, problem_id).await? {
            return Ok(record);
        }
        match self
            .progress
            .insert_progress(ProgressRecord::new(user_id, problem_id))
            .await?
        {
            InsertOutcome::Inserted(record) => {
                debug!(record_id = record.id, "Created progress record");
                Ok(record)
            }
            // Another writer created it first
            InsertOutcome::AlreadyExists(record) => Ok(record),
        }
    }
}

/// Next state of a record after one attempt
fn advance(
    mut record: ProgressRecord,
    code: &str,
    is_correct: bool,
    points_awarded: i64,
) -> AttemptOutcome {
    record.attempts += 1;
    record.last_submitted_code = code.to_string();

    let newly_completed = is_correct && !record.completed;
    if newly_completed {
        record.completed = true;
        record.score = points_awarded;
        record.completed_at = Some(Utc::now());
    }

    AttemptOutcome {
        record,
        newly_completed,
    }
}
