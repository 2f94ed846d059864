use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::PointsConfig;
use crate::error::PointsError;
use crate::ledger::PointsLedger;
use crate::state::{Credit, Points, UserId};

/// A chat message seen by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityEvent {
    pub author: UserId,
    pub author_is_bot: bool,
}

/// Pending activity rewards, flushed to the ledger in batches.
///
/// Each user holds at most one pending reward per interval: a newer event
/// replaces the older draw instead of adding to it.
#[derive(Debug)]
pub struct AccrualBuffer {
    pending: Mutex<HashMap<UserId, Points>>,
    reward_range: RangeInclusive<Points>,
}

impl AccrualBuffer {
    pub fn new(config: &PointsConfig) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            reward_range: config.accrual_min..=config.accrual_max,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<UserId, Points>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the pending reward for `user_id`, replacing any earlier one.
    pub fn record(&self, user_id: UserId, amount: Points) {
        self.pending().insert(user_id, amount);
    }

    /// Reward a human's message with a random draw from the configured range.
    /// Returns the amount recorded, `None` for bot authors.
    pub fn on_message(&self, event: ActivityEvent) -> Option<Points> {
        if event.author_is_bot {
            return None;
        }
        let amount = rand::thread_rng().gen_range(self.reward_range.clone());
        self.record(event.author, amount);
        Some(amount)
    }

    pub fn pending_for(&self, user_id: UserId) -> Option<Points> {
        self.pending().get(&user_id).copied()
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Credit every pending reward and return how many users were paid.
    ///
    /// The buffer is swapped out before writing, so events recorded while the
    /// write is in flight wait for the next flush. If the write fails the
    /// snapshot is put back, except for users who have recorded a newer reward.
    pub async fn flush(&self, ledger: &PointsLedger) -> Result<usize, PointsError> {
        let snapshot = std::mem::take(&mut *self.pending());
        if snapshot.is_empty() {
            return Ok(0);
        }

        let credits: Vec<Credit> = snapshot
            .iter()
            .map(|(user, points)| Credit::new(*user, *points))
            .collect();

        if let Err(err) = ledger.credit_many(&credits).await {
            let mut pending = self.pending();
            for (user, points) in snapshot {
                pending.entry(user).or_insert(points);
            }
            return Err(err);
        }
        Ok(credits.len())
    }

    /// Flush on a fixed period until the task is aborted.
    pub fn spawn_flusher(self: Arc<Self>, ledger: PointsLedger, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.flush(&ledger).await {
                    Ok(0) => debug!("accrual buffer empty"),
                    Ok(users) => info!(users, "flushed activity rewards"),
                    Err(err) => warn!(error = %err, "activity reward flush failed; will retry next tick"),
                }
            }
        })
    }
}
