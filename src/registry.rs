use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_graphql::SimpleObject;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::PointsConfig;
use crate::error::PointsError;
use crate::ledger::PointsLedger;
use crate::market::{force_refund, BetReceipt, PredictionMarket, Settlement};
use crate::notify::NotificationSink;
use crate::state::{
    Credit, Points, Prediction, PredictionId, PredictionStatus, Side, ThreadId, UserId,
};

/// A live market. All mutations of one market go through its mutex, so a bet
/// can never interleave with a lock or settlement of the same market.
pub type SharedMarket = Arc<Mutex<PredictionMarket>>;

/// Outcome of startup recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub restored: Vec<PredictionId>,
    /// Predictions whose thread could not be reached; every stake was returned.
    pub refunded: Vec<PredictionId>,
    /// Predictions left untouched after an unexpected error; retried next start.
    pub failed: Vec<PredictionId>,
    /// Predictions already live in this process, left as they were.
    pub skipped: Vec<PredictionId>,
}

enum Recovered {
    Restored,
    Refunded,
    AlreadyLive,
}

/// A creator's claim on a market that is still being opened. Dropping it
/// releases the claim, including when `start` fails or is cancelled.
struct Reservation<'a> {
    starting: &'a StdMutex<HashSet<UserId>>,
    creator_id: UserId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.starting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.creator_id);
    }
}

/// Read-only view of a live market.
#[derive(Debug, Clone, PartialEq, SimpleObject)]
pub struct MarketSnapshot {
    pub prediction_id: PredictionId,
    pub creator_id: UserId,
    pub title: String,
    pub option_a: String,
    pub option_b: String,
    pub status: PredictionStatus,
    pub pool_a: Points,
    pub pool_b: Points,
    pub bettors_a: u64,
    pub bettors_b: u64,
    pub odds_a: f64,
    pub odds_b: f64,
}

impl MarketSnapshot {
    fn of(market: &PredictionMarket) -> Self {
        let prediction = market.prediction();
        let totals = market.totals();
        let (odds_a, odds_b) = market.odds();
        Self {
            prediction_id: prediction.id,
            creator_id: prediction.creator_id,
            title: prediction.title.clone(),
            option_a: prediction.option_a.clone(),
            option_b: prediction.option_b.clone(),
            status: prediction.status,
            pool_a: totals.sum_a,
            pool_b: totals.sum_b,
            bettors_a: totals.count_a as u64,
            bettors_b: totals.count_b as u64,
            odds_a,
            odds_b,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process-wide map of creator to their live market.
///
/// Populated by [`MarketRegistry::recover`] at startup and by `start`; an entry
/// is dropped as soon as its market reaches a terminal state.
pub struct MarketRegistry {
    ledger: PointsLedger,
    sink: Arc<dyn NotificationSink>,
    config: PointsConfig,
    markets: RwLock<HashMap<UserId, SharedMarket>>,
    starting: StdMutex<HashSet<UserId>>,
}

impl MarketRegistry {
    pub fn new(ledger: PointsLedger, sink: Arc<dyn NotificationSink>, config: PointsConfig) -> Self {
        Self {
            ledger,
            sink,
            config,
            markets: RwLock::new(HashMap::new()),
            starting: StdMutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }

    pub async fn get(&self, creator_id: UserId) -> Option<SharedMarket> {
        self.markets.read().await.get(&creator_id).cloned()
    }

    async fn require(&self, creator_id: UserId) -> Result<SharedMarket, PointsError> {
        self.get(creator_id).await.ok_or(PointsError::NoOpenMarket)
    }

    pub async fn len(&self) -> usize {
        self.markets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.markets.read().await.is_empty()
    }

    /// The live market whose discussion happens in `thread`.
    pub async fn find_by_thread(&self, thread: ThreadId) -> Option<(UserId, SharedMarket)> {
        let entries: Vec<(UserId, SharedMarket)> = self
            .markets
            .read()
            .await
            .iter()
            .map(|(creator, market)| (*creator, market.clone()))
            .collect();
        for (creator, market) in entries {
            if market.lock().await.thread_id() == thread {
                return Some((creator, market));
            }
        }
        None
    }

    /// Drop `creator_id`'s entry if it still points at `market`.
    async fn remove(&self, creator_id: UserId, market: &SharedMarket) {
        let mut markets = self.markets.write().await;
        if markets
            .get(&creator_id)
            .is_some_and(|current| Arc::ptr_eq(current, market))
        {
            markets.remove(&creator_id);
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Open a market for `creator_id`.
    ///
    /// # Returns
    /// * `Err(DuplicateMarket)` - the creator already has an active or locked
    ///   prediction, live in this process or recorded in storage
    /// * `Err(InvalidOptions)` - both options are the same
    pub async fn start(
        &self,
        creator_id: UserId,
        title: &str,
        option_a: &str,
        option_b: &str,
    ) -> Result<SharedMarket, PointsError> {
        let _reservation = self.reserve(creator_id).await?;
        if self
            .ledger
            .store()
            .open_prediction_for(creator_id)
            .await?
            .is_some()
        {
            return Err(PointsError::DuplicateMarket);
        }

        // Other creators' markets stay usable while the platform calls run.
        let market = PredictionMarket::open(
            creator_id,
            title,
            option_a,
            option_b,
            self.ledger.clone(),
            self.sink.clone(),
            self.config.embed_colour,
        )
        .await?;
        let shared = Arc::new(Mutex::new(market));
        self.markets.write().await.insert(creator_id, shared.clone());
        self.arm_auto_lock(&shared);
        Ok(shared)
    }

    /// Claim `creator_id` for a market being opened.
    ///
    /// # Returns
    /// * `Err(DuplicateMarket)` - the creator has a live market or another
    ///   start in progress
    async fn reserve(&self, creator_id: UserId) -> Result<Reservation<'_>, PointsError> {
        let markets = self.markets.read().await;
        if markets.contains_key(&creator_id) {
            return Err(PointsError::DuplicateMarket);
        }
        let claimed = self
            .starting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(creator_id);
        if !claimed {
            return Err(PointsError::DuplicateMarket);
        }
        Ok(Reservation { starting: &self.starting, creator_id })
    }

    pub async fn place_bet(
        &self,
        creator_id: UserId,
        user_id: UserId,
        side: Side,
        points: Points,
    ) -> Result<BetReceipt, PointsError> {
        let market = self.require(creator_id).await?;
        let receipt = market.lock().await.place_bet(user_id, side, points).await?;
        Ok(receipt)
    }

    pub async fn lock(&self, creator_id: UserId) -> Result<bool, PointsError> {
        let market = self.require(creator_id).await?;
        let changed = market.lock().await.lock().await?;
        Ok(changed)
    }

    pub async fn complete(&self, creator_id: UserId, winner: &str) -> Result<Settlement, PointsError> {
        let market = self.require(creator_id).await?;
        let settlement = market.lock().await.complete(winner).await?;
        self.remove(creator_id, &market).await;
        Ok(settlement)
    }

    pub async fn refund(&self, creator_id: UserId) -> Result<Vec<Credit>, PointsError> {
        let market = self.require(creator_id).await?;
        let credits = market.lock().await.refund().await?;
        self.remove(creator_id, &market).await;
        Ok(credits)
    }

    /// Refund a live market whose thread was deleted. Returns the refunded
    /// prediction, or `None` if no live market used `thread`.
    pub async fn on_thread_deleted(&self, thread: ThreadId) -> Result<Option<PredictionId>, PointsError> {
        let Some((creator_id, market)) = self.find_by_thread(thread).await else {
            return Ok(None);
        };
        let mut guard = market.lock().await;
        if guard.status().is_terminal() {
            return Ok(None);
        }
        let credits = guard.abandon().await?;
        let id = guard.id();
        drop(guard);

        self.remove(creator_id, &market).await;
        warn!(prediction = id, thread, bettors = credits.len(), "prediction thread deleted; bets refunded");
        Ok(Some(id))
    }

    pub async fn snapshots(&self) -> Vec<MarketSnapshot> {
        let markets: Vec<SharedMarket> = self.markets.read().await.values().cloned().collect();
        let mut snapshots =
            join_all(markets.iter().map(|market| async move { MarketSnapshot::of(&*market.lock().await) }))
                .await;
        snapshots.sort_by_key(|snapshot| snapshot.prediction_id);
        snapshots
    }

    /// Lock `market` once the configured timeout has passed, unless it was
    /// locked or settled first.
    fn arm_auto_lock(&self, market: &SharedMarket) {
        let market = Arc::downgrade(market);
        let timeout = self.config.lock_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(market) = market.upgrade() else {
                return;
            };
            let mut guard = market.lock().await;
            if guard.status() != PredictionStatus::Active {
                return;
            }
            let id = guard.id();
            match guard.lock().await {
                Ok(_) => info!(prediction = id, "prediction locked after timeout"),
                Err(err) => warn!(prediction = id, error = %err, "failed to auto-lock prediction"),
            };
        });
    }

    // ------------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------------

    /// Rebuild every active or locked prediction from storage. Creators who
    /// already have a live market keep it, so running this again on reconnect
    /// leaves live markets and their lock timers alone.
    ///
    /// A prediction whose thread is gone or forbidden is refunded and marked
    /// `refunded` rather than left holding escrowed points.
    pub async fn recover(&self) -> Result<RecoveryReport, PointsError> {
        let mut report = RecoveryReport::default();
        for prediction in self.ledger.store().restorable_predictions().await? {
            let id = prediction.id;
            match self.recover_one(prediction).await {
                Ok(Recovered::Restored) => report.restored.push(id),
                Ok(Recovered::Refunded) => report.refunded.push(id),
                Ok(Recovered::AlreadyLive) => report.skipped.push(id),
                Err(err) => {
                    error!(prediction = id, error = %err, "failed to recover prediction");
                    report.failed.push(id);
                }
            }
        }
        info!(
            restored = report.restored.len(),
            refunded = report.refunded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "prediction recovery finished"
        );
        Ok(report)
    }

    async fn recover_one(&self, prediction: Prediction) -> Result<Recovered, PointsError> {
        let store = self.ledger.store();
        let id = prediction.id;
        if self.markets.read().await.contains_key(&prediction.creator_id) {
            debug!(prediction = id, "prediction already live; not restoring");
            return Ok(Recovered::AlreadyLive);
        }

        if let Err(err) = self.sink.resolve_thread(prediction.thread_id).await {
            if !err.is_unreachable() {
                return Err(err.into());
            }
            let credits = force_refund(store.as_ref(), id).await?;
            warn!(
                prediction = id,
                thread = prediction.thread_id,
                bettors = credits.len(),
                "prediction thread unreachable; bets refunded"
            );
            return Ok(Recovered::Refunded);
        }

        let bets = store.bets_for(id).await?;
        let creator_id = prediction.creator_id;
        let status = prediction.status;
        let mut market = PredictionMarket::restore(
            prediction,
            bets,
            self.ledger.clone(),
            self.sink.clone(),
            self.config.embed_colour,
        );

        match market.restore_view().await {
            Ok(()) => {}
            Err(PointsError::Notify(err)) if err.is_unreachable() => {
                let credits = market.abandon().await?;
                warn!(prediction = id, bettors = credits.len(), "prediction view unreachable; bets refunded");
                return Ok(Recovered::Refunded);
            }
            Err(err) => {
                warn!(prediction = id, error = %err, "failed to restore prediction view; keeping market");
            }
        }

        let shared = Arc::new(Mutex::new(market));
        match self.markets.write().await.entry(creator_id) {
            Entry::Occupied(_) => return Ok(Recovered::AlreadyLive),
            Entry::Vacant(slot) => {
                slot.insert(shared.clone());
            }
        }
        if status == PredictionStatus::Active {
            self.arm_auto_lock(&shared);
        }
        info!(prediction = id, creator = creator_id, %status, "prediction restored");
        Ok(Recovered::Restored)
    }
}
