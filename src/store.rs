use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::state::{
    Bet, Credit, MessageId, NewPrediction, Points, Prediction, PredictionId, PredictionStatus,
    UserId,
};

/// Durable storage for balances, predictions and bets.
///
/// Every point mutation is create-or-add. Methods that touch several rows
/// (`escrow_bet`, `settle`) must apply all of them or none.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Current balance, `None` if the user has never been credited.
    async fn balance(&self, user_id: UserId) -> Result<Option<Points>, StoreError>;

    /// Add each credit to its user, creating missing users at the credited amount.
    async fn credit_many(&self, credits: &[Credit]) -> Result<(), StoreError>;

    /// Debit `bet.points` from the bettor and add them to the bet row for
    /// `(prediction_id, user_id)`, inserting it if absent.
    async fn escrow_bet(&self, bet: &Bet) -> Result<(), StoreError>;

    async fn create_prediction(&self, new: NewPrediction) -> Result<PredictionId, StoreError>;

    async fn prediction(&self, id: PredictionId) -> Result<Option<Prediction>, StoreError>;

    /// The creator's active or locked prediction, if any.
    async fn open_prediction_for(&self, creator_id: UserId) -> Result<Option<PredictionId>, StoreError>;

    async fn set_status(&self, id: PredictionId, status: PredictionStatus) -> Result<(), StoreError>;

    async fn set_message(&self, id: PredictionId, message_id: MessageId) -> Result<(), StoreError>;

    /// Apply `credits` and move the prediction to a terminal `status`.
    async fn settle(
        &self,
        id: PredictionId,
        status: PredictionStatus,
        winner: Option<String>,
        credits: &[Credit],
    ) -> Result<(), StoreError>;

    async fn bets_for(&self, id: PredictionId) -> Result<Vec<Bet>, StoreError>;

    /// Every active or locked prediction, for startup recovery.
    async fn restorable_predictions(&self) -> Result<Vec<Prediction>, StoreError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, Points>,
    predictions: BTreeMap<PredictionId, Prediction>,
    bets: BTreeMap<(PredictionId, UserId), Bet>,
    next_prediction_id: PredictionId,
}

impl Tables {
    fn open_prediction(&self, id: PredictionId) -> Result<&Prediction, StoreError> {
        let prediction = self
            .predictions
            .get(&id)
            .ok_or(StoreError::PredictionNotFound(id))?;
        if !prediction.status.is_open() {
            return Err(StoreError::PredictionClosed { id, status: prediction.status });
        }
        Ok(prediction)
    }

    fn credit(&mut self, credits: &[Credit]) {
        for credit in credits {
            let balance = self.users.entry(credit.user_id).or_insert(0);
            *balance = balance.saturating_add(credit.points);
        }
    }
}

/// A `PersistentStore` held entirely in memory. Each call runs under one lock,
/// so multi-row operations are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose users start with the given balances.
    pub fn with_balances(balances: impl IntoIterator<Item = (UserId, Points)>) -> Self {
        let mut store = Self::new();
        store.tables.get_mut().users.extend(balances);
        store
    }

    /// Make every subsequent write fail with a backend error until reset.
    pub fn inject_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn balance(&self, user_id: UserId) -> Result<Option<Points>, StoreError> {
        Ok(self.tables.lock().await.users.get(&user_id).copied())
    }

    async fn credit_many(&self, credits: &[Credit]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tables.lock().await.credit(credits);
        Ok(())
    }

    async fn escrow_bet(&self, bet: &Bet) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        tables.open_prediction(bet.prediction_id)?;

        let available = tables.users.get(&bet.user_id).copied().unwrap_or(0);
        if available < bet.points {
            return Err(StoreError::InsufficientFunds { available });
        }
        tables.users.insert(bet.user_id, available - bet.points);

        tables
            .bets
            .entry((bet.prediction_id, bet.user_id))
            .and_modify(|row| row.points = row.points.saturating_add(bet.points))
            .or_insert_with(|| bet.clone());
        Ok(())
    }

    async fn create_prediction(&self, new: NewPrediction) -> Result<PredictionId, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        tables.next_prediction_id += 1;
        let id = tables.next_prediction_id;
        tables.predictions.insert(
            id,
            Prediction {
                id,
                creator_id: new.creator_id,
                title: new.title,
                option_a: new.option_a,
                option_b: new.option_b,
                status: PredictionStatus::Active,
                winner: None,
                thread_id: new.thread_id,
                message_id: new.message_id,
            },
        );
        Ok(id)
    }

    async fn prediction(&self, id: PredictionId) -> Result<Option<Prediction>, StoreError> {
        Ok(self.tables.lock().await.predictions.get(&id).cloned())
    }

    async fn open_prediction_for(&self, creator_id: UserId) -> Result<Option<PredictionId>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .predictions
            .values()
            .find(|p| p.creator_id == creator_id && p.status.is_open())
            .map(|p| p.id))
    }

    async fn set_status(&self, id: PredictionId, status: PredictionStatus) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let prediction = tables
            .predictions
            .get_mut(&id)
            .ok_or(StoreError::PredictionNotFound(id))?;
        prediction.status = status;
        Ok(())
    }

    async fn set_message(&self, id: PredictionId, message_id: MessageId) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let prediction = tables
            .predictions
            .get_mut(&id)
            .ok_or(StoreError::PredictionNotFound(id))?;
        prediction.message_id = message_id;
        Ok(())
    }

    async fn settle(
        &self,
        id: PredictionId,
        status: PredictionStatus,
        winner: Option<String>,
        credits: &[Credit],
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        tables.open_prediction(id)?;
        tables.credit(credits);
        if let Some(prediction) = tables.predictions.get_mut(&id) {
            prediction.status = status;
            prediction.winner = winner;
        }
        Ok(())
    }

    async fn bets_for(&self, id: PredictionId) -> Result<Vec<Bet>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .bets
            .range((id, UserId::MIN)..=(id, UserId::MAX))
            .map(|(_, bet)| bet.clone())
            .collect())
    }

    async fn restorable_predictions(&self) -> Result<Vec<Prediction>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .predictions
            .values()
            .filter(|p| p.status.is_open())
            .cloned()
            .collect())
    }
}
