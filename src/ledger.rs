use std::sync::Arc;

use tracing::debug;

use crate::error::PointsError;
use crate::state::{Bet, Credit, Points, UserId};
use crate::store::PersistentStore;

/// Point balances, backed by the persistent store. Cheap to clone.
#[derive(Clone)]
pub struct PointsLedger {
    store: Arc<dyn PersistentStore>,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    /// Balance of `user_id`; users never credited hold 0 points.
    pub async fn balance(&self, user_id: UserId) -> Result<Points, PointsError> {
        Ok(self.store.balance(user_id).await?.unwrap_or(0))
    }

    pub async fn credit(&self, user_id: UserId, points: Points) -> Result<(), PointsError> {
        self.credit_many(&[Credit::new(user_id, points)]).await
    }

    pub async fn credit_many(&self, credits: &[Credit]) -> Result<(), PointsError> {
        if credits.is_empty() {
            return Ok(());
        }
        self.store.credit_many(credits).await?;
        debug!(count = credits.len(), "credited balances");
        Ok(())
    }

    /// Debit a wager and record it against its prediction as one unit.
    ///
    /// # Returns
    /// * `Err(InsufficientFunds)` - the bettor holds fewer than `bet.points`
    /// * `Err(MarketClosed)` - the prediction is no longer open in storage
    pub async fn escrow(&self, bet: &Bet) -> Result<(), PointsError> {
        self.store
            .escrow_bet(bet)
            .await
            .map_err(PointsError::from_escrow)
    }
}
