use std::sync::Arc;

use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};

use crate::ledger::PointsLedger;
use crate::odds;
use crate::registry::{MarketRegistry, MarketSnapshot};
use crate::state::{Bet, Points, Prediction, PredictionId, UserId};

pub type PointsSchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

/// Read-only queries over balances and markets.
pub struct QueryRoot {
    ledger: PointsLedger,
    registry: Arc<MarketRegistry>,
}

#[Object]
impl QueryRoot {
    /// Points held by a user; 0 for users never credited.
    async fn balance(&self, user_id: UserId) -> async_graphql::Result<Points> {
        Ok(self.ledger.balance(user_id).await?)
    }

    async fn prediction(&self, id: PredictionId) -> async_graphql::Result<Option<Prediction>> {
        Ok(self.ledger.store().prediction(id).await?)
    }

    async fn bets(&self, prediction_id: PredictionId) -> async_graphql::Result<Vec<Bet>> {
        Ok(self.ledger.store().bets_for(prediction_id).await?)
    }

    /// Every market currently taking bets or awaiting settlement.
    async fn open_markets(&self) -> Vec<MarketSnapshot> {
        self.registry.snapshots().await
    }

    /// Payout multiplier for a pool of `own_pool` against `opposite_pool`.
    async fn odds(&self, own_pool: Points, opposite_pool: Points) -> f64 {
        odds::multiplier(own_pool, opposite_pool)
    }
}

pub fn build_schema(registry: Arc<MarketRegistry>) -> PointsSchema {
    let ledger = registry.ledger().clone();
    Schema::build(QueryRoot { ledger, registry }, EmptyMutation, EmptySubscription).finish()
}
