use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PointsError;
use crate::market::BetReceipt;
use crate::registry::MarketRegistry;
use crate::state::{Points, PredictionStatus, Side, UserId};

/// Shown to a user after they press an option button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WagerPrompt {
    pub side: Side,
    pub option: String,
    pub available: Points,
}

impl WagerPrompt {
    pub fn label(&self) -> String {
        format!("How many points? ({} available)", self.available)
    }
}

/// Two-step wager capture: pick an option, then type an amount.
#[async_trait]
pub trait WagerInput: Send + Sync {
    async fn select(&self, user_id: UserId, side: Side) -> Result<WagerPrompt, PointsError>;

    async fn submit(&self, user_id: UserId, side: Side, raw: &str) -> Result<BetReceipt, PointsError>;
}

/// Parse the amount a user typed. Only plain digits are accepted.
pub fn parse_wager(raw: &str) -> Result<Points, PointsError> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(PointsError::NotANumber);
    }
    // All digits but too large for a balance: nobody can cover it.
    let points: Points = raw.parse().map_err(|_| PointsError::InsufficientFunds)?;
    if points == 0 {
        return Err(PointsError::NonPositiveWager);
    }
    Ok(points)
}

/// Wager input bound to one creator's market.
pub struct MarketInput {
    registry: Arc<MarketRegistry>,
    creator_id: UserId,
}

impl MarketInput {
    pub fn new(registry: Arc<MarketRegistry>, creator_id: UserId) -> Self {
        Self { registry, creator_id }
    }
}

#[async_trait]
impl WagerInput for MarketInput {
    async fn select(&self, user_id: UserId, side: Side) -> Result<WagerPrompt, PointsError> {
        let market = self
            .registry
            .get(self.creator_id)
            .await
            .ok_or(PointsError::NoOpenMarket)?;
        let guard = market.lock().await;
        if guard.status() != PredictionStatus::Active {
            return Err(PointsError::MarketClosed(guard.status()));
        }
        if let Err(err) = guard.check_side(user_id, side) {
            guard.call_out_side_change(user_id).await;
            return Err(err);
        }
        let option = guard.prediction().label(side).to_string();
        drop(guard);

        let available = self.registry.ledger().balance(user_id).await?;
        Ok(WagerPrompt { side, option, available })
    }

    async fn submit(&self, user_id: UserId, side: Side, raw: &str) -> Result<BetReceipt, PointsError> {
        let points = parse_wager(raw)?;
        if points > self.registry.ledger().balance(user_id).await? {
            return Err(PointsError::InsufficientFunds);
        }
        self.registry
            .place_bet(self.creator_id, user_id, side, points)
            .await
    }
}
