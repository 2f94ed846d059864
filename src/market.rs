use std::sync::Arc;

use tracing::{info, warn};

use crate::bets::{BetLedger, PoolTotals};
use crate::error::PointsError;
use crate::ledger::PointsLedger;
use crate::notify::{mention, Embed, NotificationSink, PredictionView};
use crate::odds;
use crate::state::{
    Bet, Credit, MessageId, NewPrediction, Points, Prediction, PredictionId, PredictionStatus,
    Side, ThreadId, UserId,
};
use crate::store::PersistentStore;

// ============================================================================
// Results
// ============================================================================

/// What a successful wager changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetReceipt {
    pub side: Side,
    /// Stake before this wager was merged in.
    pub previous: Points,
    pub total: Points,
    pub totals: PoolTotals,
}

/// How a completed market paid out.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Winners receive `stake * multiplier`; the losing pool is distributed.
    Payout {
        winner: Side,
        multiplier: f64,
        losing_pool: Points,
        credits: Vec<Credit>,
    },
    /// One side had no bettors, so every stake goes back.
    Wash { credits: Vec<Credit> },
}

impl Settlement {
    pub fn credits(&self) -> &[Credit] {
        match self {
            Settlement::Payout { credits, .. } | Settlement::Wash { credits } => credits,
        }
    }
}

// ============================================================================
// Market
// ============================================================================

/// A single prediction and the bets placed on it.
///
/// Durable writes happen before the in-memory state they back changes, so a
/// failed write leaves the market exactly as it was.
pub struct PredictionMarket {
    prediction: Prediction,
    bets: BetLedger,
    ledger: PointsLedger,
    sink: Arc<dyn NotificationSink>,
    colour: [u8; 3],
}

impl PredictionMarket {
    /// Open a new prediction: announce it, give it a thread and a betting
    /// message, then persist it.
    ///
    /// # Returns
    /// * `Err(InvalidOptions)` - both options carry the same label
    /// * `Err(Notify)` - the platform refused to create the thread or message
    /// * `Err(Store)` - the prediction row could not be written
    pub async fn open(
        creator_id: UserId,
        title: &str,
        option_a: &str,
        option_b: &str,
        ledger: PointsLedger,
        sink: Arc<dyn NotificationSink>,
        colour: [u8; 3],
    ) -> Result<Self, PointsError> {
        if option_a == option_b {
            return Err(PointsError::InvalidOptions);
        }

        sink.post(&format!("PREDICTION: **{title}**")).await?;
        let thread_id = sink.create_thread(&format!("PREDICTION: {title}")).await?;

        let bets = BetLedger::new();
        let view = PredictionView {
            option_a: option_a.to_string(),
            option_b: option_b.to_string(),
            locked: false,
        };
        let embed = Embed::prediction(title, (option_a, option_b), bets.totals(), colour);
        let message_id = sink.send(thread_id, "", &embed, &view).await?;

        let new = NewPrediction {
            creator_id,
            title: title.to_string(),
            option_a: option_a.to_string(),
            option_b: option_b.to_string(),
            thread_id,
            message_id,
        };
        let id = ledger.store().create_prediction(new.clone()).await?;
        info!(prediction = id, creator = creator_id, title, "prediction started");

        Ok(Self {
            prediction: Prediction {
                id,
                creator_id,
                title: new.title,
                option_a: new.option_a,
                option_b: new.option_b,
                status: PredictionStatus::Active,
                winner: None,
                thread_id,
                message_id,
            },
            bets,
            ledger,
            sink,
            colour,
        })
    }

    /// Rebuild a market from its persisted row and bets.
    pub fn restore(
        prediction: Prediction,
        stored_bets: Vec<Bet>,
        ledger: PointsLedger,
        sink: Arc<dyn NotificationSink>,
        colour: [u8; 3],
    ) -> Self {
        let mut bets = BetLedger::new();
        for bet in stored_bets {
            let side = prediction.side_of(&bet.option).unwrap_or_else(|| {
                warn!(
                    prediction = prediction.id,
                    user = bet.user_id,
                    option = %bet.option,
                    "bet names neither option; counting it for option B"
                );
                Side::B
            });
            bets.merge(bet.user_id, side, bet.points);
        }
        Self { prediction, bets, ledger, sink, colour }
    }

    /// Re-attach the betting view to its message, or send a fresh one if the
    /// message was deleted.
    pub async fn restore_view(&mut self) -> Result<(), PointsError> {
        let embed = self.embed();
        let view = self.view();
        let existing = self
            .sink
            .fetch_message(self.prediction.thread_id, self.prediction.message_id)
            .await?;

        match existing {
            Some(message_id) => {
                self.sink.edit(message_id, Some(&embed), Some(&view)).await?;
            }
            None => {
                let message_id = self
                    .sink
                    .send(self.prediction.thread_id, "Prediction restored:", &embed, &view)
                    .await?;
                // The new message exists whether or not the write below lands.
                self.prediction.message_id = message_id;
                self.store().set_message(self.prediction.id, message_id).await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> PredictionId {
        self.prediction.id
    }

    pub fn creator_id(&self) -> UserId {
        self.prediction.creator_id
    }

    pub fn status(&self) -> PredictionStatus {
        self.prediction.status
    }

    pub fn thread_id(&self) -> ThreadId {
        self.prediction.thread_id
    }

    pub fn message_id(&self) -> MessageId {
        self.prediction.message_id
    }

    pub fn prediction(&self) -> &Prediction {
        &self.prediction
    }

    pub fn bets(&self) -> &BetLedger {
        &self.bets
    }

    pub fn totals(&self) -> PoolTotals {
        self.bets.totals()
    }

    /// Current multipliers for options A and B.
    pub fn odds(&self) -> (f64, f64) {
        let totals = self.totals();
        (
            odds::multiplier(totals.sum_a, totals.sum_b),
            odds::multiplier(totals.sum_b, totals.sum_a),
        )
    }

    pub fn side_of(&self, label: &str) -> Option<Side> {
        self.prediction.side_of(label)
    }

    pub fn view(&self) -> PredictionView {
        PredictionView {
            option_a: self.prediction.option_a.clone(),
            option_b: self.prediction.option_b.clone(),
            locked: self.prediction.status != PredictionStatus::Active,
        }
    }

    pub fn embed(&self) -> Embed {
        Embed::prediction(
            &self.prediction.title,
            (self.prediction.option_a.as_str(), self.prediction.option_b.as_str()),
            self.totals(),
            self.colour,
        )
    }

    fn store(&self) -> &Arc<dyn PersistentStore> {
        self.ledger.store()
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Reject a wager on `side` if the user already backs the other option.
    pub fn check_side(&self, user_id: UserId, side: Side) -> Result<(), PointsError> {
        match self.bets.position(user_id) {
            Some(held) if held != side => Err(PointsError::SideConflict {
                held: self.prediction.label(held).to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn ensure_accepting_bets(&self) -> Result<(), PointsError> {
        match self.prediction.status {
            PredictionStatus::Active => Ok(()),
            status => Err(PointsError::MarketClosed(status)),
        }
    }

    /// Escrow `points` from `user_id` on `side`.
    ///
    /// # Returns
    /// * `Err(MarketClosed)` - the market is no longer active
    /// * `Err(SideConflict)` - the user already bet on the other option
    /// * `Err(NonPositiveWager)` - `points` is zero
    /// * `Err(InsufficientFunds)` - the user's balance is below `points`
    pub async fn place_bet(
        &mut self,
        user_id: UserId,
        side: Side,
        points: Points,
    ) -> Result<BetReceipt, PointsError> {
        self.ensure_accepting_bets()?;
        self.check_side(user_id, side)?;
        if points == 0 {
            return Err(PointsError::NonPositiveWager);
        }

        let label = self.prediction.label(side).to_string();
        let bet = Bet {
            prediction_id: self.prediction.id,
            user_id,
            option: label.clone(),
            points,
        };
        self.ledger.escrow(&bet).await?;
        let (previous, total) = self.bets.merge(user_id, side, points);

        self.refresh_board().await;
        let mut text = format!("{} bet {} points on **{}**", mention(user_id), total, label);
        if previous > 0 {
            text.push_str(&format!("\n(up from {previous})"));
        }
        self.announce(&text).await;

        Ok(BetReceipt { side, previous, total, totals: self.totals() })
    }

    /// Stop taking bets. Returns `false` if the market was already locked.
    pub async fn lock(&mut self) -> Result<bool, PointsError> {
        match self.prediction.status {
            PredictionStatus::Active => {}
            PredictionStatus::Locked => return Ok(false),
            status => return Err(PointsError::MarketClosed(status)),
        }

        self.store()
            .set_status(self.prediction.id, PredictionStatus::Locked)
            .await?;
        self.prediction.status = PredictionStatus::Locked;

        self.refresh_view().await;
        self.announce("Prediction locked.").await;
        Ok(true)
    }

    /// Pay out a locked market to the bettors of `winner`.
    ///
    /// # Returns
    /// * `Err(NotLocked)` - the market is still taking bets
    /// * `Err(InvalidWinner)` - `winner` is neither option
    pub async fn complete(&mut self, winner: &str) -> Result<Settlement, PointsError> {
        match self.prediction.status {
            PredictionStatus::Locked => {}
            PredictionStatus::Active => return Err(PointsError::NotLocked),
            status => return Err(PointsError::MarketClosed(status)),
        }
        let winning = self
            .side_of(winner)
            .ok_or_else(|| PointsError::InvalidWinner {
                option_a: self.prediction.option_a.clone(),
                option_b: self.prediction.option_b.clone(),
            })?;

        let settlement = self.settle(winning);
        self.store()
            .settle(
                self.prediction.id,
                PredictionStatus::Completed,
                Some(winner.to_string()),
                settlement.credits(),
            )
            .await?;
        self.prediction.status = PredictionStatus::Completed;
        self.prediction.winner = Some(winner.to_string());

        let text = match &settlement {
            Settlement::Wash { .. } => {
                "Everyone voted the same way! Points refunded.".to_string()
            }
            Settlement::Payout { winner, multiplier, losing_pool, .. } => format!(
                "Prediction completed -- {} points distributed to {} ({}x payout).",
                losing_pool,
                self.prediction.label(*winner),
                odds::display(*multiplier)
            ),
        };
        self.refresh_view().await;
        self.announce(&text).await;
        info!(prediction = self.prediction.id, winner, "prediction completed");
        Ok(settlement)
    }

    /// Work out who gets what if `winning` wins. A one-sided market is a wash.
    fn settle(&self, winning: Side) -> Settlement {
        let losing = winning.opposite();
        let totals = self.bets.totals();
        if totals.is_one_sided() {
            return Settlement::Wash { credits: self.bets.refunds() };
        }

        let multiplier = odds::multiplier(totals.sum(winning), totals.sum(losing));
        let credits = self
            .bets
            .stakes(winning)
            .map(|(user, stake)| Credit::new(user, odds::payout(stake, multiplier)))
            .collect();
        Settlement::Payout {
            winner: winning,
            multiplier,
            losing_pool: totals.sum(losing),
            credits,
        }
    }

    /// Cancel the market and return every stake.
    pub async fn refund(&mut self) -> Result<Vec<Credit>, PointsError> {
        let status = self.prediction.status;
        if !status.is_open() {
            return Err(PointsError::MarketClosed(status));
        }

        let credits = self.bets.refunds();
        self.store()
            .settle(self.prediction.id, PredictionStatus::Refunded, None, &credits)
            .await?;
        self.prediction.status = PredictionStatus::Refunded;

        self.refresh_view().await;
        self.announce("Prediction cancelled. Points refunded.").await;
        info!(prediction = self.prediction.id, bettors = credits.len(), "prediction refunded");
        Ok(credits)
    }

    /// Refund from the persisted bets without touching the platform. Used when
    /// the market's thread is gone.
    pub async fn abandon(&mut self) -> Result<Vec<Credit>, PointsError> {
        let credits = force_refund(self.store().as_ref(), self.prediction.id).await?;
        self.prediction.status = PredictionStatus::Refunded;
        Ok(credits)
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    async fn refresh_board(&self) {
        let embed = self.embed();
        if let Err(err) = self.sink.edit(self.prediction.message_id, Some(&embed), None).await {
            warn!(prediction = self.prediction.id, error = %err, "failed to update prediction board");
        }
    }

    async fn refresh_view(&self) {
        let view = self.view();
        if let Err(err) = self.sink.edit(self.prediction.message_id, None, Some(&view)).await {
            warn!(prediction = self.prediction.id, error = %err, "failed to update prediction buttons");
        }
    }

    /// Reply under the prediction message. Delivery failures are logged; the
    /// ledger change they describe stands.
    async fn announce(&self, text: &str) {
        if let Err(err) = self.sink.reply(self.prediction.message_id, text).await {
            warn!(prediction = self.prediction.id, error = %err, "failed to post prediction update");
        }
    }

    /// Tell the channel a user tried to switch options.
    pub async fn call_out_side_change(&self, user_id: UserId) {
        self.announce(&format!("{} tried to change sides...", mention(user_id)))
            .await;
    }
}

/// Return every persisted stake of `prediction_id` and mark it refunded.
pub async fn force_refund(
    store: &dyn PersistentStore,
    prediction_id: PredictionId,
) -> Result<Vec<Credit>, PointsError> {
    let credits: Vec<Credit> = store
        .bets_for(prediction_id)
        .await?
        .into_iter()
        .map(|bet| Credit::new(bet.user_id, bet.points))
        .collect();
    store
        .settle(prediction_id, PredictionStatus::Refunded, None, &credits)
        .await?;
    Ok(credits)
}
