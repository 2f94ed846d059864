use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::accrual::{AccrualBuffer, ActivityEvent};
use crate::config::PointsConfig;
use crate::error::PointsError;
use crate::input::MarketInput;
use crate::ledger::PointsLedger;
use crate::notify::{thread_link, Embed, NotificationSink};
use crate::registry::{MarketRegistry, RecoveryReport};
use crate::state::{Points, PredictionId, ThreadId, UserId};
use crate::store::PersistentStore;
use crate::{Member, Operation};

/// What the bot answers a command with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Plain text; ephemeral replies are only shown to the invoker.
    Text { content: String, ephemeral: bool },
    Embed(Embed),
}

impl Reply {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Reply::Text { content: content.into(), ephemeral: true }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Reply::Text { ephemeral: true, .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Reply::Text { content, .. } => Some(content),
            Reply::Embed(_) => None,
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// Entry point for the bot: commands, activity events and platform events.
pub struct PointsService {
    config: PointsConfig,
    ledger: PointsLedger,
    registry: Arc<MarketRegistry>,
    accrual: Arc<AccrualBuffer>,
}

impl PointsService {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        sink: Arc<dyn NotificationSink>,
        config: PointsConfig,
    ) -> Self {
        let ledger = PointsLedger::new(store);
        let registry = Arc::new(MarketRegistry::new(ledger.clone(), sink, config.clone()));
        let accrual = Arc::new(AccrualBuffer::new(&config));
        Self { config, ledger, registry, accrual }
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<MarketRegistry> {
        &self.registry
    }

    pub fn accrual(&self) -> &Arc<AccrualBuffer> {
        &self.accrual
    }

    /// Restore markets left open by the previous process.
    pub async fn on_ready(&self) -> Result<RecoveryReport, PointsError> {
        self.registry.recover().await
    }

    pub fn on_message(&self, event: ActivityEvent) -> Option<Points> {
        self.accrual.on_message(event)
    }

    pub async fn on_thread_delete(&self, thread: ThreadId) -> Option<PredictionId> {
        match self.registry.on_thread_deleted(thread).await {
            Ok(refunded) => refunded,
            Err(err) => {
                error!(thread, error = %err, "failed to refund prediction of deleted thread");
                None
            }
        }
    }

    /// Start flushing activity rewards every `flush_interval_secs`.
    pub fn spawn_accrual_flusher(&self) -> JoinHandle<()> {
        self.accrual
            .clone()
            .spawn_flusher(self.ledger.clone(), self.config.flush_interval())
    }

    /// Button and modal handler for `creator_id`'s market.
    pub fn wager_input(&self, creator_id: UserId) -> MarketInput {
        MarketInput::new(self.registry.clone(), creator_id)
    }

    /// Run a command. Rejections come back as ephemeral replies, never errors.
    pub async fn execute(&self, invoker: &Member, operation: Operation) -> Reply {
        match self.dispatch(invoker, operation).await {
            Ok(reply) => reply,
            Err(err) => {
                match &err {
                    PointsError::Store(_) | PointsError::Notify(_) => {
                        warn!(invoker = invoker.id, error = %err, "points command failed")
                    }
                    _ => debug!(invoker = invoker.id, error = %err, "points command rejected"),
                }
                Reply::ephemeral(err.to_string())
            }
        }
    }

    async fn dispatch(&self, invoker: &Member, operation: Operation) -> Result<Reply, PointsError> {
        match operation {
            Operation::Balance { user } => {
                let target = user.as_ref().unwrap_or(invoker);
                let points = self.ledger.balance(target.id).await?;
                Ok(Reply::Embed(Embed::balance(
                    &target.display_name,
                    points,
                    self.config.embed_colour,
                )))
            }
            Operation::StartPrediction { title, option_a, option_b } => {
                let market = self
                    .registry
                    .start(invoker.id, &title, &option_a, &option_b)
                    .await?;
                let thread = market.lock().await.thread_id();
                Ok(Reply::ephemeral(format!("Prediction started: {}", thread_link(thread))))
            }
            Operation::LockPrediction => {
                self.registry.lock(invoker.id).await?;
                Ok(Reply::ephemeral("Prediction locked."))
            }
            Operation::CompletePrediction { winner } => {
                self.registry.complete(invoker.id, &winner).await?;
                Ok(Reply::ephemeral(format!("Prediction completed for {winner}.")))
            }
            Operation::RefundPrediction => {
                self.registry.refund(invoker.id).await?;
                Ok(Reply::ephemeral("Prediction refunded."))
            }
        }
    }
}
