//! Community points and pari-mutuel prediction markets for a chat bot.
//!
//! Activity earns points through the [`AccrualBuffer`]; creators open
//! [`PredictionMarket`]s that members bet those points on. The chat platform
//! and the database sit behind the [`NotificationSink`] and [`PersistentStore`]
//! traits.

use serde::{Deserialize, Serialize};

pub mod accrual;
pub mod bets;
pub mod commands;
pub mod config;
pub mod error;
pub mod input;
pub mod ledger;
pub mod market;
pub mod notify;
pub mod odds;
pub mod registry;
pub mod service;
pub mod state;
pub mod store;

// Re-export types for convenience
pub use accrual::{AccrualBuffer, ActivityEvent};
pub use bets::{BetLedger, PoolTotals};
pub use commands::{PointsService, Reply};
pub use config::{ConfigError, PointsConfig};
pub use error::{NotifyError, PointsError, StoreError};
pub use input::{MarketInput, WagerInput, WagerPrompt};
pub use ledger::PointsLedger;
pub use market::{BetReceipt, PredictionMarket, Settlement};
pub use notify::{Embed, EmbedField, NotificationSink, PredictionView};
pub use registry::{MarketRegistry, MarketSnapshot, RecoveryReport, SharedMarket};
pub use service::{build_schema, PointsSchema, QueryRoot};
pub use state::{
    Bet, Credit, MessageId, NewPrediction, Points, Prediction, PredictionId, PredictionStatus,
    Side, ThreadId, User, UserId,
};
pub use store::{MemoryStore, PersistentStore};

/// A guild member as the command framework hands it over.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Member {
    pub id: UserId,
    pub display_name: String,
}

/// The `points` command group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Operation {
    /// `points balance [user]`
    Balance { user: Option<Member> },

    /// `points prediction start <title> <option_a> <option_b>`
    StartPrediction {
        title: String,
        option_a: String,
        option_b: String,
    },
    /// `points prediction lock`
    LockPrediction,
    /// `points prediction complete <winner>`
    CompletePrediction { winner: String },
    /// `points prediction refund`
    RefundPrediction,
}
