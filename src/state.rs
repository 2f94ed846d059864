use std::fmt;
use std::str::FromStr;

use async_graphql::{Enum, SimpleObject};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type PredictionId = u64;
pub type ThreadId = u64;
pub type MessageId = u64;
pub type Points = u64;

// ============================================================================
// Users
// ============================================================================

/// A member of the community and their point balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct User {
    pub id: UserId,
    pub points: Points,
}

// ============================================================================
// Predictions
// ============================================================================

/// Lifecycle of a prediction.
///
/// Transitions only move forward: `Active -> Locked -> {Completed, Refunded}`,
/// plus `Active -> Refunded`. The two terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Active,
    Locked,
    Completed,
    Refunded,
}

impl PredictionStatus {
    /// Whether the prediction still holds escrowed points.
    pub fn is_open(self) -> bool {
        matches!(self, PredictionStatus::Active | PredictionStatus::Locked)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredictionStatus::Active => "active",
            PredictionStatus::Locked => "locked",
            PredictionStatus::Completed => "completed",
            PredictionStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PredictionStatus::Active),
            "locked" => Ok(PredictionStatus::Locked),
            "completed" => Ok(PredictionStatus::Completed),
            "refunded" => Ok(PredictionStatus::Refunded),
            other => Err(format!("unknown prediction status `{other}`")),
        }
    }
}

/// One of the two sides of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// A persisted prediction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct Prediction {
    pub id: PredictionId,
    pub creator_id: UserId,
    pub title: String,
    pub option_a: String,
    pub option_b: String,
    pub status: PredictionStatus,
    pub winner: Option<String>,
    pub thread_id: ThreadId,
    pub message_id: MessageId,
}

impl Prediction {
    /// The label shown for `side`.
    pub fn label(&self, side: Side) -> &str {
        match side {
            Side::A => &self.option_a,
            Side::B => &self.option_b,
        }
    }

    /// Map an option label back to its side, if it names one.
    pub fn side_of(&self, label: &str) -> Option<Side> {
        if label == self.option_a {
            Some(Side::A)
        } else if label == self.option_b {
            Some(Side::B)
        } else {
            None
        }
    }
}

/// Everything needed to insert a prediction row; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub creator_id: UserId,
    pub title: String,
    pub option_a: String,
    pub option_b: String,
    pub thread_id: ThreadId,
    pub message_id: MessageId,
}

// ============================================================================
// Bets
// ============================================================================

/// A user's position in one prediction. `option` holds the option label, as
/// the `prediction_bets` table does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct Bet {
    pub prediction_id: PredictionId,
    pub user_id: UserId,
    pub option: String,
    pub points: Points,
}

/// A credit to apply to a user's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub user_id: UserId,
    pub points: Points,
}

impl Credit {
    pub fn new(user_id: UserId, points: Points) -> Self {
        Credit { user_id, points }
    }
}
