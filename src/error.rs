use thiserror::Error;

use crate::state::{PredictionId, Points, PredictionStatus, ThreadId};

// ============================================================================
// Errors
// ============================================================================

/// Failures raised by the persistence layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("insufficient balance: {available} points available")] InsufficientFunds { available: Points },
    #[error("prediction {0} not found")] PredictionNotFound(PredictionId),
    #[error("prediction {id} is {status}")] PredictionClosed { id: PredictionId, status: PredictionStatus },
    #[error("storage backend failure: {0}")] Backend(String),
}

/// Failures raised by the chat platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("not found")] NotFound,
    #[error("forbidden")] Forbidden,
    #[error("platform failure: {0}")] Transport(String),
}

impl NotifyError {
    /// Deleted and inaccessible resources need the same recovery action.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, NotifyError::NotFound | NotifyError::Forbidden)
    }
}

/// Every rejection a points command can produce. The `Display` text is the
/// message shown to the invoking user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointsError {
    #[error("You already have a prediction open.")] DuplicateMarket,
    #[error("Options must be different.")] InvalidOptions,
    #[error("Winner must be one of the options: `{option_a}` or `{option_b}`")] InvalidWinner { option_a: String, option_b: String },
    #[error("You already bet on **{held}** and can't change sides.")] SideConflict { held: String },
    #[error("You don't have enough points!")] InsufficientFunds,
    #[error("You must wager a numeric amount!")] NotANumber,
    #[error("You must wager more than 0 points!")] NonPositiveWager,
    #[error("The prediction thread {0} is no longer reachable.")] ThreadUnreachable(ThreadId),
    #[error("You don't have a prediction open.")] NoOpenMarket,
    #[error("This prediction is {0} and no longer accepts that action.")] MarketClosed(PredictionStatus),
    #[error("Lock the prediction before completing it.")] NotLocked,
    #[error("Something went wrong saving that; nothing was changed. ({0})")]
    Store(#[from] StoreError),
    #[error("Something went wrong talking to the platform. ({0})")]
    Notify(#[from] NotifyError),
}

impl PointsError {
    /// Store-level balance rejections surface as the domain error.
    pub(crate) fn from_escrow(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientFunds { .. } => PointsError::InsufficientFunds,
            StoreError::PredictionClosed { status, .. } => PointsError::MarketClosed(status),
            other => PointsError::Store(other),
        }
    }
}
