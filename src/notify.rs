use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bets::PoolTotals;
use crate::error::NotifyError;
use crate::odds;
use crate::state::{MessageId, Points, Side, ThreadId};

/// Outbound side of the chat platform. Markets call these; they never look at
/// platform payloads.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Post a plain message in the channel the command came from.
    async fn post(&self, text: &str) -> Result<MessageId, NotifyError>;

    async fn create_thread(&self, name: &str) -> Result<ThreadId, NotifyError>;

    async fn send(
        &self,
        thread: ThreadId,
        text: &str,
        embed: &Embed,
        view: &PredictionView,
    ) -> Result<MessageId, NotifyError>;

    async fn edit(
        &self,
        message: MessageId,
        embed: Option<&Embed>,
        view: Option<&PredictionView>,
    ) -> Result<(), NotifyError>;

    async fn reply(&self, message: MessageId, text: &str) -> Result<(), NotifyError>;

    /// Confirm a thread still exists and is visible to the bot.
    async fn resolve_thread(&self, thread: ThreadId) -> Result<ThreadId, NotifyError>;

    /// Look up a message in a thread; `Ok(None)` if it was deleted.
    async fn fetch_message(
        &self,
        thread: ThreadId,
        message: MessageId,
    ) -> Result<Option<MessageId>, NotifyError>;
}

// ============================================================================
// Rendering
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: Option<String>,
    pub colour: [u8; 3],
    pub fields: Vec<EmbedField>,
}

impl Embed {
    /// The live board of a prediction: pool, bettors and payout per option.
    pub fn prediction(
        title: &str,
        labels: (&str, &str),
        totals: PoolTotals,
        colour: [u8; 3],
    ) -> Self {
        let field = |side: Side, name: &str| {
            let own = totals.sum(side);
            EmbedField {
                name: name.to_string(),
                value: format!(
                    "{} points\n{} users\n{}x payout",
                    own,
                    totals.count(side),
                    odds::display_for(own, totals.sum(side.opposite()))
                ),
            }
        };
        Embed {
            title: title.to_string(),
            description: None,
            colour,
            fields: vec![field(Side::A, labels.0), field(Side::B, labels.1)],
        }
    }

    pub fn balance(display_name: &str, points: Points, colour: [u8; 3]) -> Self {
        Embed {
            title: format!("{display_name}'s points"),
            description: Some(format!("{points} points")),
            colour,
            fields: Vec::new(),
        }
    }
}

/// The two option buttons under a prediction message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionView {
    pub option_a: String,
    pub option_b: String,
    /// Buttons are disabled once the market stops taking bets.
    pub locked: bool,
}

/// Mention markup for a user.
pub fn mention(user_id: u64) -> String {
    format!("<@{user_id}>")
}

/// Link markup for a thread.
pub fn thread_link(thread: ThreadId) -> String {
    format!("<#{thread}>")
}
