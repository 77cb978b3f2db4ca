use chrono::{DateTime, Utc};
use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// States in the poll lifecycle: `Draft -> Active -> Ended`.
///
/// There is no transition from `Ended` back to `Active`. Independently of the
/// stored state, a poll whose `end_time` has passed is treated as effectively
/// ended without mutating the document; see [`PollCore::is_expired`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollState {
    /// Under construction, not accepting votes.
    Draft,
    /// Open for voting (subject to `end_time`).
    Active,
    /// Closed. Terminal.
    Ended,
}

impl From<PollState> for Bson {
    fn from(state: PollState) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

/// A single selectable option, embedded in its poll document.
///
/// `votes` is denormalised from the vote log and maintained transactionally
/// with it; the log stays authoritative and a recount can rebuild it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: Id,
    pub text: String,
    pub votes: u64,
    pub order_index: u32,
}

/// Core poll data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCore {
    pub title: String,
    pub description: String,
    pub state: PollState,
    pub allow_multiple_votes: bool,
    pub require_login: bool,
    pub end_time: Option<DateTime<Utc>>,
    /// Denormalised count of vote documents referencing this poll.
    pub total_votes: u64,
    pub options: Vec<PollOption>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PollCore {
    /// Look up an embedded option by ID.
    pub fn option(&self, id: Id) -> Option<&PollOption> {
        self.options.iter().find(|opt| opt.id == id)
    }

    /// Has the poll's end time passed?
    ///
    /// This functions as an implicit transition into an effective-ended
    /// state, regardless of the stored `state` field.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.end_time, Some(end) if end <= now)
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use chrono::Duration;

    use super::*;

    impl PollCore {
        /// An active two-option single-select poll open to anonymous voters.
        pub fn example() -> Self {
            let now = Utc::now();
            Self {
                title: "Favourite season?".to_string(),
                description: "Pick one.".to_string(),
                state: PollState::Active,
                allow_multiple_votes: false,
                require_login: false,
                end_time: Some(now + Duration::days(7)),
                total_votes: 0,
                options: vec![
                    PollOption {
                        id: Id::new(),
                        text: "Summer".to_string(),
                        votes: 0,
                        order_index: 0,
                    },
                    PollOption {
                        id: Id::new(),
                        text: "Winter".to_string(),
                        votes: 0,
                        order_index: 1,
                    },
                ],
                created_at: now,
                updated_at: now,
            }
        }

        pub fn multi_select_example() -> Self {
            Self {
                title: "Which toppings?".to_string(),
                allow_multiple_votes: true,
                ..Self::example()
            }
        }

        pub fn login_required_example() -> Self {
            Self {
                require_login: true,
                ..Self::example()
            }
        }

        pub fn expired_example() -> Self {
            Self {
                end_time: Some(Utc::now() - Duration::days(1)),
                ..Self::example()
            }
        }
    }
}
