use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{identity::Identity, mongodb::Id};

use super::VoterKey;

/// A per-(poll, identity) claim, inserted in the same transaction as the
/// vote documents it covers.
///
/// The vote uniqueness indexes key on (poll, option, identity), so two
/// concurrent submissions by one identity that select different options
/// never collide there. The claim's uniqueness constraint keys on the poll
/// alone, making it the storage-level arbiter for that race: exactly one of
/// the two transactions commits, and the loser fails at commit with a
/// duplicate-key error translated to `AlreadyVoted`. One claim covers a
/// whole multi-select submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollVoter {
    pub poll_id: Id,
    #[serde(flatten)]
    pub voter: VoterKey,
    pub created_at: DateTime<Utc>,
}

impl PollVoter {
    pub fn new(poll_id: Id, identity: &Identity, created_at: DateTime<Utc>) -> Self {
        Self {
            poll_id,
            voter: VoterKey::from_identity(identity),
            created_at,
        }
    }
}
