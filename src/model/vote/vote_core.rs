use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use crate::model::{identity::Identity, mongodb::Id};

/// The identity key of a vote document: exactly one of the two schemes,
/// never both and never neither.
///
/// With the untagged representation the two variants serialise to disjoint
/// field sets (`voter_user` vs `voter_ip` + `voter_user_agent`), which is
/// what the partial unique indexes key on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoterKey {
    User { voter_user: Id },
    Anonymous {
        voter_ip: String,
        voter_user_agent: String,
    },
}

impl VoterKey {
    /// The key under which this identity's votes are stored and deduplicated.
    pub fn from_identity(identity: &Identity) -> Self {
        match identity {
            Identity::Authenticated { user_id } => Self::User {
                voter_user: *user_id,
            },
            Identity::Anonymous { ip, user_agent } => Self::Anonymous {
                voter_ip: ip.clone(),
                voter_user_agent: user_agent.clone(),
            },
        }
    }

    /// Filter matching all votes this identity has cast on the given poll.
    ///
    /// Deliberately the same key as the uniqueness constraints: user ID for
    /// authenticated votes, IP alone for anonymous ones (the user agent is
    /// recorded but not part of the dedup key).
    pub fn prior_votes_filter(poll_id: Id, identity: &Identity) -> Document {
        match identity {
            Identity::Authenticated { user_id } => doc! {
                "poll_id": poll_id,
                "voter_user": *user_id,
            },
            Identity::Anonymous { ip, .. } => doc! {
                "poll_id": poll_id,
                "voter_ip": ip,
            },
        }
    }
}

/// Core vote data, as stored in the database. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    pub poll_id: Id,
    pub option_id: Id,
    #[serde(flatten)]
    pub voter: VoterKey,
    pub created_at: DateTime<Utc>,
}

impl VoteCore {
    pub fn new(poll_id: Id, option_id: Id, identity: &Identity, created_at: DateTime<Utc>) -> Self {
        Self {
            poll_id,
            option_id,
            voter: VoterKey::from_identity(identity),
            created_at,
        }
    }
}

/// A vote without an ID, ready for insertion.
pub type NewVote = VoteCore;
