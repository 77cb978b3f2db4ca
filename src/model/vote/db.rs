use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

use super::VoteCore;

/// A vote from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}
