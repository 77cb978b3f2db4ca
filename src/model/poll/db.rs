use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::mongodb::{Coll, Id};

use super::PollCore;

/// A poll from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub poll: PollCore,
}

impl Poll {
    /// Registry lookup: the current poll document, straight from the
    /// collection. No caching layer exists, so reads cannot serve stale
    /// `Active` state beyond the driver's own read guarantees.
    pub async fn by_id(polls: &Coll<Poll>, id: Id) -> Result<Option<Poll>> {
        Ok(polls.find_one(id.as_doc(), None).await?)
    }
}

impl Deref for Poll {
    type Target = PollCore;

    fn deref(&self) -> &Self::Target {
        &self.poll
    }
}

impl DerefMut for Poll {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.poll
    }
}
