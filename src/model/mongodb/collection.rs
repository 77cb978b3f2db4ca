use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::{
    auth::{NewUser, User},
    poll::Poll,
    vote::{NewVote, PollVoter, Vote},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Poll collection
const POLLS: &str = "polls";
impl MongoCollection for Poll {
    const NAME: &'static str = POLLS;
}

// Vote collection
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}
impl MongoCollection for NewVote {
    const NAME: &'static str = VOTES;
}

// Poll-voter claim collection
const POLL_VOTERS: &str = "poll_voters";
impl MongoCollection for PollVoter {
    const NAME: &'static str = POLL_VOTERS;
}

// User collection
const USERS: &str = "users";
impl MongoCollection for User {
    const NAME: &'static str = USERS;
}
impl MongoCollection for NewUser {
    const NAME: &'static str = USERS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// The partial unique indexes are the storage-level arbiter for concurrent
/// duplicate submissions; application-level check-then-insert is not relied
/// upon. A vote document carries exactly one of `voter_user` or `voter_ip`,
/// so each identity scheme gets its own uniqueness constraint and the two can
/// never collide. The vote indexes key on (poll, option, identity); the claim
/// indexes on `poll_voters` key on (poll, identity) alone, catching the race
/// where one identity concurrently submits for different options.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Votes by authenticated user.
    let user_vote_index = IndexModel::builder()
        .keys(doc! {"poll_id": 1, "option_id": 1, "voter_user": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"voter_user": {"$exists": true}})
                .build(),
        )
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(user_vote_index, None)
        .await?;

    // Votes by anonymous fingerprint. Only the IP takes part in the
    // constraint; the user agent is recorded but trivially spoofable.
    let anon_vote_index = IndexModel::builder()
        .keys(doc! {"poll_id": 1, "option_id": 1, "voter_ip": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"voter_ip": {"$exists": true}})
                .build(),
        )
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(anon_vote_index, None)
        .await?;

    // One claim per identity per poll, whatever the selection. Two
    // same-identity transactions always collide here, even when their
    // selected options differ and the per-option vote indexes never fire.
    let user_claim_index = IndexModel::builder()
        .keys(doc! {"poll_id": 1, "voter_user": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"voter_user": {"$exists": true}})
                .build(),
        )
        .build();
    Coll::<PollVoter>::from_db(db)
        .create_index(user_claim_index, None)
        .await?;

    let anon_claim_index = IndexModel::builder()
        .keys(doc! {"poll_id": 1, "voter_ip": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"voter_ip": {"$exists": true}})
                .build(),
        )
        .build();
    Coll::<PollVoter>::from_db(db)
        .create_index(anon_claim_index, None)
        .await?;

    // Non-unique lookup index for "what has this identity voted for on this
    // poll" queries.
    let vote_lookup_index = IndexModel::builder()
        .keys(doc! {"poll_id": 1, "created_at": 1})
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_lookup_index, None)
        .await?;

    // User collection.
    let user_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique)
        .build();
    Coll::<User>::from_db(db)
        .create_index(user_index, None)
        .await?;

    Ok(())
}
