//! The vote ledger: the uniqueness-constrained system of record, plus the
//! aggregator that keeps the denormalised counters in step with it.
//!
//! `submit` combines the eligibility read and the vote insert so that two
//! concurrent submissions from the same identity cannot both succeed: each
//! transaction also inserts a per-(poll, identity) claim, whose unique
//! partial indexes (see [`crate::model::mongodb::ensure_indexes_exist`])
//! make the second writer fail at commit time with a duplicate-key error,
//! which is translated into `AlreadyVoted`. The claim keys on the poll
//! alone, so the race is lost even when the two submissions select
//! different options and the per-option vote indexes never fire. The
//! pre-flight eligibility check alone is never trusted to prevent the race.

use chrono::Utc;
use mongodb::{bson::doc, error::TRANSIENT_TRANSACTION_ERROR, Client};
use rocket::{futures::TryStreamExt, http::Status};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{
    eligibility::{self, DenialReason},
    identity::VoterContext,
    mongodb::{is_duplicate_key_error, Coll, Id},
    poll::Poll,
    vote::{NewVote, PollVoter, Vote, VoteCore, VoterKey},
};

/// The outcome of a submission attempt: accepted, or refused with a reason.
/// Infrastructure failures travel separately via [`Error`].
pub type SubmitResult = std::result::Result<(), DenialReason>;

/// Cast one vote per selected option for the calling identity, atomically.
///
/// Either every vote document commits together with its counter increments,
/// or nothing does. On a lost uniqueness race the transaction aborts cleanly
/// and the caller sees `AlreadyVoted`, never a partial write or a raw
/// storage error. Transient write conflicts between overlapping transactions
/// are retried a bounded number of times; a retry after the rival committed
/// lands on the claim's unique index and reports `AlreadyVoted` too.
pub async fn submit(
    db_client: &Client,
    polls: &Coll<Poll>,
    votes: &Coll<NewVote>,
    claims: &Coll<PollVoter>,
    ctx: &VoterContext,
    poll_id: Id,
    option_ids: &[Id],
) -> Result<SubmitResult> {
    let poll = match Poll::by_id(polls, poll_id).await? {
        Some(poll) => poll,
        None => return Ok(Err(DenialReason::NotFound)),
    };

    let prior_votes = votes
        .count_documents(
            VoterKey::prior_votes_filter(poll_id, &ctx.identity),
            None,
        )
        .await?;

    if let Err(reason) = eligibility::check(
        &poll,
        &ctx.identity,
        ctx.stale_session,
        prior_votes,
        option_ids,
        Utc::now(),
    ) {
        return Ok(Err(reason));
    }

    let now = Utc::now();
    let new_votes = option_ids
        .iter()
        .map(|&option_id| VoteCore::new(poll_id, option_id, &ctx.identity, now))
        .collect::<Vec<_>>();

    let mut session = db_client.start_session(None).await?;

    const MAX_TRANSACTION_ATTEMPTS: u32 = 3;
    let mut attempts = 0;
    loop {
        attempts += 1;
        session.start_transaction(None).await?;

        let result = async {
            // The claim is the arbiter for concurrent same-identity
            // submissions: whichever transaction commits second hits its
            // unique index.
            claims
                .insert_one_with_session(
                    PollVoter::new(poll_id, &ctx.identity, now),
                    None,
                    &mut session,
                )
                .await?;

            votes
                .insert_many_with_session(&new_votes, None, &mut session)
                .await?;

            // Aggregator: counters move in the same transaction as the
            // inserts, as server-side increments rather than
            // read-modify-write.
            for &option_id in option_ids {
                let updated = polls
                    .update_one_with_session(
                        doc! {"_id": poll_id, "options.id": option_id},
                        doc! {"$inc": {"options.$.votes": 1, "total_votes": 1}},
                        None,
                        &mut session,
                    )
                    .await?;
                if updated.matched_count != 1 {
                    return Err(Error::Status(
                        Status::InternalServerError,
                        format!("Poll {} lost option {} mid-transaction", poll_id, option_id),
                    ));
                }
            }
            Ok(())
        }
        .await;

        return match result {
            Ok(()) => {
                session.commit_transaction().await?;
                // Who voted is deliberately not logged here.
                info!("Recorded {} vote(s) on poll {}", new_votes.len(), poll_id);
                Ok(Ok(()))
            }
            Err(Error::Db(ref db_err)) if is_duplicate_key_error(db_err) => {
                // Lost the uniqueness race against a concurrent submission.
                let _ = session.abort_transaction().await;
                Ok(Err(DenialReason::AlreadyVoted))
            }
            Err(Error::Db(ref db_err))
                if db_err.contains_label(TRANSIENT_TRANSACTION_ERROR)
                    && attempts < MAX_TRANSACTION_ATTEMPTS =>
            {
                // Write conflict with an overlapping transaction. If the
                // rival was this same identity, the retry hits the claim
                // index and reports AlreadyVoted.
                let _ = session.abort_transaction().await;
                debug!("Transient transaction error on poll {}, retrying", poll_id);
                continue;
            }
            Err(e) => {
                let _ = session.abort_transaction().await;
                Err(e)
            }
        };
    }
}

/// The option IDs this identity has voted for on the given poll, for
/// rendering already-voted state. An unresolved anonymous identity has
/// nothing attributable to it and gets an empty list.
pub async fn votes_for_identity(
    votes: &Coll<Vote>,
    poll_id: Id,
    ctx: &VoterContext,
) -> Result<Vec<Id>> {
    if ctx.identity.is_unresolved() {
        return Ok(Vec::new());
    }
    let cast = votes
        .find(VoterKey::prior_votes_filter(poll_id, &ctx.identity), None)
        .await?
        .try_collect::<Vec<_>>()
        .await?;
    Ok(cast.into_iter().map(|vote| vote.option_id).collect())
}

/// Rebuild a poll's denormalised counters from the vote log.
///
/// Repair operation for counter drift; not part of the request path. Runs in
/// its own transaction so a concurrent `submit` cannot interleave between the
/// recount read and the counter writes.
pub async fn recount(
    db_client: &Client,
    polls: &Coll<Poll>,
    votes: &Coll<Vote>,
    poll_id: Id,
) -> Result<Option<Poll>> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    let result = async {
        let mut poll = match polls
            .find_one_with_session(poll_id.as_doc(), None, &mut session)
            .await?
        {
            Some(poll) => poll,
            None => return Ok(None),
        };

        let pipeline = vec![
            doc! {"$match": {"poll_id": poll_id}},
            doc! {"$group": {"_id": "$option_id", "count": {"$sum": 1}}},
        ];
        let mut counts = HashMap::new();
        let mut cursor = votes
            .aggregate_with_session(pipeline, None, &mut session)
            .await?;
        while let Some(group) = cursor.next(&mut session).await {
            let group = group?;
            let option_id: Id = group.get_object_id("_id").map_err(bad_group)?.into();
            let count = group
                .get_i32("count")
                .map(i64::from)
                .or_else(|_| group.get_i64("count"))
                .map_err(bad_group)?;
            counts.insert(option_id, count);
        }

        let mut total: u64 = 0;
        for option in &mut poll.poll.options {
            let count = counts.remove(&option.id).unwrap_or(0) as u64;
            total += count;
            polls
                .update_one_with_session(
                    doc! {"_id": poll_id, "options.id": option.id},
                    doc! {"$set": {"options.$.votes": count as i64}},
                    None,
                    &mut session,
                )
                .await?;
            option.votes = count;
        }
        polls
            .update_one_with_session(
                poll_id.as_doc(),
                doc! {"$set": {"total_votes": total as i64}},
                None,
                &mut session,
            )
            .await?;
        poll.poll.total_votes = total;

        Ok(Some(poll))
    }
    .await;

    match result {
        Ok(poll) => {
            session.commit_transaction().await?;
            if let Some(ref poll) = poll {
                info!(
                    "Recounted poll {}: {} vote(s) across {} option(s)",
                    poll_id,
                    poll.total_votes,
                    poll.options.len(),
                );
            }
            Ok(poll)
        }
        Err(e) => {
            let _ = session.abort_transaction().await;
            Err(e)
        }
    }
}

fn bad_group(err: mongodb::bson::document::ValueAccessError) -> Error {
    Error::Status(
        Status::InternalServerError,
        format!("Malformed recount aggregation result: {}", err),
    )
}
