//! The narrow interface the engine exposes to the (out-of-scope) UI layer:
//! vote submission, already-voted lookup, and poll statistics.

use mongodb::Client;
use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    eligibility::DenialReason,
    identity::VoterContext,
    mongodb::{Coll, Id},
    poll::{Poll, PollCore},
    security::{CsrfVerdict, Limiters, RateLimitDecision},
    vote::{ledger, NewVote, PollVoter, Vote},
};

pub fn routes() -> Vec<Route> {
    routes![submit_vote, my_votes, poll_stats]
}

/// Cast votes on a poll.
///
/// The security gateway stages run in order before the engine: rate limit
/// (fails open internally, but a denial is a denial), then forgery-token
/// verification for session-bearing requests (fails closed). Session
/// freshness is folded into identity resolution. Every refusal is a typed
/// `VoteOutcome`, not an error status.
#[post("/polls/<poll_id>/votes", data = "<spec>", format = "json")]
async fn submit_vote(
    ctx: VoterContext,
    csrf: CsrfVerdict,
    poll_id: Id,
    spec: Json<VoteSpec>,
    polls: Coll<Poll>,
    votes: Coll<NewVote>,
    claims: Coll<PollVoter>,
    limiters: &State<Limiters>,
    db_client: &State<Client>,
) -> Result<Json<VoteOutcome>> {
    if let RateLimitDecision::Limited { retry_after } =
        limiters.vote.check(&ctx.identity.rate_key("vote"))
    {
        return Ok(Json(VoteOutcome::rate_limited(retry_after)));
    }

    if ctx.session_bearing && !csrf.passed {
        return Ok(Json(VoteOutcome::denied(DenialReason::ForgeryCheckFailed)));
    }

    let outcome = ledger::submit(
        db_client,
        &polls,
        &votes,
        &claims,
        &ctx,
        poll_id,
        &spec.option_ids,
    )
    .await?;

    Ok(Json(match outcome {
        Ok(()) => VoteOutcome::accepted(),
        Err(reason) => VoteOutcome::denied(reason),
    }))
}

/// The option IDs the calling identity has already voted for on this poll.
#[get("/polls/<poll_id>/votes/mine")]
async fn my_votes(
    ctx: VoterContext,
    poll_id: Id,
    polls: Coll<Poll>,
    votes: Coll<Vote>,
) -> Result<Json<Vec<Id>>> {
    if Poll::by_id(&polls, poll_id).await?.is_none() {
        return Err(Error::not_found(format!("Poll {}", poll_id)));
    }
    let cast = ledger::votes_for_identity(&votes, poll_id, &ctx).await?;
    Ok(Json(cast))
}

/// Denormalised tallies for a poll.
#[get("/polls/<poll_id>/stats")]
async fn poll_stats(poll_id: Id, polls: Coll<Poll>) -> Result<Json<PollStats>> {
    let poll = Poll::by_id(&polls, poll_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Poll {}", poll_id)))?;
    Ok(Json(PollStats::from_poll(&poll)))
}

/// A submission body: the options the caller wishes to vote for.
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct VoteSpec {
    pub option_ids: Vec<Id>,
}

/// The typed result of a submission attempt.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    /// Seconds to wait; present only for `RateLimited`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl VoteOutcome {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            reason: None,
            retry_after: None,
        }
    }

    pub fn denied(reason: DenialReason) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            ok: false,
            reason: Some(DenialReason::RateLimited),
            retry_after: Some(retry_after),
        }
    }
}

/// Per-poll statistics derived from the denormalised counters.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct PollStats {
    pub total_votes: u64,
    pub options: Vec<OptionStats>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionStats {
    pub option_id: Id,
    pub votes: u64,
    pub percentage: f64,
}

impl PollStats {
    pub fn from_poll(poll: &PollCore) -> Self {
        let total = poll.total_votes;
        let options = poll
            .options
            .iter()
            .map(|opt| OptionStats {
                option_id: opt.id,
                votes: opt.votes,
                percentage: percentage(opt.votes, total),
            })
            .collect();
        Self {
            total_votes: total,
            options,
        }
    }
}

/// Share of `votes` in `total`, rounded to one decimal place. A poll with no
/// votes reports zero for every option rather than dividing by zero.
fn percentage(votes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (votes as f64 * 1000.0 / total as f64).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::poll::PollOption;

    #[test]
    fn percentages_from_counters() {
        let mut poll = PollCore::example();
        poll.options[0].votes = 3;
        poll.options[1].votes = 1;
        poll.total_votes = 4;

        let stats = PollStats::from_poll(&poll);
        assert_eq!(stats.total_votes, 4);
        assert_eq!(stats.options[0].votes, 3);
        assert_eq!(stats.options[0].percentage, 75.0);
        assert_eq!(stats.options[1].percentage, 25.0);
    }

    #[test]
    fn thirds_round_to_one_decimal() {
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
    }

    #[test]
    fn empty_poll_reports_zero_percentages() {
        let mut poll = PollCore::example();
        poll.options.push(PollOption {
            id: Id::new(),
            text: "Spring".to_string(),
            votes: 0,
            order_index: 2,
        });

        let stats = PollStats::from_poll(&poll);
        assert_eq!(stats.total_votes, 0);
        assert!(stats.options.iter().all(|opt| opt.percentage == 0.0));
    }

    #[test]
    fn outcome_serialisation_shape() {
        let json = rocket::serde::json::serde_json::to_value(VoteOutcome::accepted()).unwrap();
        assert_eq!(json, rocket::serde::json::serde_json::json!({"ok": true}));

        let json =
            rocket::serde::json::serde_json::to_value(VoteOutcome::denied(DenialReason::AlreadyVoted))
                .unwrap();
        assert_eq!(
            json,
            rocket::serde::json::serde_json::json!({"ok": false, "reason": "AlreadyVoted"})
        );

        let json =
            rocket::serde::json::serde_json::to_value(VoteOutcome::rate_limited(42)).unwrap();
        assert_eq!(
            json,
            rocket::serde::json::serde_json::json!({
                "ok": false,
                "reason": "RateLimited",
                "retry_after": 42,
            })
        );
    }
}
