//! Administrative repair operations. Not part of the voting request path.

use mongodb::Client;
use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        auth::{AuthToken, User},
        identity::Identity,
        mongodb::{Coll, Id},
        poll::Poll,
        security::{CsrfVerdict, Limiters, RateLimitDecision},
        vote::{ledger, Vote},
    },
};

use super::voting::PollStats;

pub fn routes() -> Vec<Route> {
    routes![recount_poll]
}

/// Rebuild a poll's counters from the vote log.
///
/// The ledger is the source of truth; this repairs any counter drift and
/// returns the recomputed statistics. Mutating and always session-bearing,
/// so both gateway stages apply before anything runs.
#[post("/polls/<poll_id>/recount")]
async fn recount_poll(
    token: AuthToken,
    csrf: CsrfVerdict,
    poll_id: Id,
    users: Coll<User>,
    polls: Coll<Poll>,
    votes: Coll<Vote>,
    limiters: &State<Limiters>,
    db_client: &State<Client>,
) -> Result<Json<PollStats>> {
    check_gateway(limiters, &token, &csrf)?;

    let user = users
        .find_one(token.user_id.as_doc(), None)
        .await?
        .ok_or_else(|| {
            Error::Status(Status::Unauthorized, "Token user no longer exists".to_string())
        })?;
    if !user.admin {
        return Err(Error::Status(
            Status::Forbidden,
            format!("User {} may not run a recount", user.username),
        ));
    }

    let poll = ledger::recount(db_client, &polls, &votes, poll_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Poll {}", poll_id)))?;

    Ok(Json(PollStats::from_poll(&poll)))
}

/// The security gateway for admin operations: rate limit (shared with the
/// auth category), then forgery-token verification, failing closed. Unlike
/// vote submission there is no typed-outcome body here, so denials travel as
/// error statuses.
fn check_gateway(limiters: &Limiters, token: &AuthToken, csrf: &CsrfVerdict) -> Result<()> {
    let identity = Identity::Authenticated {
        user_id: token.user_id,
    };
    if let RateLimitDecision::Limited { retry_after } =
        limiters.auth.check(&identity.rate_key("auth"))
    {
        return Err(Error::Status(
            Status::TooManyRequests,
            format!("Too many admin requests, retry in {}s", retry_after),
        ));
    }

    if !csrf.passed {
        return Err(Error::Status(
            Status::Forbidden,
            "Forgery check failed".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::security::{RateQuota, WindowRateLimiter};

    fn limiters(max: u32) -> Limiters {
        Limiters {
            vote: Box::new(WindowRateLimiter::new(RateQuota::new(max, 60))),
            auth: Box::new(WindowRateLimiter::new(RateQuota::new(max, 60))),
        }
    }

    fn token() -> AuthToken {
        AuthToken {
            user_id: Id::new(),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn gateway_passes_within_quota_with_valid_forgery_token() {
        let limiters = limiters(5);
        let result = check_gateway(&limiters, &token(), &CsrfVerdict { passed: true });
        assert!(result.is_ok());
    }

    #[test]
    fn gateway_fails_closed_on_forgery_check() {
        let limiters = limiters(5);
        let result = check_gateway(&limiters, &token(), &CsrfVerdict { passed: false });
        assert!(matches!(
            result,
            Err(Error::Status(status, _)) if status == Status::Forbidden
        ));
    }

    #[test]
    fn gateway_rate_limits_repeat_requests() {
        let limiters = limiters(1);
        let token = token();
        assert!(check_gateway(&limiters, &token, &CsrfVerdict { passed: true }).is_ok());
        let result = check_gateway(&limiters, &token, &CsrfVerdict { passed: true });
        assert!(matches!(
            result,
            Err(Error::Status(status, _)) if status == Status::TooManyRequests
        ));
    }
}
