//! The eligibility validator: pure decision logic for vote submission.
//!
//! Every check here is a function of its inputs alone (poll state, resolved
//! identity, the caller's prior votes, the requested selection, and the
//! current time), so each rule is independently unit-testable. The first
//! failing check wins and yields its distinct [`DenialReason`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    identity::Identity,
    mongodb::Id,
    poll::{PollCore, PollState},
};

/// The closed set of machine-readable refusal codes.
///
/// Denials are expected, user-facing outcomes returned as values; they are
/// never raised through the error channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    NotFound,
    NotActive,
    Expired,
    LoginRequired,
    IdentityUnresolved,
    InvalidSelection,
    MultipleVotesNotAllowed,
    AlreadyVoted,
    RateLimited,
    ForgeryCheckFailed,
    SessionInvalid,
}

/// Decide whether `identity` may cast the requested votes on `poll` at `now`.
///
/// The caller has already established the poll exists (`NotFound` is its
/// denial to make) and counted `prior_votes`, the number of vote documents
/// this identity already has on this poll.
pub fn check(
    poll: &PollCore,
    identity: &Identity,
    stale_session: bool,
    prior_votes: u64,
    option_ids: &[Id],
    now: DateTime<Utc>,
) -> Result<(), DenialReason> {
    if poll.state != PollState::Active {
        return Err(DenialReason::NotActive);
    }

    // Past end time acts as an effective Ended state, whatever the stored
    // state field says.
    if poll.is_expired(now) {
        return Err(DenialReason::Expired);
    }

    if poll.require_login && !identity.is_authenticated() {
        return Err(if stale_session {
            DenialReason::SessionInvalid
        } else {
            DenialReason::LoginRequired
        });
    }

    // An anonymous identity with no resolvable address cannot be
    // deduplicated; fail closed rather than allow unlimited votes.
    if identity.is_unresolved() {
        return Err(DenialReason::IdentityUnresolved);
    }

    if option_ids.is_empty() {
        return Err(DenialReason::InvalidSelection);
    }
    let mut seen = HashSet::with_capacity(option_ids.len());
    for id in option_ids {
        if !seen.insert(*id) || poll.option(*id).is_none() {
            return Err(DenialReason::InvalidSelection);
        }
    }

    if !poll.allow_multiple_votes && option_ids.len() > 1 {
        return Err(DenialReason::MultipleVotesNotAllowed);
    }

    if prior_votes > 0 {
        return Err(DenialReason::AlreadyVoted);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn anonymous() -> Identity {
        Identity::Anonymous {
            ip: "10.0.0.5".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
        }
    }

    fn unresolved() -> Identity {
        Identity::Anonymous {
            ip: crate::model::identity::UNKNOWN_IP.to_string(),
            user_agent: "Mozilla/5.0".to_string(),
        }
    }

    fn authenticated() -> Identity {
        Identity::Authenticated { user_id: Id::new() }
    }

    fn first_option(poll: &PollCore) -> Vec<Id> {
        vec![poll.options[0].id]
    }

    #[test]
    fn anonymous_vote_on_open_poll_is_allowed() {
        let poll = PollCore::example();
        let result = check(&poll, &anonymous(), false, 0, &first_option(&poll), Utc::now());
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn second_vote_by_same_identity_is_denied() {
        // Same IP voting again, even for a different option.
        let poll = PollCore::example();
        let result = check(
            &poll,
            &anonymous(),
            false,
            1,
            &[poll.options[1].id],
            Utc::now(),
        );
        assert_eq!(result, Err(DenialReason::AlreadyVoted));
    }

    #[test]
    fn draft_and_ended_polls_deny_not_active() {
        for state in [PollState::Draft, PollState::Ended] {
            let poll = PollCore {
                state,
                ..PollCore::example()
            };
            let result = check(&poll, &anonymous(), false, 0, &first_option(&poll), Utc::now());
            assert_eq!(result, Err(DenialReason::NotActive));
        }
    }

    #[test]
    fn past_end_time_denies_expired_despite_active_state() {
        // Stored state says Active, the clock says otherwise.
        let poll = PollCore::expired_example();
        assert_eq!(poll.state, PollState::Active);
        let result = check(&poll, &anonymous(), false, 0, &first_option(&poll), Utc::now());
        assert_eq!(result, Err(DenialReason::Expired));
    }

    #[test]
    fn end_time_boundary_is_exclusive() {
        let now = Utc::now();
        let poll = PollCore {
            end_time: Some(now),
            ..PollCore::example()
        };
        let result = check(&poll, &anonymous(), false, 0, &first_option(&poll), now);
        assert_eq!(result, Err(DenialReason::Expired));

        let poll = PollCore {
            end_time: Some(now + Duration::seconds(1)),
            ..PollCore::example()
        };
        let result = check(&poll, &anonymous(), false, 0, &first_option(&poll), now);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn no_end_time_never_expires() {
        let poll = PollCore {
            end_time: None,
            ..PollCore::example()
        };
        let result = check(&poll, &anonymous(), false, 0, &first_option(&poll), Utc::now());
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn login_required_poll_denies_anonymous_but_allows_authenticated() {
        let poll = PollCore::login_required_example();
        let result = check(&poll, &anonymous(), false, 0, &first_option(&poll), Utc::now());
        assert_eq!(result, Err(DenialReason::LoginRequired));

        let result = check(
            &poll,
            &authenticated(),
            false,
            0,
            &first_option(&poll),
            Utc::now(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn stale_session_denies_session_invalid() {
        let poll = PollCore::login_required_example();
        let result = check(&poll, &anonymous(), true, 0, &first_option(&poll), Utc::now());
        assert_eq!(result, Err(DenialReason::SessionInvalid));
    }

    #[test]
    fn unresolved_identity_fails_closed() {
        // The "unknown" sentinel must never produce an allowed vote.
        let poll = PollCore::example();
        let result = check(&poll, &unresolved(), false, 0, &first_option(&poll), Utc::now());
        assert_eq!(result, Err(DenialReason::IdentityUnresolved));
    }

    #[test]
    fn unresolved_identity_does_not_apply_to_authenticated() {
        let poll = PollCore::example();
        let result = check(
            &poll,
            &authenticated(),
            false,
            0,
            &first_option(&poll),
            Utc::now(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn empty_selection_is_invalid() {
        let poll = PollCore::example();
        let result = check(&poll, &anonymous(), false, 0, &[], Utc::now());
        assert_eq!(result, Err(DenialReason::InvalidSelection));
    }

    #[test]
    fn duplicate_option_ids_are_invalid() {
        // Duplicates are denied even where multi-select is allowed.
        let poll = PollCore::multi_select_example();
        let opt = poll.options[0].id;
        let result = check(&poll, &anonymous(), false, 0, &[opt, opt], Utc::now());
        assert_eq!(result, Err(DenialReason::InvalidSelection));
    }

    #[test]
    fn foreign_option_id_is_invalid() {
        let poll = PollCore::example();
        let result = check(&poll, &anonymous(), false, 0, &[Id::new()], Utc::now());
        assert_eq!(result, Err(DenialReason::InvalidSelection));
    }

    #[test]
    fn multi_option_selection_requires_multi_select_poll() {
        let poll = PollCore::example();
        let ids = vec![poll.options[0].id, poll.options[1].id];
        let result = check(&poll, &anonymous(), false, 0, &ids, Utc::now());
        assert_eq!(result, Err(DenialReason::MultipleVotesNotAllowed));

        let poll = PollCore::multi_select_example();
        let ids = vec![poll.options[0].id, poll.options[1].id];
        let result = check(&poll, &anonymous(), false, 0, &ids, Utc::now());
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn earlier_checks_shadow_later_ones() {
        // An expired, login-required poll with a bad selection reports
        // NotActive first when ended, then Expired, in the documented order.
        let poll = PollCore {
            state: PollState::Ended,
            ..PollCore::expired_example()
        };
        let result = check(&poll, &unresolved(), false, 3, &[], Utc::now());
        assert_eq!(result, Err(DenialReason::NotActive));

        let poll = PollCore {
            require_login: true,
            ..PollCore::expired_example()
        };
        let result = check(&poll, &anonymous(), false, 3, &[], Utc::now());
        assert_eq!(result, Err(DenialReason::Expired));
    }
}
