pub mod ledger;

mod claim;
mod db;
mod vote_core;

pub use claim::PollVoter;
pub use db::Vote;
pub use vote_core::{NewVote, VoteCore, VoterKey};
