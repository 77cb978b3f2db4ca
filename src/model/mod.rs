pub mod auth;
pub mod eligibility;
pub mod identity;
pub mod mongodb;
pub mod poll;
pub mod security;
pub mod vote;
