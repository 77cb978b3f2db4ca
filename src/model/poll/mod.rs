mod db;
mod poll_core;

pub use db::Poll;
pub use poll_core::{PollCore, PollOption, PollState};
