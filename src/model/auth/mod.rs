mod token;
mod user;

pub use token::{AuthToken, AUTH_TOKEN_COOKIE};
pub use user::{NewUser, User, UserCore};
