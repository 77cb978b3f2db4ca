use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core user data, as stored in the database.
///
/// The engine only needs users as a source of authenticated identities; this
/// is the minimal session-provider account, not a profile.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCore {
    pub username: String,
    pub password_hash: String,
    /// May run repair operations such as a tally recount.
    pub admin: bool,
}

impl UserCore {
    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        // A malformed stored hash verifies as false rather than erroring.
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }
}

/// A user without an ID.
pub type NewUser = UserCore;

/// A user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub user: UserCore,
}

impl Deref for User {
    type Target = UserCore;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

impl DerefMut for User {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.user
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl UserCore {
        /// Password is `correct horse battery staple`.
        pub fn example() -> Self {
            Self {
                username: "alice".to_string(),
                password_hash: argon2::hash_encoded(
                    b"correct horse battery staple",
                    b"pollcastsalt",
                    &argon2::Config::default(),
                )
                .unwrap(),
                admin: false,
            }
        }

        pub fn admin_example() -> Self {
            Self {
                username: "bob".to_string(),
                admin: true,
                ..Self::example()
            }
        }
    }
}
