use std::net::IpAddr;

use chrono::Duration;
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::{
    mongodb::ensure_indexes_exist,
    security::{Limiters, RateQuota, WindowRateLimiter},
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    session_max_age: u32,
    #[serde(default)]
    trusted_proxies: Vec<IpAddr>,
    vote_rate_max: u32,
    vote_rate_window: u64,
    auth_rate_max: u32,
    auth_rate_window: u64,
    // secrets
    jwt_secret: String,
    csrf_secret: String,
}

impl Config {
    /// Idle lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Absolute maximum session age in seconds, counted from issue.
    pub fn session_max_age(&self) -> Duration {
        Duration::seconds(self.session_max_age.into())
    }

    /// Reverse proxies whose forwarded-address headers are trusted.
    /// Empty by default: forwarded headers from anyone else are ignored.
    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    /// Request quota for the vote-submission category.
    pub fn vote_quota(&self) -> RateQuota {
        RateQuota::new(self.vote_rate_max, self.vote_rate_window)
    }

    /// Request quota for the authentication category.
    pub fn auth_quota(&self) -> RateQuota {
        RateQuota::new(self.auth_rate_max, self.auth_rate_window)
    }

    /// Secret key used to sign JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key for forgery-token comparison.
    pub fn csrf_secret(&self) -> &[u8] {
        self.csrf_secret.as_bytes()
    }
}

/// A fairing that loads the application config, puts it in managed state,
/// and injects the rate limiters built from it.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let limiters = Limiters {
            vote: Box::new(WindowRateLimiter::new(config.vote_quota())),
            auth: Box::new(WindowRateLimiter::new(config.auth_quota())),
        };

        rocket = rocket.manage(config).manage(limiters);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// ensures the uniqueness indexes the vote ledger relies on, and places both
/// a `Client` and a `Database` into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        // The engine's at-most-once guarantee rests on these indexes.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "pollcast".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// Example config for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self {
                auth_ttl: 3600,
                session_max_age: 86400,
                trusted_proxies: vec!["192.0.2.1".parse().unwrap()],
                vote_rate_max: 10,
                vote_rate_window: 60,
                auth_rate_max: 5,
                auth_rate_window: 300,
                jwt_secret: "test-jwt-secret".to_string(),
                csrf_secret: "test-csrf-secret".to_string(),
            }
        }
    }
}
