#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

use config::{ConfigFairing, DatabaseFairing};
use logging::LoggerFairing;

/// Assemble the server: routes plus the config, database, and logging
/// fairings. Fails at ignition if the config is incomplete or the database
/// is unreachable.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(LoggerFairing)
}
