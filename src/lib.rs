#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing, MailerFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod mailer;
pub mod model;
pub mod scheduled_task;

/// Assemble the server. Configuration, the database connection and the
/// mailer are all set up by fairings on ignition.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(MailerFairing)
        .attach(LoggerFairing)
}

/// Connect to the database named by `db_uri` in the test profile.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .expect("Could not connect to the test database")
}

/// A fresh database name, so tests never see each other's data.
#[cfg(test)]
pub(crate) fn database() -> String {
    format!("election_test_{:016x}", rand::random::<u64>())
}

/// A server wired to the given database and mailer instead of the
/// configured ones.
#[cfg(test)]
pub(crate) async fn rocket_for_db_and_mailer(
    client: mongodb::Client,
    db_name: &str,
    mailer: mailer::Mailer,
) -> Rocket<Build> {
    let db = client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db)
        .await
        .expect("Could not create indexes");
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .manage(client)
        .manage(db)
        .manage(mailer)
}
