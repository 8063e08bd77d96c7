use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_sesv2::{
    config::{Credentials, Region},
    Client as SesClient,
};
use chrono::Duration;
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::mailer::Mailer;
use crate::model::{
    cipher::FieldCipher,
    db::user::{ensure_super_exists, SuperBootstrap},
    mongodb::{ensure_indexes_exist, Coll},
};

const DEFAULT_OTP_TTL: u32 = 10 * 60;
const DEFAULT_VOTING_WINDOW: u32 = 24 * 60 * 60;

fn default_otp_ttl() -> u32 {
    DEFAULT_OTP_TTL
}

fn default_voting_window() -> u32 {
    DEFAULT_VOTING_WINDOW
}

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    access_ttl: u32,
    refresh_ttl: u32,
    #[serde(default = "default_otp_ttl")]
    otp_ttl: u32,
    #[serde(default = "default_voting_window")]
    voting_window: u32,
    mail_from: String,
    #[serde(default)]
    secure_cookies: bool,
    // secrets
    access_token_secret: String,
    refresh_token_secret: String,
    encryption_key: String,
}

impl Config {
    /// Valid lifetime of access tokens.
    pub fn access_ttl(&self) -> Duration {
        Duration::seconds(self.access_ttl.into())
    }

    /// Valid lifetime of refresh tokens.
    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_ttl.into())
    }

    /// Valid lifetime of an emailed login code.
    pub fn otp_ttl(&self) -> Duration {
        Duration::seconds(self.otp_ttl.into())
    }

    /// How long after a vote its results stay hidden, and how long an
    /// election stays open after its last activity.
    pub fn voting_window(&self) -> Duration {
        Duration::seconds(self.voting_window.into())
    }

    /// Sender address for outgoing email.
    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }

    /// Whether cookies should be marked `Secure`.
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    /// Secret key used to sign access tokens.
    pub fn access_token_secret(&self) -> &[u8] {
        self.access_token_secret.as_bytes()
    }

    /// Secret key used to sign refresh tokens.
    pub fn refresh_token_secret(&self) -> &[u8] {
        self.refresh_token_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it, along with the
/// field cipher built from its key, in managed state.
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
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let cipher = match FieldCipher::from_hex(&config.encryption_key) {
            Ok(cipher) => cipher,
            Err(e) => {
                error!("Invalid `encryption_key`: {e}");
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config).manage(cipher);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    db_uri: String,
    #[serde(flatten)]
    bootstrap: SuperBootstrap,
}

fn default_db_name() -> String {
    "election".to_string()
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places both a `Client` and a `Database`
/// into managed state.
///
/// Must be attached after [`ConfigFairing`], whose cipher it needs to seal
/// the bootstrapped super admin.
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
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let Some(cipher) = rocket.state::<FieldCipher>().cloned() else {
            error!("Database fairing attached before config fairing");
            return Err(rocket);
        };
        info!("Loaded database config, connecting...");

        // Construct the connection.
        let client = match MongoClient::with_uri_str(&config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&config.db_name);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to create database indexes: {e}");
            return Err(rocket);
        }

        // Ensure there is a super admin, if one is configured.
        let users = Coll::from_db(&db);
        let new_users = Coll::from_db(&db);
        if let Err(e) = ensure_super_exists(&users, &new_users, &config.bootstrap, &cipher).await {
            error!("Failed to bootstrap super admin: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Configuration for the AWS connection.
#[derive(Deserialize)]
struct AwsConfig {
    // non-secrets
    aws_region: String,
    aws_access_key_id: String,
    // secrets
    aws_secret_access_key: String,
}

/// Build an SES client from explicit credentials.
pub fn ses_client(region: String, access_key_id: String, secret_access_key: String) -> SesClient {
    let aws_config = SdkConfig::builder()
        .region(Region::new(region))
        .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "rocket config",
        )))
        .behavior_version(BehaviorVersion::latest())
        .build();
    SesClient::new(&aws_config)
}

/// A fairing that loads the AWS config and places a [`Mailer`] into managed
/// state.
pub struct MailerFairing;

#[rocket::async_trait]
impl Fairing for MailerFairing {
    fn info(&self) -> Info {
        Info {
            name: "AWS SES",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<AwsConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load AWS config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let client = ses_client(
            config.aws_region,
            config.aws_access_key_id,
            config.aws_secret_access_key,
        );
        info!("Loaded Amazon SES config");

        // Manage the state.
        rocket = rocket.manage(Mailer::new(client));
        Ok(rocket)
    }
}

/// Example data for tests.
#[cfg(test)]
pub mod examples {
    use super::*;
    use crate::model::cipher::examples::EXAMPLE_KEY;

    impl Config {
        pub fn example() -> Self {
            Self {
                access_ttl: 15 * 60,
                refresh_ttl: 7 * 24 * 60 * 60,
                otp_ttl: DEFAULT_OTP_TTL,
                voting_window: DEFAULT_VOTING_WINDOW,
                mail_from: "elections@example.com".to_string(),
                secure_cookies: false,
                access_token_secret: "access-secret".to_string(),
                refresh_token_secret: "refresh-secret".to_string(),
                encryption_key: EXAMPLE_KEY.to_string(),
            }
        }
    }
}
