use std::process::ExitCode;

use log::{error, info, LevelFilter};
use log4rs_dynamic_filters::DynamicLevelFilter;
use rocket::Error as RocketError;
use thiserror::Error;

const LOG_CONFIG: &str = "log4rs.yaml";

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
enum Error {
    #[error("Failed to initialise logging from {LOG_CONFIG}: {0}")]
    Logging(String),
    #[error(transparent)]
    Rocket(#[from] RocketError),
}

fn init_logging() -> Result<(), Error> {
    log4rs::init_file(LOG_CONFIG, log4rs_dynamic_filters::default_deserializers())
        .map_err(|e| Error::Logging(e.to_string()))
}

async fn serve() -> Result<(), Error> {
    info!("Starting election backend v{}", env!("CARGO_PKG_VERSION"));
    let rocket = election_backend::build().ignite().await?;
    // Rocket's own logging is noise once it is up.
    DynamicLevelFilter::set("rocket", LevelFilter::Off);
    rocket.launch().await?;
    Ok(())
}

#[rocket::main]
async fn main() -> ExitCode {
    if let Err(err) = init_logging() {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            error!("Critical failure, shutting down");
            ExitCode::FAILURE
        }
    }
}
