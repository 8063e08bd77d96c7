//! A command-line client for the election server.
//! Every command logs in with the given credentials first, then runs.

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;
use serde::Serialize;

use election_backend::client::{ApiClient, ClientError, ClientResult};
use election_backend::model::api::nomination::BallotChoice;

const PROGRAM_NAME: &str = "ballot-cli";

const ABOUT_TEXT: &str = "Take part in a corporate election from the command line.

EXIT CODES:
     0: Success.
     1: The server rejected the request.
     2: The server could not be reached.";

const SERVER: &str = "SERVER";
const EMAIL: &str = "EMAIL";
const PASSWORD: &str = "PASSWORD";
const OTP: &str = "OTP";
const SEND_OTP: &str = "SEND_OTP";
const KIND: &str = "KIND";
const NOMINATION: &str = "NOMINATION";
const SIGNATURE: &str = "SIGNATURE";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .arg(
            Arg::new(SERVER)
                .long("server")
                .help("Base URL of the election server")
                .default_value("http://localhost:8000")
                .global(true),
        )
        .arg(
            Arg::new(EMAIL)
                .long("email")
                .help("Email address to log in with")
                .global(true),
        )
        .arg(
            Arg::new(PASSWORD)
                .long("password")
                .help("Password to log in with")
                .conflicts_with(OTP)
                .global(true),
        )
        .arg(
            Arg::new(OTP)
                .long("otp")
                .help("Emailed one-time code to log in with")
                .global(true),
        )
        .subcommand(
            Command::new("login")
                .about("Check the credentials, or email a login code")
                .arg(
                    Arg::new(SEND_OTP)
                        .long("send-otp")
                        .help("Email a one-time login code instead of logging in")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("published").about("List published announcements"))
        .subcommand(
            Command::new("nominations").about("List nominations").arg(
                Arg::new(KIND)
                    .long("type")
                    .help("Only list one kind")
                    .value_parser(["nominations", "announcements"]),
            ),
        )
        .subcommand(
            Command::new("vote")
                .about("Vote for a nomination, or NOTA to abstain")
                .arg(Arg::new(NOMINATION).required(true))
                .arg(
                    Arg::new(SIGNATURE)
                        .long("signature")
                        .help("Device fingerprint to submit with the vote"),
                ),
        )
        .subcommand(Command::new("results").about("Show your vote status or the results"))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Could not format the response: {e}"),
    }
}

async fn log_in(client: &mut ApiClient, args: &ArgMatches) -> ClientResult<()> {
    let email = args
        .get_one::<String>(EMAIL)
        .ok_or(ClientError::LoggedOut)?;
    match (args.get_one::<String>(OTP), args.get_one::<String>(PASSWORD)) {
        (Some(otp), _) => client.login_with_otp(email, otp).await,
        (None, Some(password)) => client.login_with_password(email, password).await,
        (None, None) => Err(ClientError::LoggedOut),
    }
}

/// Run the chosen command.
async fn execute(args: &ArgMatches) -> ClientResult<()> {
    // Default value is guaranteed to be present.
    let server: &String = args.get_one(SERVER).unwrap();
    let mut client = ApiClient::new(server)?;

    let (command, sub_args) = args.subcommand().unwrap(); // Subcommand is required.
    if command == "login" && sub_args.get_flag(SEND_OTP) {
        let email = args
            .get_one::<String>(EMAIL)
            .ok_or(ClientError::LoggedOut)?;
        println!("{}", client.request_otp(email).await?);
        return Ok(());
    }

    log_in(&mut client, args).await?;
    match command {
        "login" => {
            if let Some(user) = client.session().user() {
                print_json(&user);
            }
        }
        "published" => print_json(&client.published().await?),
        "nominations" => {
            let kind = sub_args.get_one::<String>(KIND).map(String::as_str);
            print_json(&client.nominations(kind).await?);
        }
        "vote" => {
            // Required argument is guaranteed to be present.
            let nomination: &String = sub_args.get_one(NOMINATION).unwrap();
            let signature = sub_args.get_one::<String>(SIGNATURE).cloned();
            let receipt = client
                .vote(BallotChoice::Text(nomination.clone()), signature)
                .await?;
            print_json(&receipt);
        }
        "results" => print_json(&client.results().await?),
        _ => unreachable!("clap rejects unknown subcommands"),
    }
    Ok(())
}

/// Run the command, report any failure, and return the exit code.
async fn run(args: &ArgMatches) -> u8 {
    match execute(args).await {
        Ok(()) => 0,
        Err(ClientError::LoggedOut) => {
            eprintln!("Give --email and either --password or --otp");
            1
        }
        Err(ClientError::Http(e)) => {
            eprintln!("Could not reach the server: {e}");
            2
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

#[rocket::main]
async fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args).await;
    std::process::exit(exit_code.into())
}
