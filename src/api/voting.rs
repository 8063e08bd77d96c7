use std::net::IpAddr;

use chrono::{Duration, Utc};
use mongodb::{
    bson::{doc, Bson},
    options::FindOneOptions,
};
use rocket::{serde::json::Json, Route, State};

use super::common::{mark_completed, tabulate, verified_applications};
use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        api::{
            auth::{Anyone, AuthToken},
            nomination::{Choice, ResultsResponse, VoteReceipt, VoteRequest},
        },
        cipher::FieldCipher,
        common::{tally::remaining, ApplicationStatus},
        db::{
            nomination::{Application, VoteRecord},
            position_vote::PositionVote,
            user::User,
        },
        mongodb::{Coll, Id},
    },
};

pub fn routes() -> Vec<Route> {
    routes![vote, results]
}

/// Check that `voter` may still vote for `application`.
fn check_open(application: &Application, voter: Id) -> Result<()> {
    if !application.status.is_verified() {
        return Err(Error::Validation(
            "Nomination is not open for voting".to_string(),
        ));
    }
    if application.is_election_completed {
        return Err(Error::Validation("Election already completed".to_string()));
    }
    if application.has_vote_from(voter) {
        return Err(Error::Conflict(
            "You have already voted for this nomination".to_string(),
        ));
    }
    Ok(())
}

#[post("/api/nomination/vote", data = "<request>", format = "json")]
async fn vote(
    token: AuthToken<Anyone>,
    request: Json<VoteRequest>,
    client_ip: Option<IpAddr>,
    applications: Coll<Application>,
    position_votes: Coll<PositionVote>,
) -> Result<Json<VoteReceipt>> {
    let id = match request.nomination_id.resolve()? {
        Choice::NoneOfTheAbove => {
            debug!("User {} abstained", token.id);
            return Ok(Json(VoteReceipt {
                message: "NOTA vote recorded".to_string(),
                nomination_id: None,
            }));
        }
        Choice::Nomination(id) => id,
    };

    let application = applications
        .find_one(Application::by_id(id), None)
        .await?
        .ok_or_else(|| Error::not_found("Nomination"))?;
    check_open(&application, token.id)?;

    // Take the per-position lock first; its unique index admits one vote
    // per user and position.
    let lock = PositionVote::new(token.id, application.position_hash.clone(), id);
    position_votes
        .insert_one(&lock, None)
        .await
        .map_err(|e| Error::conflict_on_duplicate(e, "You have already voted for this position"))?;

    // Server-observed address first, then whatever the client reported.
    let ip = client_ip
        .map(|ip| ip.to_string())
        .or_else(|| request.ip.clone())
        .filter(|ip| !ip.trim().is_empty());
    let record = VoteRecord {
        ip,
        signature: request.signature.clone().filter(|s| !s.trim().is_empty()),
        user: token.id,
        voted_at: lock.cast_at,
    };

    let mut filter = Application::by_id(id);
    filter.extend(ApplicationStatus::Verified.filter());
    filter.insert("is_election_completed", false);
    filter.insert("votes.user", doc! { "$ne": token.id });
    let pushed = applications
        .update_one(filter, doc! { "$push": { "votes": Bson::from(record) } }, None)
        .await;

    match pushed {
        Ok(result) if result.modified_count == 1 => {
            info!("User {} voted for nomination {id}", token.id);
            Ok(Json(VoteReceipt {
                message: "Vote recorded successfully".to_string(),
                nomination_id: Some(id.into()),
            }))
        }
        outcome => {
            // Release the lock so the voter is not locked out of the position.
            position_votes.delete_one(lock.filter(), None).await?;
            outcome?;
            // The nomination changed since it was read.
            let current = applications
                .find_one(Application::by_id(id), None)
                .await?
                .ok_or_else(|| Error::not_found("Nomination"))?;
            check_open(&current, token.id)?;
            Err(Error::Conflict(
                "You have already voted for this nomination".to_string(),
            ))
        }
    }
}

#[get("/api/auth/result")]
async fn results(
    token: AuthToken<Anyone>,
    applications: Coll<Application>,
    position_votes: Coll<PositionVote>,
    users: Coll<User>,
    config: &State<Config>,
    cipher: &State<FieldCipher>,
) -> Result<Json<ResultsResponse>> {
    let earliest = FindOneOptions::builder().sort(doc! { "cast_at": 1 }).build();
    let first_vote = position_votes
        .find_one(doc! { "user": token.id }, earliest)
        .await?
        .ok_or_else(|| Error::not_found("Vote"))?;

    let now = Utc::now();
    let window = config.voting_window();
    let left = remaining(first_vote.cast_at, window, now);
    if left > Duration::zero() {
        return Ok(Json(ResultsResponse::thanks(left, window)));
    }

    let verified = verified_applications(&applications).await?;
    if verified.is_empty() {
        return Err(Error::NotFound("No nominations found".to_string()));
    }
    let tally = tabulate(&verified, &users, cipher).await?;
    mark_completed(&verified, &tally, &applications, window, now).await?;

    Ok(Json(ResultsResponse::results(tally, window)))
}
