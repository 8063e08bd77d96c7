use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
};
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route, State};

use super::{
    auth::find_nomination,
    common::{load_owners, tabulate, verified_applications},
};
use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::{Anyone, AuthToken, Staff},
            nomination::{
                AnnouncementBody, ApplicationView, CreateNominationRequest, CreatedNomination,
                ListFilter, ListQuery, NominationEnvelope, NominationView, PublishRequest,
                PublishedAnnouncement, RejectRequest, ReviewedNomination, Tally,
            },
            user::MessageResponse,
        },
        cipher::FieldCipher,
        common::ApplicationStatus,
        db::{
            nomination::{
                position_hash, Announcement, AnnouncementCore, Application, ApplicationCore,
                Nomination,
            },
            position_vote::PositionVote,
            user::User,
        },
        mongodb::{Coll, Id},
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        create_nomination,
        get_all_nominations,
        standings,
        get_nomination,
        verify_nomination,
        reject_nomination,
        delete_nomination,
        publish_announcement,
    ]
}

#[post("/api/nomination/create", data = "<request>", format = "json")]
async fn create_nomination(
    token: AuthToken<Anyone>,
    request: Json<CreateNominationRequest>,
    nominations: Coll<Nomination>,
    applications: Coll<Application>,
    users: Coll<User>,
    cipher: &State<FieldCipher>,
) -> Result<(Status, Json<CreatedNomination>)> {
    let (position, description) = request.validate()?;

    // One application per user and position. The unique index catches any race.
    let mut existing = Application::filter();
    existing.insert("user", token.id);
    existing.insert("position_hash", position_hash(position));
    if applications.find_one(existing, None).await?.is_some() {
        return Err(Error::Conflict(
            "You have already applied for this position".to_string(),
        ));
    }

    let application = Application {
        id: Id::new(),
        application: ApplicationCore::new(token.id, position, description, cipher),
    };
    nominations
        .insert_one(Nomination::Application(application.clone()), None)
        .await
        .map_err(|e| {
            Error::conflict_on_duplicate(e, "You have already applied for this position")
        })?;
    info!("User {} applied for {position} ({})", token.id, application.id);

    let owners = load_owners([token.id], &users, cipher).await?;
    Ok((
        Status::Created,
        Json(CreatedNomination {
            message: "Nomination submitted successfully".to_string(),
            nomination: ApplicationView::open(&application, &owners, false, cipher)?,
            applied: true,
        }),
    ))
}

#[get("/api/nomination/getall?<query..>")]
async fn get_all_nominations(
    token: AuthToken<Anyone>,
    query: ListQuery,
    nominations: Coll<Nomination>,
    users: Coll<User>,
    cipher: &State<FieldCipher>,
) -> Result<Json<Vec<NominationView>>> {
    let filter = ListFilter::from_query(query.kind.as_deref()).filter();
    let newest_first = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
    let found: Vec<Nomination> = nominations
        .find(filter, newest_first)
        .await?
        .try_collect()
        .await?;

    let owners = load_owners(found.iter().map(Nomination::user), &users, cipher).await?;
    let views = found
        .iter()
        .map(|nomination| NominationView::open(nomination, &owners, token.is_staff(), cipher))
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(views))
}

#[get("/api/nomination/results")]
async fn standings(
    _token: AuthToken<Staff>,
    applications: Coll<Application>,
    users: Coll<User>,
    cipher: &State<FieldCipher>,
) -> Result<Json<Tally>> {
    let verified = verified_applications(&applications).await?;
    if verified.is_empty() {
        return Err(Error::NotFound("No nominations found".to_string()));
    }
    Ok(Json(tabulate(&verified, &users, cipher).await?))
}

#[get("/api/nomination/<id>")]
async fn get_nomination(
    token: AuthToken<Anyone>,
    id: Id,
    nominations: Coll<Nomination>,
    users: Coll<User>,
    cipher: &State<FieldCipher>,
) -> Result<Json<NominationEnvelope>> {
    let nomination = find_nomination(id, token.is_staff(), &nominations, &users, cipher).await?;
    Ok(Json(NominationEnvelope { nomination }))
}

/// Move a pending application to `status`, in a single conditional write.
async fn review(
    id: Id,
    status: ApplicationStatus,
    applications: &Coll<Application>,
    users: &Coll<User>,
    cipher: &FieldCipher,
) -> Result<ApplicationView> {
    let mut filter = Application::by_id(id);
    filter.extend(ApplicationStatus::Pending.filter());
    let update = doc! { "$set": { "status": status.clone() } };
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();

    let Some(application) = applications
        .find_one_and_update(filter, update, options)
        .await?
    else {
        // Either missing, or already reviewed.
        return match applications.find_one(Application::by_id(id), None).await? {
            None => Err(Error::not_found("Nomination")),
            Some(current) => Err(Error::Conflict(format!(
                "Nomination is already {}",
                current.status.label()
            ))),
        };
    };
    info!("Nomination {id} is now {}", status.label());

    let owners = load_owners([application.user], users, cipher).await?;
    ApplicationView::open(&application, &owners, true, cipher)
}

#[put("/api/nomination/verify/<id>")]
async fn verify_nomination(
    _token: AuthToken<Staff>,
    id: Id,
    applications: Coll<Application>,
    users: Coll<User>,
    cipher: &State<FieldCipher>,
) -> Result<Json<ReviewedNomination>> {
    let nomination = review(id, ApplicationStatus::Verified, &applications, &users, cipher).await?;
    Ok(Json(ReviewedNomination {
        message: "Nomination verified successfully".to_string(),
        nomination,
    }))
}

#[put("/api/nomination/reject/<id>", data = "<request>")]
async fn reject_nomination(
    _token: AuthToken<Staff>,
    id: Id,
    request: Option<Json<RejectRequest>>,
    applications: Coll<Application>,
    users: Coll<User>,
    cipher: &State<FieldCipher>,
) -> Result<Json<ReviewedNomination>> {
    let reason = request.and_then(|r| r.into_inner().reason);
    let status = ApplicationStatus::rejected(reason.as_deref());
    let nomination = review(id, status, &applications, &users, cipher).await?;
    Ok(Json(ReviewedNomination {
        message: "Nomination rejected successfully".to_string(),
        nomination,
    }))
}

#[delete("/api/nomination/<id>")]
async fn delete_nomination(
    token: AuthToken<Anyone>,
    id: Id,
    nominations: Coll<Nomination>,
    position_votes: Coll<PositionVote>,
) -> Result<Json<MessageResponse>> {
    let nomination = nominations
        .find_one(id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Nomination"))?;

    // Staff may delete anything; owners only their own applications.
    let permitted = token.is_staff()
        || matches!(&nomination, Nomination::Application(app) if app.user == token.id);
    if !permitted {
        return Err(Error::Forbidden(
            "Unauthorized to delete this nomination".to_string(),
        ));
    }

    nominations.delete_one(id.as_doc(), None).await?;
    let released = position_votes
        .delete_many(PositionVote::for_nomination(id), None)
        .await?;
    info!(
        "User {} deleted nomination {id}, releasing {} position votes",
        token.id, released.deleted_count
    );

    let message = if token.is_staff() {
        "Nomination deleted by admin successfully"
    } else {
        "Nomination deleted successfully"
    };
    Ok(Json(MessageResponse::new(message)))
}

#[post("/api/nomination/publish", data = "<request>", format = "json")]
async fn publish_announcement(
    token: AuthToken<Staff>,
    request: Json<PublishRequest>,
    nominations: Coll<Nomination>,
    cipher: &State<FieldCipher>,
) -> Result<(Status, Json<PublishedAnnouncement>)> {
    let (title, message, eligibility) = request.validate()?;
    let announcement = Announcement {
        id: Id::new(),
        announcement: AnnouncementCore::new(token.id, title, message, eligibility, cipher),
    };
    nominations
        .insert_one(Nomination::Announcement(announcement.clone()), None)
        .await?;
    info!("User {} published an announcement for {title}", token.id);

    Ok((
        Status::Created,
        Json(PublishedAnnouncement {
            message: "Position announcement published successfully".to_string(),
            announcement: AnnouncementBody::open(&announcement, cipher)?,
            is_election_completed: announcement.is_election_completed,
        }),
    ))
}
