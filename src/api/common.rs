use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::{self, doc, Bson};
use rocket::futures::TryStreamExt;

use crate::error::Result;
use crate::model::{
    api::nomination::{OwnerView, Owners, Tally},
    cipher::FieldCipher,
    common::{
        tally::{completion_due, Standing},
        ApplicationStatus,
    },
    db::{nomination::Application, user::User},
    mongodb::{Coll, Id},
};

/// Load and decrypt the owners of the given users, for populating views.
/// Users that no longer exist are simply absent from the map.
pub async fn load_owners(
    ids: impl IntoIterator<Item = Id>,
    users: &Coll<User>,
    cipher: &FieldCipher,
) -> Result<Owners> {
    let ids: Vec<Id> = ids.into_iter().collect::<HashSet<_>>().into_iter().collect();
    if ids.is_empty() {
        return Ok(Owners::new());
    }

    let filter = doc! { "_id": { "$in": ids } };
    let found: Vec<User> = users.find(filter, None).await?.try_collect().await?;
    found
        .iter()
        .map(|user| Ok((user.id, OwnerView::open(user, cipher)?)))
        .collect()
}

/// All verified applications. Pending and rejected ones never take part in
/// a tally.
pub async fn verified_applications(applications: &Coll<Application>) -> Result<Vec<Application>> {
    let mut filter = Application::filter();
    filter.extend(ApplicationStatus::Verified.filter());
    Ok(applications.find(filter, None).await?.try_collect().await?)
}

/// Rank the given applications by their deduplicated vote counts.
pub async fn tabulate(
    applications: &[Application],
    users: &Coll<User>,
    cipher: &FieldCipher,
) -> Result<Tally> {
    let owners = load_owners(applications.iter().map(|app| app.user), users, cipher).await?;
    let standings = applications
        .iter()
        .map(|app| {
            Ok(Standing {
                id: app.id,
                position: app.position(cipher)?,
                created_at: app.created_at,
                votes: app.unique_votes(),
                candidate: (owners.get(&app.user).cloned(), app.votes.len()),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tally::from_standings(standings))
}

/// Mark every application whose voting window has run out since its last
/// activity as completed, recording the tally's winners on each. Returns
/// how many were marked.
pub async fn mark_completed(
    applications: &[Application],
    tally: &Tally,
    collection: &Coll<Application>,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<u64> {
    let due: Vec<Id> = applications
        .iter()
        .filter(|app| !app.is_election_completed)
        .filter(|app| completion_due(app.last_activity(), window, now))
        .map(|app| app.id)
        .collect();
    if due.is_empty() {
        return Ok(0);
    }

    let winners: Vec<Bson> = tally.winner_records().into_iter().map(Bson::from).collect();
    let filter = doc! {
        "_id": { "$in": due },
        "is_election_completed": false,
    };
    let update = doc! {
        "$set": {
            "is_election_completed": true,
            "completed_at": bson::DateTime::from_chrono(now),
            "winners": winners,
        },
        "$inc": { "completed_count": 1 },
    };
    let result = collection.update_many(filter, update, None).await?;
    if result.modified_count > 0 {
        info!("Marked {} applications as completed", result.modified_count);
    }
    Ok(result.modified_count)
}
