use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};

use crate::model::db::{
    nomination::{Announcement, Application, Nomination},
    position_vote::PositionVote,
    user::{NewUser, User},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.rocket().state::<Database>() {
            Some(db) => request::Outcome::Success(Coll::from_db(db)),
            None => request::Outcome::Error((Status::InternalServerError, ())),
        }
    }
}

// User collections
const USERS: &str = "users";
impl MongoCollection for User {
    const NAME: &'static str = USERS;
}
impl MongoCollection for NewUser {
    const NAME: &'static str = USERS;
}

// Nomination collections. Applications and announcements share one
// collection and are told apart by their `kind` field.
const NOMINATIONS: &str = "nominations";
impl MongoCollection for Nomination {
    const NAME: &'static str = NOMINATIONS;
}
impl MongoCollection for Application {
    const NAME: &'static str = NOMINATIONS;
}
impl MongoCollection for Announcement {
    const NAME: &'static str = NOMINATIONS;
}

// One entry per (voter, position) that has been voted on.
const POSITION_VOTES: &str = "position_votes";
impl MongoCollection for PositionVote {
    const NAME: &'static str = POSITION_VOTES;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Users are looked up by the hashes of their encrypted email and phone.
    let users = Coll::<User>::from_db(db);
    let email_index = IndexModel::builder()
        .keys(doc! { "email_hash": 1 })
        .options(unique.clone())
        .build();
    users.create_index(email_index, None).await?;
    let phone_index = IndexModel::builder()
        .keys(doc! { "phone_hash": 1 })
        .options(unique.clone())
        .build();
    users.create_index(phone_index, None).await?;
    let uploaded_by_index = IndexModel::builder()
        .keys(doc! { "uploaded_by": 1 })
        .build();
    users.create_index(uploaded_by_index, None).await?;

    // One application per user and position.
    let nominations = Coll::<Nomination>::from_db(db);
    let application_index = IndexModel::builder()
        .keys(doc! { "user": 1, "position_hash": 1 })
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! { "kind": "application" })
                .build(),
        )
        .build();
    nominations.create_index(application_index, None).await?;
    let listing_index = IndexModel::builder()
        .keys(doc! { "kind": 1, "created_at": -1 })
        .build();
    nominations.create_index(listing_index, None).await?;
    let voter_index = IndexModel::builder()
        .keys(doc! { "votes.user": 1 })
        .build();
    nominations.create_index(voter_index, None).await?;

    // One vote per user and position.
    let position_vote_index = IndexModel::builder()
        .keys(doc! { "user": 1, "position_hash": 1 })
        .options(unique)
        .build();
    Coll::<PositionVote>::from_db(db)
        .create_index(position_vote_index, None)
        .await?;

    Ok(())
}
