use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    cipher::{hash_value, FieldCipher, Sealed},
    common::{tally::unique_vote_count, ApplicationStatus, Position},
    mongodb::{optional_datetime, Id},
};

pub const APPLICATION_KIND: &str = "application";
pub const ANNOUNCEMENT_KIND: &str = "announcement";

/// Hash under which applications for a position are grouped and deduplicated.
pub fn position_hash(position: Position) -> String {
    hash_value(position.title())
}

/// Open a sealed position title.
pub fn open_position(sealed: &Sealed, cipher: &FieldCipher) -> Result<Position> {
    let title = cipher.open(sealed)?;
    title
        .parse()
        .map_err(|_| Error::Cipher(format!("stored position '{title}' is not a known title")))
}

/// A single vote, as stored inside the application it was cast for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub user: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voted_at: DateTime<Utc>,
}

impl From<VoteRecord> for Bson {
    fn from(vote: VoteRecord) -> Self {
        to_bson(&vote).expect("Serialisation is infallible")
    }
}

/// The leader of one position, as recorded when an election completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub position_hash: String,
    pub nomination: Id,
    pub votes: i64,
}

impl From<WinnerRecord> for Bson {
    fn from(winner: WinnerRecord) -> Self {
        to_bson(&winner).expect("Serialisation is infallible")
    }
}

/// A candidate's application for a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCore {
    pub user: Id,
    pub position: Sealed,
    pub position_hash: String,
    pub description: Sealed,
    #[serde(default)]
    pub status: ApplicationStatus,
    #[serde(default)]
    pub votes: Vec<VoteRecord>,
    #[serde(default)]
    pub is_election_completed: bool,
    #[serde(default)]
    pub completed_count: i32,
    #[serde(default, with = "optional_datetime")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Winners across all positions at the time this election completed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub winners: Vec<WinnerRecord>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl ApplicationCore {
    pub fn new(user: Id, position: Position, description: &str, cipher: &FieldCipher) -> Self {
        Self {
            user,
            position: cipher.seal(position.title()),
            position_hash: position_hash(position),
            description: cipher.seal(description),
            status: ApplicationStatus::Pending,
            votes: Vec::new(),
            is_election_completed: false,
            completed_count: 0,
            completed_at: None,
            winners: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn position(&self, cipher: &FieldCipher) -> Result<Position> {
        open_position(&self.position, cipher)
    }

    /// Votes that count after IP and fingerprint deduplication.
    pub fn unique_votes(&self) -> usize {
        unique_vote_count(
            self.votes
                .iter()
                .map(|v| (v.ip.as_deref(), v.signature.as_deref())),
        )
    }

    /// The latest vote, or creation if nobody has voted yet.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.votes
            .iter()
            .map(|v| v.voted_at)
            .max()
            .unwrap_or(self.created_at)
            .max(self.created_at)
    }

    pub fn has_vote_from(&self, user: Id) -> bool {
        self.votes.iter().any(|v| v.user == user)
    }
}

/// An admin's announcement that a position is open for applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementCore {
    pub user: Id,
    pub title: Sealed,
    pub message: Sealed,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<Sealed>,
    #[serde(default)]
    pub is_election_completed: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl AnnouncementCore {
    pub fn new(
        user: Id,
        title: Position,
        message: &str,
        eligibility: Option<&str>,
        cipher: &FieldCipher,
    ) -> Self {
        Self {
            user,
            title: cipher.seal(title.title()),
            message: cipher.seal(message),
            eligibility: cipher.seal_opt(eligibility),
            is_election_completed: false,
            created_at: Utc::now(),
        }
    }
}

/// An application from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub application: ApplicationCore,
}

impl Application {
    /// Filter matching applications only.
    pub fn filter() -> Document {
        doc! { "kind": APPLICATION_KIND }
    }

    /// Filter matching one application by ID.
    pub fn by_id(id: Id) -> Document {
        doc! { "_id": id, "kind": APPLICATION_KIND }
    }
}

impl Deref for Application {
    type Target = ApplicationCore;

    fn deref(&self) -> &Self::Target {
        &self.application
    }
}

impl DerefMut for Application {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.application
    }
}

/// An announcement from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub announcement: AnnouncementCore,
}

impl Announcement {
    /// Filter matching announcements only.
    pub fn filter() -> Document {
        doc! { "kind": ANNOUNCEMENT_KIND }
    }
}

impl Deref for Announcement {
    type Target = AnnouncementCore;

    fn deref(&self) -> &Self::Target {
        &self.announcement
    }
}

/// Any document in the nominations collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Nomination {
    Application(Application),
    Announcement(Announcement),
}

impl Nomination {
    pub fn id(&self) -> Id {
        match self {
            Self::Application(a) => a.id,
            Self::Announcement(a) => a.id,
        }
    }

    /// The applicant or the announcing admin.
    pub fn user(&self) -> Id {
        match self {
            Self::Application(a) => a.user,
            Self::Announcement(a) => a.user,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Application(a) => a.created_at,
            Self::Announcement(a) => a.created_at,
        }
    }
}
