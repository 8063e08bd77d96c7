use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Document};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Marks that a user has voted for some position. The unique index on
/// (`user`, `position_hash`) is what limits everyone to one vote per position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionVote {
    pub user: Id,
    pub position_hash: String,
    pub nomination: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl PositionVote {
    pub fn new(user: Id, position_hash: String, nomination: Id) -> Self {
        Self {
            user,
            position_hash,
            nomination,
            cast_at: Utc::now(),
        }
    }

    /// Filter matching the lock taken for this exact vote.
    pub fn filter(&self) -> Document {
        doc! {
            "user": self.user,
            "position_hash": &self.position_hash,
            "nomination": self.nomination,
        }
    }

    /// Filter matching every lock pointing at a nomination.
    pub fn for_nomination(nomination: Id) -> Document {
        doc! { "nomination": nomination }
    }
}
