//! Documents as they are stored in MongoDB.
//!
//! Personal and nomination text is held as [`Sealed`](crate::model::cipher::Sealed)
//! values; converting to and from plaintext happens explicitly at the API
//! boundary with a [`FieldCipher`](crate::model::cipher::FieldCipher).

pub mod nomination;
pub mod position_vote;
pub mod user;
