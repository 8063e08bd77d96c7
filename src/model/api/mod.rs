//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Keys are camelCase.
//! - Sealed fields are opened into plaintext.

pub mod auth;
pub mod id;
pub mod import;
pub mod nomination;
pub mod user;
