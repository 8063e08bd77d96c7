//! Types shared between the API and database layers.

pub mod position;
pub mod role;
pub mod status;
pub mod tally;

pub use position::Position;
pub use role::Role;
pub use status::ApplicationStatus;
