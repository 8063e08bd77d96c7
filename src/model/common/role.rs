use std::fmt::{Display, Formatter};

use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};

/// What a user is allowed to do.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can apply for positions and vote.
    #[default]
    Employee,
    /// Can also verify, reject and announce, and bulk-import employees.
    Admin,
    /// An admin who can additionally create other admins.
    Super,
}

impl Role {
    /// Admins and supers.
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Admin | Self::Super)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Admin => "admin",
            Self::Super => "super",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Role> for Bson {
    fn from(role: Role) -> Self {
        Bson::String(role.as_str().to_string())
    }
}
